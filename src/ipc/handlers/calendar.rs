use crate::calendar::ArchiveTarget;
use crate::ipc::helpers::{engine, required_str, respond, to_json, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::model::YearInput;
use serde_json::json;

fn upsert_year(state: &AppState, req: &Request) -> HandlerResult {
    let input: YearInput = serde_json::from_value(req.params.clone())
        .map_err(|e| HandlerErr::bad_params(format!("invalid year: {e}")))?;
    let year = engine(state)?.upsert_year(&input)?;
    to_json(&year)
}

fn set_current(state: &AppState, req: &Request) -> HandlerResult {
    let year_id = required_str(&req.params, "academicYearId")?;
    let year = engine(state)?.set_current_year(year_id)?;
    to_json(&year)
}

fn list(state: &AppState) -> HandlerResult {
    let years = engine(state)?.list_years()?;
    Ok(json!({ "years": to_json(&years)? }))
}

fn archive(state: &AppState, req: &Request) -> HandlerResult {
    let kind = required_str(&req.params, "kind")?;
    let id = required_str(&req.params, "id")?;
    let target = match kind {
        "year" => ArchiveTarget::Year(id),
        "term" => ArchiveTarget::Term(id),
        "sequence" => ArchiveTarget::Sequence(id),
        _ => {
            return Err(HandlerErr::bad_params(
                "kind must be one of: year, term, sequence",
            ))
        }
    };
    engine(state)?.archive(target)?;
    Ok(json!({ "kind": kind, "id": id, "archived": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "calendar.upsertYear" => upsert_year(state, req),
        "calendar.setCurrent" => set_current(state, req),
        "calendar.list" => list(state),
        "calendar.archive" => archive(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
