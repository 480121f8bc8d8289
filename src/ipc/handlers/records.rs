use crate::ipc::helpers::{engine, required_str, respond, to_json, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn get(state: &AppState, req: &Request) -> HandlerResult {
    let student_id = required_str(&req.params, "studentId")?;
    let year_id = required_str(&req.params, "academicYearId")?;
    let record = engine(state)?.student_record(student_id, year_id)?;
    to_json(&record)
}

fn averages(state: &AppState, req: &Request) -> HandlerResult {
    let student_id = required_str(&req.params, "studentId")?;
    let year_id = required_str(&req.params, "academicYearId")?;
    let averages = engine(state)?.student_averages(student_id, year_id)?;
    to_json(&averages)
}

fn class_summary(state: &AppState, req: &Request) -> HandlerResult {
    let class_id = required_str(&req.params, "classId")?;
    let year_id = required_str(&req.params, "academicYearId")?;
    let term_id = required_str(&req.params, "termId")?;
    let rows = engine(state)?.class_summary(class_id, year_id, term_id)?;
    Ok(json!({ "rows": to_json(&rows)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "records.get" => get(state, req),
        "records.averages" => averages(state, req),
        "records.classSummary" => class_summary(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
