use crate::ipc::helpers::{engine, required_str, respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use crate::settings::SetupSection;

fn get(state: &AppState) -> HandlerResult {
    Ok(engine(state)?.settings()?)
}

fn update(state: &AppState, req: &Request) -> HandlerResult {
    let section_name = required_str(&req.params, "section")?;
    let Some(section) = SetupSection::parse(section_name) else {
        return Err(HandlerErr::bad_params(format!(
            "unknown section: {section_name}"
        )));
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("missing/invalid patch"));
    };
    Ok(engine(state)?.update_settings(section, patch)?)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "setup.get" => get(state),
        "setup.update" => update(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
