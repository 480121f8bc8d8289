use crate::ipc::helpers::{
    engine, optional_str, required_str, respond, to_json, HandlerErr, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use crate::model::SubjectInput;
use serde_json::json;

fn upsert_class(state: &AppState, req: &Request) -> HandlerResult {
    let id = optional_str(&req.params, "classId")?;
    let name = required_str(&req.params, "name")?;
    let class_id = engine(state)?.upsert_class(id, name)?;
    Ok(json!({ "classId": class_id }))
}

fn set_curriculum(state: &AppState, req: &Request) -> HandlerResult {
    let class_id = required_str(&req.params, "classId")?;
    let year_id = required_str(&req.params, "academicYearId")?;
    let subjects: Vec<SubjectInput> = req
        .params
        .get("subjects")
        .cloned()
        .ok_or_else(|| HandlerErr::bad_params("missing subjects"))
        .and_then(|v| {
            serde_json::from_value(v)
                .map_err(|e| HandlerErr::bad_params(format!("invalid subjects: {e}")))
        })?;
    let outcome = engine(state)?.set_curriculum(class_id, year_id, &subjects)?;
    to_json(&outcome)
}

fn enroll(state: &AppState, req: &Request) -> HandlerResult {
    let student_id = required_str(&req.params, "studentId")?;
    let class_id = required_str(&req.params, "classId")?;
    let year_id = required_str(&req.params, "academicYearId")?;
    let outcome = engine(state)?.enroll(student_id, class_id, year_id)?;
    to_json(&outcome)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.upsert" => upsert_class(state, req),
        "curriculum.set" => set_curriculum(state, req),
        "roster.enroll" => enroll(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
