use crate::absence;
use crate::ipc::helpers::{
    coordinate, engine, required_f64, required_str, respond, to_json, HandlerResult,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn record_mark(state: &AppState, req: &Request) -> HandlerResult {
    let coord = coordinate(&req.params)?;
    let mark = required_f64(&req.params, "mark")?;
    let editor_id = required_str(&req.params, "editorId")?;
    let outcome = engine(state)?.record_mark(&coord, mark, editor_id)?;
    to_json(&outcome)
}

fn record_absence(state: &AppState, req: &Request) -> HandlerResult {
    let student_id = required_str(&req.params, "studentId")?;
    let term_id = required_str(&req.params, "termId")?;
    let sequence_id = required_str(&req.params, "sequenceId")?;
    let count = absence::count_from_mark_value(required_f64(&req.params, "count")?)?;
    let editor_id = required_str(&req.params, "editorId")?;
    let seq = engine(state)?.record_absence(student_id, term_id, sequence_id, count, editor_id)?;
    to_json(&seq)
}

fn absence_history(state: &AppState, req: &Request) -> HandlerResult {
    let student_id = required_str(&req.params, "studentId")?;
    let sequence_id = required_str(&req.params, "sequenceId")?;
    let entries = engine(state)?.absence_history(student_id, sequence_id)?;
    Ok(json!({ "entries": to_json(&entries)? }))
}

fn ledger_history(state: &AppState, req: &Request) -> HandlerResult {
    let coord = coordinate(&req.params)?;
    let entries = engine(state)?.ledger_history(&coord)?;
    Ok(json!({ "entries": to_json(&entries)? }))
}

fn ledger_verify(state: &AppState, req: &Request) -> HandlerResult {
    let coord = coordinate(&req.params)?;
    let verification = engine(state)?.verify_ledger(&coord)?;
    to_json(&verification)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "marks.record" => record_mark(state, req),
        "absences.record" => record_absence(state, req),
        "absences.history" => absence_history(state, req),
        "ledger.history" => ledger_history(state, req),
        "ledger.verify" => ledger_verify(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
