use crate::ipc::helpers::{engine, required_str, respond, to_json, HandlerResult};
use crate::ipc::types::{AppState, Request};

fn calculate(state: &AppState, req: &Request) -> HandlerResult {
    let p = &req.params;
    let outcome = engine(state)?.calculate_rank(
        required_str(p, "classId")?,
        required_str(p, "academicYearId")?,
        required_str(p, "termId")?,
        required_str(p, "sequenceId")?,
        required_str(p, "subjectId")?,
    )?;
    to_json(&outcome)
}

fn calculate_sequence(state: &AppState, req: &Request) -> HandlerResult {
    let p = &req.params;
    let outcome = engine(state)?.calculate_sequence_rank(
        required_str(p, "classId")?,
        required_str(p, "academicYearId")?,
        required_str(p, "termId")?,
        required_str(p, "sequenceId")?,
    )?;
    to_json(&outcome)
}

fn calculate_term(state: &AppState, req: &Request) -> HandlerResult {
    let p = &req.params;
    let outcome = engine(state)?.calculate_term_rank(
        required_str(p, "classId")?,
        required_str(p, "academicYearId")?,
        required_str(p, "termId")?,
    )?;
    to_json(&outcome)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "rank.calculate" => calculate(state, req),
        "rank.calculateSequence" => calculate_sequence(state, req),
        "rank.calculateTerm" => calculate_term(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
