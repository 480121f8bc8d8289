use crate::engine::Engine;
use crate::ipc::helpers::{respond, HandlerErr, HandlerResult};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn health(state: &mut AppState) -> HandlerResult {
    Ok(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
    }))
}

fn workspace_select(state: &mut AppState, req: &Request) -> HandlerResult {
    let Some(path) = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
    else {
        return Err(HandlerErr::bad_params("missing params.path"));
    };

    let engine = Engine::open(&path).map_err(|e| HandlerErr {
        code: "db_open_failed",
        message: format!("{e:?}"),
        details: None,
    })?;
    state.workspace = Some(path.clone());
    state.engine = Some(engine);
    Ok(json!({ "workspacePath": path.to_string_lossy() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "health" => health(state),
        "workspace.select" => workspace_select(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
