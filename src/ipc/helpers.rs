use crate::engine::Engine;
use crate::error::EngineError;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::model::MarkCoordinate;
use serde_json::Value;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl HandlerErr {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<EngineError> for HandlerErr {
    fn from(e: EngineError) -> Self {
        Self {
            code: e.code(),
            message: e.to_string(),
            details: e.details(),
        }
    }
}

pub type HandlerResult = Result<Value, HandlerErr>;

pub fn respond(req: &Request, result: HandlerResult) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            if e.code == "storage_error" {
                tracing::error!(method = %req.method, message = %e.message, "request failed");
            } else {
                tracing::debug!(method = %req.method, code = e.code, message = %e.message, "request rejected");
            }
            e.response(&req.id)
        }
    }
}

pub fn engine(state: &AppState) -> Result<&Engine, HandlerErr> {
    state.engine.as_ref().ok_or(HandlerErr {
        code: "no_workspace",
        message: "select a workspace first".to_string(),
        details: None,
    })
}

pub fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing/invalid {}", key)))
}

pub fn coordinate(params: &Value) -> Result<MarkCoordinate, HandlerErr> {
    Ok(MarkCoordinate::new(
        required_str(params, "studentId")?,
        required_str(params, "termId")?,
        required_str(params, "sequenceId")?,
        required_str(params, "subjectId")?,
    ))
}

pub fn to_json<T: serde::Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| HandlerErr {
        code: "internal",
        message: e.to_string(),
        details: None,
    })
}
