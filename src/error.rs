use serde_json::{json, Value};
use thiserror::Error;

/// Failures surfaced by engine operations. Every variant maps onto a stable
/// wire code so the sidecar can pass it through unchanged.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<Value>,
    },
    #[error("{message}")]
    NotFound {
        message: String,
        details: Option<Value>,
    },
    #[error("rank batch already running for {scope}")]
    Concurrency { scope: String },
    #[error("storage failure: {0}")]
    Storage(#[from] rusqlite::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn validation_with(message: impl Into<String>, details: Value) -> Self {
        Self::Validation {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn not_found(message: impl Into<String>, details: Value) -> Self {
        Self::NotFound {
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Concurrency { .. } => "concurrency_error",
            Self::Storage(_) => "storage_error",
        }
    }

    pub fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { details, .. } | Self::NotFound { details, .. } => details.clone(),
            Self::Concurrency { scope } => Some(json!({ "scope": scope })),
            Self::Storage(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(EngineError::validation("x").code(), "validation_error");
        assert_eq!(
            EngineError::not_found("x", json!({})).code(),
            "not_found"
        );
        let busy = EngineError::Concurrency {
            scope: "subject:c1/y1/t1/s1/math".into(),
        };
        assert_eq!(busy.code(), "concurrency_error");
        assert_eq!(
            busy.details(),
            Some(json!({ "scope": "subject:c1/y1/t1/s1/math" }))
        );
    }
}
