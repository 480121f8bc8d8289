use serde::Serialize;
use serde_json::Value;

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

/// Response envelope. `id` is absent only when the request line could not
/// be parsed far enough to read one.
#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody<'a>>,
}

fn to_value(envelope: Envelope<'_>) -> Value {
    serde_json::to_value(envelope).unwrap_or_else(|_| serde_json::json!({ "ok": false }))
}

pub fn ok(id: &str, result: Value) -> Value {
    to_value(Envelope {
        id: Some(id),
        ok: true,
        result: Some(result),
        error: None,
    })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    to_value(Envelope {
        id: Some(id),
        ok: false,
        result: None,
        error: Some(ErrorBody {
            code,
            message: message.into(),
            details,
        }),
    })
}

pub fn bad_json(message: impl Into<String>) -> Value {
    to_value(Envelope {
        id: None,
        ok: false,
        result: None,
        error: Some(ErrorBody {
            code: "bad_json",
            message: message.into(),
            details: None,
        }),
    })
}
