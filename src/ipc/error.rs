use crate::store::StorageError;
use serde::Serialize;
use serde_json::json;

/// Failures with a stable wire code.
pub trait ErrorCode: std::fmt::Display {
    fn code(&self) -> &'static str;
}

impl ErrorCode for StorageError {
    fn code(&self) -> &'static str {
        StorageError::code(self)
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({ "id": id, "ok": true, "result": result })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let body = ErrorBody {
        code,
        message: message.into(),
        details,
    };
    json!({ "id": id, "ok": false, "error": body })
}

/// Error response for a typed failure; the message is its `Display` text.
pub fn fail(id: &str, e: &impl ErrorCode) -> serde_json::Value {
    err(id, e.code(), e.to_string(), None)
}
