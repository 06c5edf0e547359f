use serde_json::json;

use crate::error::LessonError;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

/// Error envelope for a core failure; stage failures carry `details.stage`.
pub fn lesson_err(id: &str, e: &LessonError) -> serde_json::Value {
    let details = e.stage().map(|s| json!({ "stage": s }));
    err(id, e.code(), e.to_string(), details)
}

pub fn event(name: &str, payload: serde_json::Value) -> serde_json::Value {
    json!({
        "event": name,
        "payload": payload,
    })
}
