use crate::error::EngineError;
use serde::Serialize;
use serde_json::json;
use tracing::warn;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

/// Success envelope around any serializable result struct.
pub fn ok_value<T: Serialize>(id: &str, result: &T) -> serde_json::Value {
    match serde_json::to_value(result) {
        Ok(v) => ok(id, v),
        Err(e) => err(id, "internal", e.to_string(), None),
    }
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

/// The user dismissed a file prompt. Not a failure.
pub fn canceled(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "ok": false,
        "canceled": true,
    })
}

pub fn engine_err(id: &str, e: &EngineError) -> serde_json::Value {
    warn!(code = e.code(), error = %e, "request failed");
    let details = match e {
        EngineError::Validation { field, .. } => Some(json!({ "field": field })),
        _ => None,
    };
    err(id, e.code(), e.to_string(), details)
}

/// File-level failures arrive as `anyhow` errors; engine errors inside keep
/// their own code.
pub fn anyhow_err(id: &str, e: &anyhow::Error) -> serde_json::Value {
    if let Some(engine) = e.downcast_ref::<EngineError>() {
        return engine_err(id, engine);
    }
    let message = format!("{e:#}");
    warn!(error = %message, "request failed");
    err(id, "io_failed", message, None)
}
