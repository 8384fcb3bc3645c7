use serde_json::json;

use crate::error::DashboardError;

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

pub fn dashboard_err(id: &str, e: &DashboardError) -> serde_json::Value {
    tracing::warn!(code = e.code(), error = %e, "request failed");
    err(id, e.code(), e.to_string(), None)
}
