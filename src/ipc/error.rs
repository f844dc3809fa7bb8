use serde_json::json;

use crate::error::ServiceError;

/// Successful handler outcome: HTTP-like status plus the `result` object.
#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub result: serde_json::Value,
}

impl Reply {
    /// `payload` must be a JSON object (or null); its fields sit next to `message`.
    pub fn ok(message: &str, payload: serde_json::Value) -> Self {
        Self::with_status(200, message, payload)
    }

    pub fn created(message: &str, payload: serde_json::Value) -> Self {
        Self::with_status(201, message, payload)
    }

    fn with_status(status: u16, message: &str, payload: serde_json::Value) -> Self {
        let mut result = json!({ "message": message });
        if let serde_json::Value::Object(fields) = payload {
            for (k, v) in fields {
                result[k.as_str()] = v;
            }
        }
        Self { status, result }
    }

    /// Marks the message as meant for display to the user.
    pub fn shown(mut self) -> Self {
        self.result["showMessage"] = json!(true);
        self
    }
}

pub fn ok(id: &str, reply: Reply) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "status": reply.status,
        "result": reply.result
    })
}

pub fn err(
    id: &str,
    status: u16,
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
        "status": status,
        "error": error,
    })
}

pub fn service_err(id: &str, e: &ServiceError) -> serde_json::Value {
    if e.status() >= 500 {
        tracing::error!(request_id = id, code = e.code(), error = ?e, "request failed");
    } else {
        tracing::warn!(request_id = id, code = e.code(), error = %e, "request rejected");
    }
    err(id, e.status(), e.code(), e.to_string(), e.details().cloned())
}

pub fn respond(id: &str, outcome: Result<Reply, ServiceError>) -> serde_json::Value {
    match outcome {
        Ok(reply) => ok(id, reply),
        Err(e) => service_err(id, &e),
    }
}
