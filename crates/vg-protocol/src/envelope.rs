//! Response envelope adapter
//!
//! Node and orchestrator APIs answer in several shapes:
//!
//! - `{"code": 0|200, "message": "...", "data": ...}`
//! - `{"success": true, "data": ...}`
//! - `{"data": ..., "errors": ...}` (hypervisor node API)
//! - a bare JSON value
//!
//! Lists additionally come back as a bare array, `{"list": [...], "total": n}`,
//! `{"items": [...]}` or wrapped in any of the envelopes above. Everything is
//! normalised here so callers only ever see `Result<T, ProtocolError>`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ProtocolError;

/// Canonical envelope emitted by the vmgate HTTP API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiEnvelope<T> {
    /// HTTP status number of the response
    pub code: u16,
    /// Human readable outcome
    pub message: String,
    /// Payload, `null` on error
    pub data: Option<T>,
}

impl<T> ApiEnvelope<T> {
    /// Successful response carrying `data`
    pub fn ok(data: T) -> Self {
        Self {
            code: 200,
            message: "success".to_string(),
            data: Some(data),
        }
    }

    /// Failed response with no payload
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Whether the code denotes success
    pub fn is_success(&self) -> bool {
        is_success_code(self.code as i64)
    }
}

/// One page of a list endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListPage<T> {
    /// Total number of matching records (may exceed `list.len()`)
    pub total: u64,
    /// Records on this page
    pub list: Vec<T>,
}

impl<T> ListPage<T> {
    /// Build a page whose total equals its length
    pub fn from_vec(list: Vec<T>) -> Self {
        Self {
            total: list.len() as u64,
            list,
        }
    }
}

impl<T> Default for ListPage<T> {
    fn default() -> Self {
        Self {
            total: 0,
            list: Vec::new(),
        }
    }
}

fn is_success_code(code: i64) -> bool {
    code == 0 || code == 200
}

fn is_success_status(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Best-effort human message from a failure body
fn failure_message(obj: &Map<String, Value>) -> Option<String> {
    for key in ["message", "msg", "error"] {
        if let Some(Value::String(s)) = obj.get(key) {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    match obj.get("errors") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Object(fields)) if !fields.is_empty() => Some(
            fields
                .iter()
                .map(|(k, v)| match v {
                    Value::String(s) => format!("{}: {}", k, s.trim_end()),
                    other => format!("{}: {}", k, other),
                })
                .collect::<Vec<_>>()
                .join("; "),
        ),
        _ => None,
    }
}

/// Strip whichever envelope wraps `body` and return the payload as JSON
///
/// `status` is the HTTP status of the response. A non-2xx status is always a
/// failure, whatever the body says.
pub fn unwrap_envelope(status: u16, body: &[u8]) -> Result<Value, ProtocolError> {
    let trimmed = body.iter().all(|b| b.is_ascii_whitespace());
    let value: Value = if trimmed {
        Value::Null
    } else {
        match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) if is_success_status(status) => return Err(ProtocolError::Json(e)),
            Err(_) => {
                return Err(ProtocolError::Remote {
                    code: status,
                    message: String::from_utf8_lossy(body).trim().to_string(),
                })
            }
        }
    };

    if !is_success_status(status) {
        let message = match &value {
            Value::Object(obj) => failure_message(obj),
            Value::String(s) => Some(s.clone()),
            _ => None,
        };
        return Err(ProtocolError::Remote {
            code: status,
            message: message.unwrap_or_else(|| format!("HTTP {}", status)),
        });
    }

    let Value::Object(mut obj) = value else {
        return Ok(value);
    };

    if let Some(success) = obj.get("success").and_then(Value::as_bool) {
        if success {
            return Ok(obj.remove("data").unwrap_or(Value::Null));
        }
        let code = obj
            .get("code")
            .and_then(Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .filter(|c| !is_success_code(*c as i64))
            .unwrap_or(500);
        return Err(ProtocolError::Remote {
            code,
            message: failure_message(&obj).unwrap_or_else(|| "request failed".to_string()),
        });
    }

    if let Some(code) = obj.get("code").and_then(Value::as_i64) {
        if is_success_code(code) {
            return Ok(obj.remove("data").unwrap_or(Value::Null));
        }
        return Err(ProtocolError::Remote {
            code: u16::try_from(code).unwrap_or(500),
            message: failure_message(&obj).unwrap_or_else(|| format!("error code {}", code)),
        });
    }

    if obj.contains_key("data") {
        if let Some(errors) = obj.get("errors") {
            if !errors.is_null() {
                return Err(ProtocolError::Remote {
                    code: 400,
                    message: failure_message(&obj).unwrap_or_else(|| errors.to_string()),
                });
            }
        }
        return Ok(obj.remove("data").unwrap_or(Value::Null));
    }

    Ok(Value::Object(obj))
}

/// Parse a response body into `T` regardless of envelope convention
pub fn parse_response<T: DeserializeOwned>(status: u16, body: &[u8]) -> Result<T, ProtocolError> {
    let payload = unwrap_envelope(status, body)?;
    Ok(serde_json::from_value(payload)?)
}

/// Parse a list response into a [`ListPage`] regardless of envelope or list shape
pub fn parse_list_response<T: DeserializeOwned>(
    status: u16,
    body: &[u8],
) -> Result<ListPage<T>, ProtocolError> {
    let payload = unwrap_envelope(status, body)?;
    list_from_value(payload)
}

fn list_from_value<T: DeserializeOwned>(payload: Value) -> Result<ListPage<T>, ProtocolError> {
    match payload {
        Value::Null => Ok(ListPage::default()),
        Value::Array(items) => {
            let list: Vec<T> = items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<_, _>>()?;
            Ok(ListPage::from_vec(list))
        }
        Value::Object(mut obj) => {
            let items = ["list", "items", "data"]
                .iter()
                .find_map(|key| match obj.remove(*key) {
                    Some(Value::Array(items)) => Some(items),
                    _ => None,
                })
                .ok_or_else(|| {
                    ProtocolError::Envelope("object payload carries no list".to_string())
                })?;
            let total = obj.get("total").and_then(Value::as_u64);
            let list: Vec<T> = items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<_, _>>()?;
            Ok(ListPage {
                total: total.unwrap_or(list.len() as u64),
                list,
            })
        }
        other => Err(ProtocolError::Envelope(format!(
            "expected a list, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
