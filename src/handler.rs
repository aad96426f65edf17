//! The response contract of a deployed function.
//!
//! A user handler may return a full response, a bare body or a bare status
//! code, and its module may export a plain value instead of a function. The
//! shim deployed alongside the user code normalises all of these into a
//! single [`HandlerResponse`].

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a user handler returned.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerReturn {
    /// A status code and a body.
    Structured {
        /// HTTP status code.
        status_code: u16,
        /// Response body.
        body: Value,
    },
    /// A body only; the status defaults to 200.
    RawBody(Value),
    /// A status code only; the body is empty.
    StatusCode(u16),
}

/// The normalised response returned to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerResponse {
    /// HTTP status code.
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// Serialized body.
    pub body: String,
}

/// What a user code module exports as its handler.
pub enum HandlerExport<F> {
    /// A callable handler.
    Callable(F),
    /// A plain value, treated as a handler that always returns it.
    Value(Value),
}

impl HandlerReturn {
    /// Classifies a raw return value.
    ///
    /// An object whose `statusCode` is an integer that fits a status code is
    /// structured, such an integer on its own is a bare status, and anything
    /// else is a body.
    #[must_use]
    pub fn classify(value: Value) -> Self {
        match value {
            Value::Object(mut map) => match map.get("statusCode").and_then(status_code) {
                Some(status_code) => {
                    let body = map.remove("body").unwrap_or(Value::Null);
                    Self::Structured { status_code, body }
                }
                None => Self::RawBody(Value::Object(map)),
            },
            other => match status_code(&other) {
                Some(status_code) => Self::StatusCode(status_code),
                None => Self::RawBody(other),
            },
        }
    }

    /// Normalises the return value into a response.
    #[must_use]
    pub fn into_response(self) -> HandlerResponse {
        match self {
            Self::Structured { status_code, body } => HandlerResponse {
                status_code,
                body: body_string(body),
            },
            Self::RawBody(body) => HandlerResponse {
                status_code: 200,
                body: body_string(body),
            },
            Self::StatusCode(status_code) => HandlerResponse {
                status_code,
                body: String::new(),
            },
        }
    }
}

/// Reads a value as a status code if it is an integer that fits one.
fn status_code(value: &Value) -> Option<u16> {
    value.as_u64().and_then(|v| u16::try_from(v).ok())
}

impl From<Value> for HandlerReturn {
    fn from(value: Value) -> Self {
        Self::classify(value)
    }
}

impl<F> HandlerExport<F>
where
    F: Fn(&Value) -> Value,
{
    /// Invokes the export with an event and normalises the result.
    pub fn invoke(&self, event: &Value) -> HandlerResponse {
        let returned = match self {
            Self::Callable(handler) => handler(event),
            Self::Value(value) => value.clone(),
        };
        HandlerReturn::from(returned).into_response()
    }
}

/// Strings are passed through; other bodies are JSON encoded; null is empty.
fn body_string(body: Value) -> String {
    match body {
        Value::Null => String::new(),
        Value::String(s) => s,
        other => other.to_string(),
    }
}
