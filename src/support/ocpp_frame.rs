//! OCPP-J message framing
//!
//! Every OCPP-J WebSocket message is a JSON array whose first element tells
//! the kind of frame:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::{json, Value};
use thiserror::Error;

const CALL: u64 = 2;
const CALL_RESULT: u64 = 3;
const CALL_ERROR: u64 = 4;

/// A decoded OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    CallResult {
        unique_id: String,
        payload: Value,
    },
    CallError {
        unique_id: String,
        error_code: String,
        description: String,
        details: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("Frame is not a non-empty JSON array")]
    NotAnArray,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("Frame type {kind} needs {expected} elements, got {got}")]
    TooShort {
        kind: u64,
        expected: usize,
        got: usize,
    },
    #[error("Field {0} has the wrong type")]
    FieldType(&'static str),
}

impl Frame {
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| FrameError::InvalidJson(e.to_string()))?;
        let items = match value {
            Value::Array(items) if !items.is_empty() => items,
            _ => return Err(FrameError::NotAnArray),
        };

        let kind = items[0].as_u64().ok_or(FrameError::FieldType("messageTypeId"))?;
        let expected = match kind {
            CALL => 4,
            CALL_RESULT => 3,
            CALL_ERROR => 4,
            other => return Err(FrameError::UnknownMessageType(other)),
        };
        if items.len() < expected {
            return Err(FrameError::TooShort {
                kind,
                expected,
                got: items.len(),
            });
        }

        let unique_id = items[1]
            .as_str()
            .ok_or(FrameError::FieldType("uniqueId"))?
            .to_string();

        let frame = match kind {
            CALL => Self::Call {
                unique_id,
                action: items[2]
                    .as_str()
                    .ok_or(FrameError::FieldType("action"))?
                    .to_string(),
                payload: items[3].clone(),
            },
            CALL_RESULT => Self::CallResult {
                unique_id,
                payload: items[2].clone(),
            },
            _ => Self::CallError {
                unique_id,
                error_code: items[2].as_str().unwrap_or("InternalError").to_string(),
                description: items[3].as_str().unwrap_or_default().to_string(),
                details: items.get(4).cloned().unwrap_or_else(|| json!({})),
            },
        };
        Ok(frame)
    }

    pub fn to_text(&self) -> String {
        let value = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => json!([CALL, unique_id, action, payload]),
            Self::CallResult { unique_id, payload } => json!([CALL_RESULT, unique_id, payload]),
            Self::CallError {
                unique_id,
                error_code,
                description,
                details,
            } => json!([CALL_ERROR, unique_id, error_code, description, details]),
        };
        value.to_string()
    }

    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }

    pub fn error(
        unique_id: impl Into<String>,
        error_code: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.into(),
            description: description.into(),
            details: json!({}),
        }
    }
}
