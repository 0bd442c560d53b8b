//! OCPP-J message framing
//!
//! The OCPP-J transport envelope is a JSON array and is identical across
//! protocol versions:
//!
//! - **Call**       `[2, "<uniqueId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<uniqueId>", {<payload>}]`
//! - **CallError**  `[4, "<uniqueId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::Value;
use thiserror::Error;

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

/// A parsed OCPP-J frame.
#[derive(Debug, Clone)]
pub enum Frame {
    /// `[2, uniqueId, action, payload]`
    Call {
        unique_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, uniqueId, payload]`
    CallResult { unique_id: String, payload: Value },
    /// `[4, uniqueId, errorCode, errorDescription, errorDetails]`
    CallError {
        unique_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

/// Errors raised while parsing an OCPP-J frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("frame is not a JSON array")]
    NotAnArray,

    #[error("message type is not a number")]
    InvalidMessageType,

    #[error("unknown message type: {0}")]
    UnknownMessageType(u64),

    #[error("expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },

    #[error("field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
}

impl Frame {
    /// Build an outbound request frame.
    pub fn call(unique_id: impl Into<String>, action: impl Into<String>, payload: Value) -> Self {
        Self::Call {
            unique_id: unique_id.into(),
            action: action.into(),
            payload,
        }
    }

    /// Build a success-response frame for a received request.
    pub fn result(unique_id: impl Into<String>, payload: Value) -> Self {
        Self::CallResult {
            unique_id: unique_id.into(),
            payload,
        }
    }

    /// Build an error-response frame for a received request.
    pub fn error(
        unique_id: impl Into<String>,
        error_code: impl Into<String>,
        error_description: impl Into<String>,
        error_details: Value,
    ) -> Self {
        Self::CallError {
            unique_id: unique_id.into(),
            error_code: error_code.into(),
            error_description: error_description.into(),
            error_details,
        }
    }

    /// Parse raw JSON text into a frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_str(text)?;
        let arr = value.as_array().ok_or(FrameError::NotAnArray)?;

        let msg_type = arr
            .first()
            .and_then(Value::as_u64)
            .ok_or(FrameError::InvalidMessageType)?;

        match msg_type {
            MSG_TYPE_CALL => {
                if arr.len() < 4 {
                    return Err(FrameError::MissingFields {
                        expected: 4,
                        got: arr.len(),
                    });
                }
                Ok(Self::Call {
                    unique_id: field_str(&arr[1], "uniqueId must be a string")?,
                    action: field_str(&arr[2], "action must be a string")?,
                    payload: arr[3].clone(),
                })
            }
            MSG_TYPE_CALL_RESULT => {
                if arr.len() < 3 {
                    return Err(FrameError::MissingFields {
                        expected: 3,
                        got: arr.len(),
                    });
                }
                Ok(Self::CallResult {
                    unique_id: field_str(&arr[1], "uniqueId must be a string")?,
                    payload: arr[2].clone(),
                })
            }
            MSG_TYPE_CALL_ERROR => {
                if arr.len() < 4 {
                    return Err(FrameError::MissingFields {
                        expected: 4,
                        got: arr.len(),
                    });
                }
                Ok(Self::CallError {
                    unique_id: field_str(&arr[1], "uniqueId must be a string")?,
                    error_code: arr[2].as_str().unwrap_or("InternalError").to_string(),
                    error_description: arr
                        .get(3)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    error_details: arr
                        .get(4)
                        .cloned()
                        .unwrap_or(Value::Object(Default::default())),
                })
            }
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }

    /// Serialize this frame to JSON text.
    pub fn serialize(&self) -> String {
        let arr = match self {
            Self::Call {
                unique_id,
                action,
                payload,
            } => Value::Array(vec![
                MSG_TYPE_CALL.into(),
                unique_id.clone().into(),
                action.clone().into(),
                payload.clone(),
            ]),
            Self::CallResult { unique_id, payload } => Value::Array(vec![
                MSG_TYPE_CALL_RESULT.into(),
                unique_id.clone().into(),
                payload.clone(),
            ]),
            Self::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                MSG_TYPE_CALL_ERROR.into(),
                unique_id.clone().into(),
                error_code.clone().into(),
                error_description.clone().into(),
                error_details.clone(),
            ]),
        };

        // serde_json::to_string on a Value never fails
        serde_json::to_string(&arr).unwrap()
    }

    /// The correlation id shared by all three frame kinds.
    pub fn unique_id(&self) -> &str {
        match self {
            Self::Call { unique_id, .. }
            | Self::CallResult { unique_id, .. }
            | Self::CallError { unique_id, .. } => unique_id,
        }
    }
}

fn field_str(value: &Value, context: &'static str) -> Result<String, FrameError> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or(FrameError::FieldTypeMismatch(context))
}
