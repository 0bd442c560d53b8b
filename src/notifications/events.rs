//! Notices emitted towards the presentation layer
//!
//! The core never talks to a UI directly; it publishes fire-and-forget
//! notices on the event bus. Per charge point, subscribers observe notices
//! in emission order.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::domain::SessionSnapshot;

/// Phases of a persistence round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SavePhase {
    Saving,
    Saved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Notice {
    /// Informational progress message.
    Message(String),
    /// Something completed as intended.
    Success(String),
    /// A failure the user should see.
    Err(String),
    /// Chatter that a UI may hide by default.
    Unimportant(String),
    /// The active session changed; `None` means it ended.
    Session(Option<SessionSnapshot>),
    Save(SavePhase),
    /// A heartbeat was sent; carries the resend interval in seconds, if any.
    Heartbeat { resend_after: Option<u64> },
}

impl Notice {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message(text.into())
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::Success(text.into())
    }

    pub fn err(text: impl Into<String>) -> Self {
        Self::Err(text.into())
    }

    pub fn unimportant(text: impl Into<String>) -> Self {
        Self::Unimportant(text.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Success(_) => "success",
            Self::Err(_) => "err",
            Self::Unimportant(_) => "unimportant",
            Self::Session(_) => "session",
            Self::Save(_) => "save",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    /// Whether this notice goes into the durable message log.
    pub fn is_logged(&self) -> bool {
        matches!(
            self,
            Self::Message(_) | Self::Success(_) | Self::Err(_) | Self::Unimportant(_) | Self::Session(_)
        )
    }

    /// Rendering used for the durable message log.
    pub fn log_text(&self) -> String {
        match self {
            Self::Message(text) | Self::Success(text) | Self::Err(text) | Self::Unimportant(text) => {
                text.clone()
            }
            Self::Session(Some(snapshot)) => {
                serde_json::to_string(snapshot).unwrap_or_else(|_| "{}".to_string())
            }
            Self::Session(None) => "{}".to_string(),
            Self::Save(_) | Self::Heartbeat { .. } => String::new(),
        }
    }
}

/// A notice tagged with its charge point and publish time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoticeEvent {
    pub serial: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    #[serde(flatten)]
    pub notice: Notice,
}

impl NoticeEvent {
    pub fn new(serial: impl Into<String>, notice: Notice) -> Self {
        Self {
            serial: serial.into(),
            timestamp: Utc::now().timestamp_millis(),
            notice,
        }
    }
}

/// One durable log line, drained to the store on save.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub timestamp: i64,
}

impl LogEntry {
    pub fn from_notice(notice: &Notice) -> Self {
        Self {
            kind: notice.kind().to_string(),
            message: notice.log_text(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}
