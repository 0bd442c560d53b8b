//! Error taxonomy for the simulator
//!
//! Transport and protocol failures are recoverable and reported through the
//! notice channel; precondition violations (`NotAccepted`, `AlreadyStopped`,
//! `LoopActive`, ...) indicate a caller bug and are never retried.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::persistence::StoreError;
use crate::support::FrameError;

/// Why an outbound call did not produce a success payload.
#[derive(Debug, Clone, Error)]
pub enum CallFailure {
    /// The central system answered with a CallError frame.
    #[error("{code}: \"{description}\"")]
    Fault {
        code: String,
        description: String,
        details: Value,
    },

    /// The frame could not be handed to the transport.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The charge point was torn down before a reply arrived.
    #[error("call abandoned before a reply arrived")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("connection with the backend has not yet been established")]
    NotConnected,

    #[error("charge point has not yet been accepted by the backend")]
    NotAccepted,

    #[error("session {id} has already stopped at {stopped_at}; can't stop it again")]
    AlreadyStopped {
        id: String,
        stopped_at: DateTime<Utc>,
    },

    #[error("no session with id {0}")]
    SessionNotFound(String),

    #[error("no driver UIDs added to start charging")]
    NoDriverUids,

    #[error("the UID {0} isn't assigned to this charge point")]
    UnknownUid(String),

    #[error("auto-charging loop is already active")]
    LoopActive,

    #[error("unsupported OCPP version {0}")]
    UnsupportedVersion(String),

    #[error("connection attempt aborted by manual close")]
    ConnectAborted,

    #[error("invalid handshake header value: {0}")]
    InvalidHeader(String),

    #[error(transparent)]
    Call(#[from] CallFailure),

    #[error("websocket error: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid shared secret: {0}")]
    AuthKey(#[from] hex::FromHexError),
}
