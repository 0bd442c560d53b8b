//! Charge point status and protocol version types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Operational status reported via StatusNotification.
///
/// Which subset is sent depends on the negotiated protocol version: ocpp1.5
/// collapses the Preparing/Charging phases into `Occupied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargePointStatus {
    Available,
    Preparing,
    Occupied,
    Charging,
    Finishing,
    Unavailable,
}

impl ChargePointStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "Available",
            Self::Preparing => "Preparing",
            Self::Occupied => "Occupied",
            Self::Charging => "Charging",
            Self::Finishing => "Finishing",
            Self::Unavailable => "Unavailable",
        }
    }
}

impl fmt::Display for ChargePointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol versions the simulator can negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcppVersion {
    V15,
    V16,
}

impl OcppVersion {
    /// Parse the `ocppVersion` parameter / WebSocket subprotocol tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ocpp1.5" => Some(Self::V15),
            "ocpp1.6" => Some(Self::V16),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::V15 => "ocpp1.5",
            Self::V16 => "ocpp1.6",
        }
    }
}

/// A session is invalid until the backend has authorized it and assigned a
/// transaction id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Invalid,
    Accepted,
}
