//! Persistence boundary
//!
//! The core only knows this trait: load last known state by serial number,
//! save state plus drained log entries. Implementations live outside the
//! protocol engine; the crate ships a JSON file store for the binary and an
//! in-memory store for embedding and tests.

pub mod json_store;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::SessionSnapshot;
use crate::notifications::LogEntry;

/// Persisted shape of one charge point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedChargePoint {
    pub serialno: String,
    #[serde(default)]
    pub uids: Vec<String>,
    #[serde(default)]
    pub meter_value: u64,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub sessions: Vec<SessionSnapshot>,
}

impl PersistedChargePoint {
    pub fn empty(serial: impl Into<String>) -> Self {
        Self {
            serialno: serial.into(),
            uids: Vec::new(),
            meter_value: 0,
            params: HashMap::new(),
            sessions: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait ChargePointStore: Send + Sync {
    /// Last known state, or `None` when the serial has never been saved.
    async fn load(&self, serial: &str) -> Result<Option<PersistedChargePoint>, StoreError>;

    /// Persist state and append the drained log entries.
    async fn save(
        &self,
        state: &PersistedChargePoint,
        logs: &[LogEntry],
    ) -> Result<(), StoreError>;

    /// Serial numbers with persisted state.
    async fn list_serials(&self) -> Result<Vec<String>, StoreError>;

    /// Forget everything stored for a serial.
    async fn remove(&self, serial: &str) -> Result<(), StoreError>;
}

pub use json_store::JsonFileStore;
pub use memory::MemoryStore;
