//! In-memory store for embedding and tests

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ChargePointStore, PersistedChargePoint, StoreError};
use crate::notifications::LogEntry;

#[derive(Default)]
pub struct MemoryStore {
    states: DashMap<String, PersistedChargePoint>,
    logs: DashMap<String, Vec<LogEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log entries saved so far for a serial.
    pub fn logs_for(&self, serial: &str) -> Vec<LogEntry> {
        self.logs.get(serial).map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChargePointStore for MemoryStore {
    async fn load(&self, serial: &str) -> Result<Option<PersistedChargePoint>, StoreError> {
        Ok(self.states.get(serial).map(|s| s.clone()))
    }

    async fn save(
        &self,
        state: &PersistedChargePoint,
        logs: &[LogEntry],
    ) -> Result<(), StoreError> {
        self.states
            .insert(state.serialno.clone(), state.clone());
        self.logs
            .entry(state.serialno.clone())
            .or_default()
            .extend_from_slice(logs);
        Ok(())
    }

    async fn list_serials(&self) -> Result<Vec<String>, StoreError> {
        let mut serials: Vec<String> = self.states.iter().map(|e| e.key().clone()).collect();
        serials.sort();
        Ok(serials)
    }

    async fn remove(&self, serial: &str) -> Result<(), StoreError> {
        self.states.remove(serial);
        self.logs.remove(serial);
        Ok(())
    }
}
