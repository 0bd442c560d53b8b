//! Registry of live charge points
//!
//! Explicit create-or-fetch / remove-and-destroy lifecycle; nothing here is
//! process-global. Each charge point is created from its persisted state (or
//! defaults) and destroyed when removed.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::config::BackendConfig;
use crate::error::SimulatorError;
use crate::notifications::EventBus;
use crate::persistence::{ChargePointStore, PersistedChargePoint};

use super::ChargePoint;

pub struct ChargePointRegistry {
    charge_points: DashMap<String, Arc<ChargePoint>>,
    backend: BackendConfig,
    events: EventBus,
    store: Arc<dyn ChargePointStore>,
}

impl ChargePointRegistry {
    pub fn new(backend: BackendConfig, events: EventBus, store: Arc<dyn ChargePointStore>) -> Self {
        Self {
            charge_points: DashMap::new(),
            backend,
            events,
            store,
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Fetch a live charge point, or build one from persisted state
    /// (defaults when the serial was never saved).
    pub async fn get_or_create(&self, serial: &str) -> Result<Arc<ChargePoint>, SimulatorError> {
        if let Some(existing) = self.charge_points.get(serial) {
            return Ok(existing.clone());
        }

        let state = self
            .store
            .load(serial)
            .await?
            .unwrap_or_else(|| PersistedChargePoint::empty(serial));
        let cp = ChargePoint::new(
            state,
            self.backend.clone(),
            self.events.clone(),
            self.store.clone(),
        );
        info!(serial, "charge point registered");
        self.charge_points.insert(serial.to_string(), cp.clone());
        Ok(cp)
    }

    pub fn get(&self, serial: &str) -> Option<Arc<ChargePoint>> {
        self.charge_points.get(serial).map(|cp| cp.clone())
    }

    pub fn serials(&self) -> Vec<String> {
        self.charge_points.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.charge_points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charge_points.is_empty()
    }

    /// Destroy a charge point and delete its persisted state.
    pub async fn remove(&self, serial: &str) -> Result<(), SimulatorError> {
        if let Some((_, cp)) = self.charge_points.remove(serial) {
            cp.destroy();
            info!(serial, "charge point removed");
        }
        self.store.remove(serial).await?;
        Ok(())
    }

    /// Save and destroy every charge point. Used on shutdown.
    pub async fn shutdown_all(&self) {
        let serials = self.serials();
        for serial in serials {
            if let Some((_, cp)) = self.charge_points.remove(&serial) {
                if let Err(e) = cp.save().await {
                    tracing::warn!(serial = %serial, "final save failed: {e}");
                }
                cp.destroy();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::backend_config;
    use super::*;
    use crate::persistence::MemoryStore;

    fn registry_with_store() -> (ChargePointRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            ChargePointRegistry::new(backend_config(), EventBus::new(), store.clone()),
            store,
        )
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let (registry, _store) = registry_with_store();
        let a = registry.get_or_create("CP001").await.unwrap();
        let b = registry.get_or_create("CP001").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn create_restores_persisted_state() {
        let (registry, store) = registry_with_store();
        let mut state = PersistedChargePoint::empty("CP002");
        state.uids = vec!["AA11".into()];
        state.meter_value = 9000;
        store.save(&state, &[]).await.unwrap();

        let cp = registry.get_or_create("CP002").await.unwrap();
        assert_eq!(cp.meter_value(), 9000);
        assert_eq!(cp.uids(), vec!["AA11".to_string()]);
    }

    #[tokio::test]
    async fn remove_destroys_and_forgets() {
        let (registry, store) = registry_with_store();
        let cp = registry.get_or_create("CP003").await.unwrap();
        cp.save().await.unwrap();
        assert!(store.load("CP003").await.unwrap().is_some());

        registry.remove("CP003").await.unwrap();
        assert!(registry.get("CP003").is_none());
        assert!(store.load("CP003").await.unwrap().is_none());
        assert!(registry.is_empty());
    }
}
