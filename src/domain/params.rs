//! Named charge point parameters
//!
//! Every tunable of the simulated charge point is a named string parameter
//! with a default, read through a get-with-default accessor. Parameters are
//! persisted verbatim and may be changed at runtime.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::domain::OcppVersion;

pub mod keys {
    pub const MIN_PAUSE: &str = "minPause";
    pub const MAX_PAUSE: &str = "maxPause";
    pub const MIN_ENERGY: &str = "minEnergy";
    pub const MAX_ENERGY: &str = "maxEnergy";
    pub const MIN_POWER: &str = "minPower";
    pub const MAX_POWER: &str = "maxPower";
    pub const START_IDLE_TIME: &str = "startIdleTime";
    pub const END_IDLE_TIME: &str = "endIdleTime";
    pub const MODEL: &str = "model";
    pub const VENDOR: &str = "vendor";
    pub const OCPP_VERSION: &str = "ocppVersion";
    pub const HEARTBEAT: &str = "heartbeat";
}

/// Factory defaults, applied underneath any persisted overrides.
pub fn default_params() -> HashMap<String, String> {
    let defaults = [
        (keys::MIN_PAUSE, "23"),
        (keys::MAX_PAUSE, "44"),
        (keys::MIN_ENERGY, "26"),
        (keys::MAX_ENERGY, "68"),
        (keys::MIN_POWER, "11"),
        (keys::MAX_POWER, "22"),
        (keys::START_IDLE_TIME, "01:10"),
        (keys::END_IDLE_TIME, "04:09"),
        (keys::MODEL, "HOMEADVANCED"),
        (keys::VENDOR, "eNovates"),
        (keys::OCPP_VERSION, "ocpp1.5"),
        (keys::HEARTBEAT, "90"),
    ];
    defaults
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub struct Params {
    values: RwLock<HashMap<String, String>>,
}

impl Params {
    /// Defaults overlaid with persisted values.
    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        let mut values = default_params();
        values.extend(overrides);
        Self {
            values: RwLock::new(values),
        }
    }

    pub fn get(&self, key: &str, default: &str) -> String {
        self.values
            .read()
            .expect("params lock poisoned")
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    pub fn set(&self, key: &str, value: impl Into<String>) {
        self.values
            .write()
            .expect("params lock poisoned")
            .insert(key.to_string(), value.into());
    }

    /// Numeric read; unparseable values fall back to `default`.
    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        self.get(key, "").trim().parse().unwrap_or(default)
    }

    pub fn get_u64(&self, key: &str, default: u64) -> u64 {
        self.get(key, "").trim().parse().unwrap_or(default)
    }

    pub fn ocpp_version(&self) -> Result<OcppVersion, String> {
        let tag = self.get(keys::OCPP_VERSION, OcppVersion::V15.as_tag());
        OcppVersion::from_tag(&tag).ok_or(tag)
    }

    pub fn snapshot(&self) -> HashMap<String, String> {
        self.values.read().expect("params lock poisoned").clone()
    }
}

impl Default for Params {
    fn default() -> Self {
        Self::with_overrides(HashMap::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_present() {
        let params = Params::default();
        assert_eq!(params.get(keys::MODEL, ""), "HOMEADVANCED");
        assert_eq!(params.get(keys::HEARTBEAT, ""), "90");
        assert_eq!(params.get("unknown", "fallback"), "fallback");
    }

    #[test]
    fn overrides_win_over_defaults() {
        let mut overrides = HashMap::new();
        overrides.insert(keys::MIN_PAUSE.to_string(), "5".to_string());
        let params = Params::with_overrides(overrides);
        assert_eq!(params.get_f64(keys::MIN_PAUSE, 0.0), 5.0);
        assert_eq!(params.get_f64(keys::MAX_PAUSE, 0.0), 44.0);
    }

    #[test]
    fn numeric_read_falls_back_on_garbage() {
        let params = Params::default();
        params.set(keys::HEARTBEAT, "ninety");
        assert_eq!(params.get_u64(keys::HEARTBEAT, 90), 90);
    }

    #[test]
    fn version_reports_unsupported_tag() {
        let params = Params::default();
        assert_eq!(params.ocpp_version().unwrap(), OcppVersion::V15);
        params.set(keys::OCPP_VERSION, "ocpp2.0.1");
        assert_eq!(params.ocpp_version().unwrap_err(), "ocpp2.0.1");
    }

    #[test]
    fn set_then_get_roundtrips() {
        let params = Params::default();
        params.set(keys::VENDOR, "ACME");
        assert_eq!(params.get(keys::VENDOR, ""), "ACME");
        assert_eq!(params.snapshot().get(keys::VENDOR).unwrap(), "ACME");
    }
}
