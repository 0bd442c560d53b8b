//! Simulated charging session
//!
//! A session delivers `energy` kWh at a constant `power` kW, so it runs for
//! `energy * 60 / power` minutes. Spent energy is interpolated linearly over
//! elapsed time and capped at the target once the duration has passed. This
//! is the only metering model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ChargePointStatus, SessionStatus};
use crate::support::random;

/// Bounds for sampling a new session, taken from the charge point parameters.
#[derive(Debug, Clone, Copy)]
pub struct SessionBounds {
    pub min_energy: f64,
    pub max_energy: f64,
    pub min_power: f64,
    pub max_power: f64,
}

/// Work to run once the owning session has ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredAction {
    /// Apply an availability change that arrived mid-session, then stop the
    /// auto-charge loop.
    SetAvailability(ChargePointStatus),
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub uid: String,
    /// Target energy in kWh.
    pub energy: f64,
    /// Charging power in kW.
    pub power: f64,
    pub start: DateTime<Utc>,
    /// Terminal once set; a session is never stopped twice.
    pub stop: Option<DateTime<Utc>>,
    /// Transaction id assigned by the central system.
    pub tx_id: Option<i64>,
    pub status: SessionStatus,
    pub connector_id: u32,
    /// Whether charging was started (and the loop continuation registered).
    pub started: bool,
    pub deferred: Vec<DeferredAction>,
}

impl Session {
    /// New session with energy and power sampled inside `bounds`.
    pub fn sample(uid: impl Into<String>, bounds: &SessionBounds) -> Self {
        Self::with_profile(
            uid,
            random::in_range(bounds.min_energy, bounds.max_energy),
            random::in_range(bounds.min_power, bounds.max_power),
            Utc::now(),
        )
    }

    /// New session with a fixed energy/power profile.
    pub fn with_profile(
        uid: impl Into<String>,
        energy: f64,
        power: f64,
        start: DateTime<Utc>,
    ) -> Self {
        Self {
            id: random::short_id("sess"),
            uid: uid.into(),
            energy,
            power,
            start,
            stop: None,
            tx_id: None,
            status: SessionStatus::Invalid,
            connector_id: 1,
            started: false,
            deferred: Vec::new(),
        }
    }

    /// Planned duration in minutes.
    pub fn duration_min(&self) -> f64 {
        self.energy * 60.0 / self.power
    }

    /// Whole minutes since the session started.
    pub fn elapsed_min(&self) -> i64 {
        (Utc::now() - self.start).num_minutes()
    }

    /// Energy delivered after `elapsed` minutes, capped at the target.
    pub fn energy_spent_after(&self, elapsed: f64) -> f64 {
        let duration = self.duration_min();
        if elapsed >= duration {
            return self.energy;
        }
        self.energy / duration * elapsed
    }

    /// Energy delivered so far.
    pub fn energy_spent(&self) -> f64 {
        self.energy_spent_after(self.elapsed_min() as f64)
    }

    pub fn is_active(&self) -> bool {
        self.stop.is_none()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            uid: self.uid.clone(),
            tx_id: self.tx_id,
            connector_id: self.connector_id,
            energy: self.energy,
            power: self.power,
            start: self.start,
            stop: self.stop,
            status: self.status,
            duration: self.duration_min(),
            elapsed: self.elapsed_min(),
            energy_spent: self.energy_spent(),
        }
    }

    /// Rebuild a session from its persisted snapshot.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Self {
        Self {
            id: snapshot.id,
            uid: snapshot.uid,
            energy: snapshot.energy,
            power: snapshot.power,
            start: snapshot.start,
            stop: snapshot.stop,
            tx_id: snapshot.tx_id,
            status: snapshot.status,
            connector_id: snapshot.connector_id,
            started: false,
            deferred: Vec::new(),
        }
    }
}

/// Read model of a session, also the persisted shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub id: String,
    pub uid: String,
    pub tx_id: Option<i64>,
    #[serde(default = "default_connector_id")]
    pub connector_id: u32,
    pub energy: f64,
    pub power: f64,
    pub start: DateTime<Utc>,
    #[serde(default)]
    pub stop: Option<DateTime<Utc>>,
    #[serde(default = "default_session_status")]
    pub status: SessionStatus,
    pub duration: f64,
    pub elapsed: i64,
    pub energy_spent: f64,
}

fn default_connector_id() -> u32 {
    1
}

fn default_session_status() -> SessionStatus {
    SessionStatus::Invalid
}
