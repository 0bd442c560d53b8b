//! # OCPP Charge Point Simulator
//!
//! Simulates one or more EV charge points speaking OCPP-J over WebSocket to
//! a central system, including the boot/heartbeat handshake, authorization,
//! transactions, status notifications and an auto-charge loop that strings
//! realistic sessions together.
//!
//! ## Architecture
//!
//! - **domain**: statuses, parameters, sessions and typed wire payloads
//! - **chargepoint**: the protocol engine: correlation layer, connection
//!   manager, boot/heartbeat state machine, auto-charge orchestrator,
//!   inbound command handlers and the registry of live charge points
//! - **notifications**: event bus towards the (external) presentation layer
//! - **persistence**: store boundary plus JSON-file and in-memory stores
//! - **support**: OCPP-J framing, sampling helpers, shutdown signal

pub mod chargepoint;
pub mod config;
pub mod domain;
pub mod error;
pub mod notifications;
pub mod persistence;
pub mod support;

pub use chargepoint::{ChargePoint, ChargePointRegistry};
pub use config::{default_config_path, AppConfig, BackendConfig};
pub use error::{CallFailure, SimulatorError};
pub use notifications::{EventBus, Notice, NoticeEvent};
pub use persistence::{ChargePointStore, JsonFileStore, MemoryStore, PersistedChargePoint};
