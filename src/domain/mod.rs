//! Core domain types: statuses, parameters, sessions, wire payloads

pub mod messages;
pub mod params;
pub mod session;
pub mod status;

pub use params::Params;
pub use session::{DeferredAction, Session, SessionBounds, SessionSnapshot};
pub use status::{ChargePointStatus, OcppVersion, SessionStatus};
