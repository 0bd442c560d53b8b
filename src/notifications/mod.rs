//! Outbound notice channel consumed by the (external) presentation layer

pub mod event_bus;
pub mod events;

pub use event_bus::{EventBus, NoticeSubscriber};
pub use events::{LogEntry, Notice, NoticeEvent, SavePhase};
