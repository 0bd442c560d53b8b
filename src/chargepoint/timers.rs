//! Typed timer bookkeeping
//!
//! Every scheduled wake-up of a charge point (heartbeat, boot retry,
//! reconnect, session expiry, next-session pause, periodic save) is a spawned
//! task whose handle is registered here under its kind. The charge point owns
//! all of its timers: each kind can be cancelled on its own, and teardown
//! cancels everything.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Save,
    Heartbeat,
    RetryBoot,
    Reconnect,
    Session,
    NextSession,
}

#[derive(Default)]
pub struct Timers {
    handles: Mutex<HashMap<TimerKind, Vec<JoinHandle<()>>>>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: TimerKind, handle: JoinHandle<()>) {
        let mut handles = self.handles.lock().expect("timers lock poisoned");
        let slot = handles.entry(kind).or_default();
        slot.retain(|h| !h.is_finished());
        slot.push(handle);
    }

    /// Abort every task registered under `kind`.
    pub fn cancel(&self, kind: TimerKind) {
        let mut handles = self.handles.lock().expect("timers lock poisoned");
        if let Some(slot) = handles.remove(&kind) {
            for handle in slot {
                handle.abort();
            }
        }
    }

    /// Abort everything. Used on teardown.
    pub fn cancel_all(&self) {
        let mut handles = self.handles.lock().expect("timers lock poisoned");
        for (_, slot) in handles.drain() {
            for handle in slot {
                handle.abort();
            }
        }
    }

    /// Whether any live task is registered under `kind`.
    pub fn is_armed(&self, kind: TimerKind) -> bool {
        let handles = self.handles.lock().expect("timers lock poisoned");
        handles
            .get(&kind)
            .is_some_and(|slot| slot.iter().any(|h| !h.is_finished()))
    }
}
