//! Call correlation layer
//!
//! Outbound requests get a fresh unique id and a registered waiter; inbound
//! CallResult/CallError frames complete the waiters for their id exactly
//! once, in whatever order replies arrive. Raw request frames additionally
//! sit in a pending-calls table (keyed by an independent random handle) so a
//! reconnect can replay them verbatim with their original ids. Inbound Call
//! frames dispatch to the handler registered for their action; unknown
//! actions are ignored.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::CallFailure;
use crate::notifications::{EventBus, Notice};
use crate::support::{random, Frame};

use super::ChargePoint;

/// What a waiter eventually receives.
pub type CallReply = Result<Value, CallFailure>;

/// Handler for a central-system-initiated request. Receives the owning charge
/// point, the request payload and a responder context; long-running work is
/// expected to be spawned.
pub type CallHandler = Box<dyn Fn(Arc<ChargePoint>, Value, CallContext) + Send + Sync>;

/// A frame awaiting a reply, kept for replay across reconnects.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub unique_id: String,
    pub raw: String,
}

pub struct CallRouter {
    outbox: std::sync::RwLock<Option<mpsc::UnboundedSender<String>>>,
    /// id → waiters; replies are delivered to every waiter, exactly once.
    result_waiters: DashMap<String, Vec<oneshot::Sender<CallReply>>>,
    /// replay handle → pending frame.
    pending_calls: DashMap<String, PendingCall>,
    handlers: DashMap<String, CallHandler>,
}

impl CallRouter {
    pub fn new() -> Self {
        Self {
            outbox: std::sync::RwLock::new(None),
            result_waiters: DashMap::new(),
            pending_calls: DashMap::new(),
            handlers: DashMap::new(),
        }
    }

    // ── Transport attachment ───────────────────────────────────

    pub fn attach(&self, sender: mpsc::UnboundedSender<String>) {
        *self.outbox.write().expect("outbox lock poisoned") = Some(sender);
    }

    pub fn detach(&self) {
        *self.outbox.write().expect("outbox lock poisoned") = None;
    }

    pub fn outbox(&self) -> Option<mpsc::UnboundedSender<String>> {
        self.outbox.read().expect("outbox lock poisoned").clone()
    }

    pub fn is_attached(&self) -> bool {
        self.outbox.read().expect("outbox lock poisoned").is_some()
    }

    /// Push raw text to the connection, if one exists.
    pub fn transmit(&self, raw: String) -> Result<(), CallFailure> {
        let outbox = self.outbox().ok_or_else(|| {
            CallFailure::Transport("connection with the backend has not yet been established".into())
        })?;
        outbox
            .send(raw)
            .map_err(|e| CallFailure::Transport(e.to_string()))
    }

    // ── Outbound correlation ───────────────────────────────────

    /// Fresh correlation id for an outbound request.
    pub fn next_unique_id(&self) -> String {
        random::short_id("msg")
    }

    pub fn register_waiter(&self, unique_id: &str) -> oneshot::Receiver<CallReply> {
        let (tx, rx) = oneshot::channel();
        self.result_waiters
            .entry(unique_id.to_string())
            .or_default()
            .push(tx);
        rx
    }

    /// Track a transmitted frame for replay. Returns the replay handle.
    pub fn insert_pending(&self, unique_id: &str, raw: &str) -> String {
        let handle = random::short_id("call");
        self.pending_calls.insert(
            handle.clone(),
            PendingCall {
                unique_id: unique_id.to_string(),
                raw: raw.to_string(),
            },
        );
        handle
    }

    pub fn clear_pending(&self, handle: &str) {
        self.pending_calls.remove(handle);
    }

    /// Drop every trace of a call and deliver `failure` to its waiters.
    pub fn fail_call(&self, unique_id: &str, failure: CallFailure) {
        self.pending_calls.retain(|_, p| p.unique_id != unique_id);
        if let Some((_, waiters)) = self.result_waiters.remove(unique_id) {
            for waiter in waiters {
                let _ = waiter.send(Err(failure.clone()));
            }
        }
    }

    /// Calls still awaiting a reply, in no particular order.
    pub fn pending_snapshot(&self) -> Vec<PendingCall> {
        self.pending_calls.iter().map(|e| e.value().clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_calls.len()
    }

    // ── Inbound dispatch ───────────────────────────────────────

    pub fn register_handler(&self, action: &str, handler: CallHandler) {
        self.handlers.insert(action.to_string(), handler);
    }

    /// Route one parsed frame.
    pub fn dispatch(&self, cp: &Arc<ChargePoint>, frame: Frame) {
        match frame {
            Frame::Call {
                unique_id,
                action,
                payload,
            } => {
                if let Some(handler) = self.handlers.get(&action) {
                    let ctx = CallContext {
                        unique_id,
                        outbox: self.outbox(),
                        events: cp.events().clone(),
                        serial: cp.serial().to_string(),
                    };
                    (handler.value())(cp.clone(), payload, ctx);
                } else {
                    debug!(action, "no handler registered, ignoring call");
                }
            }
            Frame::CallResult { unique_id, payload } => {
                self.complete(&unique_id, Ok(payload));
            }
            Frame::CallError {
                unique_id,
                error_code,
                error_description,
                error_details,
            } => {
                self.complete(
                    &unique_id,
                    Err(CallFailure::Fault {
                        code: error_code,
                        description: error_description,
                        details: error_details,
                    }),
                );
            }
        }
    }

    fn complete(&self, unique_id: &str, reply: CallReply) {
        match self.result_waiters.remove(unique_id) {
            Some((_, waiters)) => {
                for waiter in waiters {
                    let _ = waiter.send(reply.clone());
                }
            }
            None => warn!(unique_id, "reply for unknown call"),
        }
        self.pending_calls.retain(|_, p| p.unique_id != unique_id);
    }

    /// Drop all correlation state. Waiters observe `Cancelled` via their
    /// closed channels.
    pub fn clear(&self) {
        self.result_waiters.clear();
        self.pending_calls.clear();
        self.handlers.clear();
        self.detach();
    }
}

impl Default for CallRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Responder capability handed to inbound-call handlers. Carries the
/// originating unique id; consuming it answers the call at most once.
pub struct CallContext {
    unique_id: String,
    outbox: Option<mpsc::UnboundedSender<String>>,
    events: EventBus,
    serial: String,
}

impl CallContext {
    pub fn unique_id(&self) -> &str {
        &self.unique_id
    }

    /// Answer with a CallResult frame.
    pub fn success(self, payload: Value) {
        let raw = Frame::result(&self.unique_id, payload).serialize();
        self.respond(raw);
    }

    /// Answer with a CallError frame.
    pub fn error(self, code: &str, description: &str, details: Value) {
        let raw = Frame::error(&self.unique_id, code, description, details).serialize();
        self.respond(raw);
    }

    fn respond(self, raw: String) {
        let delivered = self
            .outbox
            .as_ref()
            .is_some_and(|outbox| outbox.send(raw).is_ok());
        if !delivered {
            self.events.publish(
                &self.serial,
                Notice::err(
                    "Connection with the backend has not yet been established. \
                     Please connect to the backend first.",
                ),
            );
        }
    }
}
