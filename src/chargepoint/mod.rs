//! The simulated charge point
//!
//! One `ChargePoint` is one logical actor: it owns its connection, its
//! correlation tables, its timers and its session history. All state
//! mutation happens through `&self` methods on the shared handle; multiple
//! charge points are fully independent.

pub mod autocharge;
pub mod boot;
pub mod connection;
pub mod handlers;
pub mod registry;
pub mod router;
pub mod timers;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::Value;
use tracing::debug;

use crate::config::BackendConfig;
use crate::domain::{
    messages, ChargePointStatus, DeferredAction, Params, Session, SessionSnapshot,
};
use crate::error::SimulatorError;
use crate::notifications::{EventBus, LogEntry, Notice, SavePhase};
use crate::persistence::{ChargePointStore, PersistedChargePoint};
use crate::support::{random, Frame};

use router::{CallHandler, CallRouter};
use timers::{TimerKind, Timers};

pub use registry::ChargePointRegistry;

/// How often runtime state and the message log are persisted.
const SAVE_INTERVAL: Duration = Duration::from_secs(30);

pub struct ChargePoint {
    this: Weak<ChargePoint>,
    serial: String,
    uids: RwLock<Vec<String>>,
    params: Params,
    sessions: RwLock<Vec<Session>>,
    /// Cumulative meter in Wh. Never decreases.
    meter_value: AtomicU64,
    /// Set only by a successful boot handshake.
    accepted: AtomicBool,
    status: RwLock<ChargePointStatus>,
    in_loop: AtomicBool,
    /// Set by a user-requested disconnect; suppresses auto-reconnect.
    manual_close: AtomicBool,
    router: CallRouter,
    timers: Timers,
    events: EventBus,
    msglog: Mutex<Vec<LogEntry>>,
    backend: BackendConfig,
    store: Arc<dyn ChargePointStore>,
}

impl ChargePoint {
    /// Build a charge point from persisted state (or defaults), register its
    /// inbound handlers and arm the periodic save timer.
    ///
    /// Must run inside a tokio runtime.
    pub fn new(
        state: PersistedChargePoint,
        backend: BackendConfig,
        events: EventBus,
        store: Arc<dyn ChargePointStore>,
    ) -> Arc<Self> {
        let uids = random::shuffled(state.uids);
        let sessions: Vec<Session> = state
            .sessions
            .into_iter()
            .filter(|s| uids.contains(&s.uid))
            .map(Session::from_snapshot)
            .collect();

        let cp = Arc::new_cyclic(|weak: &Weak<ChargePoint>| {
            let timers = Timers::new();
            let saver = weak.clone();
            timers.register(
                TimerKind::Save,
                tokio::spawn(async move {
                    loop {
                        tokio::time::sleep(SAVE_INTERVAL).await;
                        let Some(cp) = saver.upgrade() else { break };
                        if let Err(e) = cp.save().await {
                            cp.notify(Notice::err(format!("Failed to save: {e}")));
                        }
                    }
                }),
            );

            ChargePoint {
                this: weak.clone(),
                serial: state.serialno,
                uids: RwLock::new(uids),
                params: Params::with_overrides(state.params),
                sessions: RwLock::new(sessions),
                meter_value: AtomicU64::new(state.meter_value),
                accepted: AtomicBool::new(false),
                status: RwLock::new(ChargePointStatus::Available),
                in_loop: AtomicBool::new(false),
                manual_close: AtomicBool::new(false),
                router: CallRouter::new(),
                timers,
                events,
                msglog: Mutex::new(Vec::new()),
                backend,
                store,
            }
        });

        handlers::register_call_handlers(&cp);
        cp
    }

    /// Strong handle to self, for spawning tasks from `&self` methods.
    ///
    /// The weak pointer always upgrades while a `&self` exists.
    pub(crate) fn handle(&self) -> Arc<ChargePoint> {
        self.this.upgrade().expect("charge point still alive")
    }

    // ── Accessors ──────────────────────────────────────────────

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn status(&self) -> ChargePointStatus {
        *self.status.read().expect("status lock poisoned")
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn in_loop(&self) -> bool {
        self.in_loop.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.router.is_attached()
    }

    /// Meter reading in Wh.
    pub fn meter_value(&self) -> u64 {
        self.meter_value.load(Ordering::SeqCst)
    }

    pub fn uids(&self) -> Vec<String> {
        self.uids.read().expect("uids lock poisoned").clone()
    }

    /// Replace the driver identity list, dropping duplicates.
    pub fn set_uids(&self, uids: Vec<String>) {
        let mut unique: Vec<String> = Vec::with_capacity(uids.len());
        for uid in uids {
            if !unique.contains(&uid) {
                unique.push(uid);
            }
        }
        *self.uids.write().expect("uids lock poisoned") = unique;
    }

    pub fn get_param(&self, key: &str, default: &str) -> String {
        self.params.get(key, default)
    }

    pub fn set_param(&self, key: &str, value: impl Into<String>) {
        self.params.set(key, value);
    }

    /// The most recent session, if it has not ended yet.
    pub fn current_session(&self) -> Option<SessionSnapshot> {
        let sessions = self.sessions.read().expect("sessions lock poisoned");
        sessions
            .last()
            .filter(|s| s.is_active())
            .map(Session::snapshot)
    }

    /// Complete session history, oldest first.
    pub fn session_history(&self) -> Vec<SessionSnapshot> {
        let sessions = self.sessions.read().expect("sessions lock poisoned");
        sessions.iter().map(Session::snapshot).collect()
    }

    pub(crate) fn router(&self) -> &CallRouter {
        &self.router
    }

    pub(crate) fn timers(&self) -> &Timers {
        &self.timers
    }

    pub(crate) fn params(&self) -> &Params {
        &self.params
    }

    pub(crate) fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    pub(crate) fn manual_close(&self) -> bool {
        self.manual_close.load(Ordering::SeqCst)
    }

    pub(crate) fn set_manual_close(&self, v: bool) {
        self.manual_close.store(v, Ordering::SeqCst);
    }

    pub(crate) fn set_accepted(&self, v: bool) {
        self.accepted.store(v, Ordering::SeqCst);
    }

    pub(crate) fn set_status_value(&self, status: ChargePointStatus) {
        *self.status.write().expect("status lock poisoned") = status;
    }

    pub(crate) fn set_meter_value(&self, value: u64) {
        self.meter_value.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_in_loop_flag(&self, v: bool) {
        self.in_loop.store(v, Ordering::SeqCst);
    }

    pub(crate) fn sessions(&self) -> &RwLock<Vec<Session>> {
        &self.sessions
    }

    // ── Notices ────────────────────────────────────────────────

    /// Publish a notice; loggable kinds are also buffered for the next save.
    pub fn notify(&self, notice: Notice) {
        if notice.is_logged() {
            self.msglog
                .lock()
                .expect("msglog lock poisoned")
                .push(LogEntry::from_notice(&notice));
        }
        self.events.publish(&self.serial, notice);
    }

    // ── Outbound calls ─────────────────────────────────────────

    /// Register a handler for a central-system-initiated action.
    pub fn on(&self, action: &str, handler: CallHandler) {
        self.router.register_handler(action, handler);
    }

    /// Frame and transmit a request, then wait for its reply.
    ///
    /// Fails immediately without a connection, and (except for
    /// BootNotification) while the charge point has not been accepted.
    pub async fn send(&self, action: &str, payload: Value) -> Result<Value, SimulatorError> {
        if !self.router.is_attached() {
            return Err(SimulatorError::NotConnected);
        }
        if !self.is_accepted() && action != messages::BOOT_NOTIFICATION {
            return Err(SimulatorError::NotAccepted);
        }

        let unique_id = self.router.next_unique_id();
        let raw = Frame::call(&unique_id, action, payload).serialize();
        let rx = self.router.register_waiter(&unique_id);
        self.router.insert_pending(&unique_id, &raw);

        if let Err(failure) = self.router.transmit(raw) {
            self.router.fail_call(&unique_id, failure.clone());
            return Err(failure.into());
        }

        match rx.await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(failure)) => Err(failure.into()),
            Err(_) => Err(crate::error::CallFailure::Cancelled.into()),
        }
    }

    /// Re-transmit every call still awaiting a reply, verbatim and with its
    /// original unique id. A replay that cannot be transmitted fails the
    /// waiting caller instead of dropping it silently.
    pub async fn resend_pending(&self) {
        let pending = self.router.pending_snapshot();
        if pending.is_empty() {
            return;
        }
        self.notify(Notice::message(format!(
            "Resending {} pending call(s)...",
            pending.len()
        )));

        for call in pending {
            let action = match Frame::parse(&call.raw) {
                Ok(Frame::Call { action, .. }) => action,
                _ => {
                    debug!(unique_id = %call.unique_id, "dropping malformed pending call");
                    self.router.fail_call(
                        &call.unique_id,
                        crate::error::CallFailure::Transport("malformed pending frame".into()),
                    );
                    continue;
                }
            };

            if !self.is_accepted() && action != messages::BOOT_NOTIFICATION {
                self.router.fail_call(
                    &call.unique_id,
                    crate::error::CallFailure::Transport(
                        "charge point has not yet been accepted by the backend".into(),
                    ),
                );
                continue;
            }

            if let Err(failure) = self.router.transmit(call.raw.clone()) {
                self.router.fail_call(&call.unique_id, failure);
            }
        }
    }

    /// Set the operational status and notify the central system.
    pub async fn set_status(
        &self,
        status: ChargePointStatus,
        connector_id: u32,
    ) -> Result<(), SimulatorError> {
        self.set_status_value(status);
        let req = messages::StatusNotificationRequest {
            connector_id,
            error_code: "NoError".to_string(),
            status,
        };
        self.send(messages::STATUS_NOTIFICATION, serde_json::to_value(&req)?)
            .await?;
        self.notify(Notice::success(format!(
            "CP status has been set to {status}"
        )));
        Ok(())
    }

    // ── Session lifecycle ──────────────────────────────────────

    /// Stop a session. Terminal: stopping an already-stopped session fails.
    ///
    /// For a started session this runs the loop continuation and any deferred
    /// actions registered while the session was live.
    pub async fn stop_charging(&self, session_id: &str) -> Result<SessionSnapshot, SimulatorError> {
        let (snapshot, deferred, started) = {
            let mut sessions = self.sessions.write().expect("sessions lock poisoned");
            let sess = sessions
                .iter_mut()
                .find(|s| s.id == session_id)
                .ok_or_else(|| SimulatorError::SessionNotFound(session_id.to_string()))?;
            if let Some(stopped_at) = sess.stop {
                return Err(SimulatorError::AlreadyStopped {
                    id: session_id.to_string(),
                    stopped_at,
                });
            }
            sess.stop = Some(chrono::Utc::now());
            let deferred = std::mem::take(&mut sess.deferred);
            (sess.snapshot(), deferred, sess.started)
        };

        self.timers.cancel(TimerKind::Session);

        if started {
            self.session_ended(Some(snapshot.clone())).await;
            for action in deferred {
                match action {
                    DeferredAction::SetAvailability(status) => {
                        if let Err(e) = self.set_status(status, 0).await {
                            self.notify(Notice::err(e.to_string()));
                        }
                        // set_in_loop and stop_charging await each other;
                        // set_in_loop returns a boxed future to break the cycle.
                        self.set_in_loop(false).await;
                    }
                }
            }
        }

        Ok(snapshot)
    }

    /// Turn the auto-charge loop off (or back on without starting it).
    ///
    /// Turning it off while a session is live stops that session as part of
    /// the transition.
    pub fn set_in_loop(&self, active: bool) -> BoxFuture<'_, ()> {
        // Returns a boxed future: set_in_loop and stop_charging await each
        // other, and boxing one edge breaks the async opaque-type cycle.
        async move {
            if !active && self.in_loop() {
                if let Some(current) = self.current_session() {
                    if let Err(e) = self.stop_charging(&current.id).await {
                        self.notify(Notice::err(e.to_string()));
                    }
                }
                self.notify(Notice::success("The auto-charging loop has been stopped."));
            }
            self.set_in_loop_flag(active);
        }
        .boxed()
    }

    // ── Persistence ────────────────────────────────────────────

    fn persisted_state(&self) -> PersistedChargePoint {
        PersistedChargePoint {
            serialno: self.serial.clone(),
            uids: self.uids(),
            meter_value: self.meter_value(),
            params: self.params.snapshot(),
            sessions: self.session_history(),
        }
    }

    /// Persist state and drain the message log to the store. Failed saves
    /// put the drained entries back.
    pub async fn save(&self) -> Result<(), SimulatorError> {
        self.notify(Notice::Save(SavePhase::Saving));
        let state = self.persisted_state();
        let logs: Vec<LogEntry> = {
            let mut msglog = self.msglog.lock().expect("msglog lock poisoned");
            std::mem::take(&mut *msglog)
        };

        match self.store.save(&state, &logs).await {
            Ok(()) => {
                self.notify(Notice::Save(SavePhase::Saved));
                Ok(())
            }
            Err(e) => {
                let mut msglog = self.msglog.lock().expect("msglog lock poisoned");
                let newer = std::mem::take(&mut *msglog);
                let mut restored = logs;
                restored.extend(newer);
                *msglog = restored;
                Err(e.into())
            }
        }
    }

    // ── Teardown ───────────────────────────────────────────────

    /// Cancel every timer and drop all correlation state. In-flight callers
    /// observe cancelled calls.
    pub fn destroy(&self) {
        self.set_manual_close(true);
        self.timers.cancel_all();
        self.router.clear();
        debug!(serial = %self.serial, "charge point destroyed");
    }
}


#[cfg(test)]
mod tests {
    use super::testkit::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_requires_a_connection_before_anything_else() {
        let cp = charge_point(&["AA11"], &[]);
        // Not accepted AND not connected: the connection error wins.
        let err = cp.send(messages::HEARTBEAT, json!({})).await.unwrap_err();
        assert!(matches!(err, SimulatorError::NotConnected));
    }

    #[tokio::test]
    async fn send_requires_acceptance_for_everything_but_boot() {
        let cp = charge_point(&["AA11"], &[]);
        let _rx = attach_fake_transport(&cp);

        let err = cp.send(messages::HEARTBEAT, json!({})).await.unwrap_err();
        assert!(matches!(err, SimulatorError::NotAccepted));

        // BootNotification passes the gate and is correlated by its reply.
        let cp2 = cp.clone();
        let call = tokio::spawn(async move {
            cp2.send(messages::BOOT_NOTIFICATION, json!({})).await
        });
        tokio::task::yield_now().await;
        let pending = cp.router().pending_snapshot();
        assert_eq!(pending.len(), 1);
        cp.handle_incoming(
            &Frame::result(&pending[0].unique_id, json!({"status": "Rejected"})).serialize(),
        );
        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply["status"], "Rejected");
        assert_eq!(cp.router().pending_count(), 0);
    }

    #[tokio::test]
    async fn replies_match_by_id_not_send_order() {
        let cp = charge_point(&["AA11"], &[]);
        let _rx = attach_fake_transport(&cp);
        cp.set_accepted(true);

        let first = {
            let cp = cp.clone();
            tokio::spawn(async move { cp.send(messages::HEARTBEAT, json!({"n": 1})).await })
        };
        tokio::task::yield_now().await;
        let second = {
            let cp = cp.clone();
            tokio::spawn(async move { cp.send(messages::HEARTBEAT, json!({"n": 2})).await })
        };
        tokio::task::yield_now().await;

        let pending = cp.router().pending_snapshot();
        assert_eq!(pending.len(), 2);
        // Answer in reverse order; each caller still gets its own reply.
        for call in pending.iter().rev() {
            let raw = Frame::parse(&call.raw).unwrap();
            let n = match raw {
                Frame::Call { payload, .. } => payload["n"].clone(),
                _ => unreachable!(),
            };
            cp.handle_incoming(
                &Frame::result(&call.unique_id, json!({"echo": n})).serialize(),
            );
        }

        let r1 = first.await.unwrap().unwrap();
        let r2 = second.await.unwrap().unwrap();
        assert_eq!(r1["echo"], 1);
        assert_eq!(r2["echo"], 2);
    }

    #[tokio::test]
    async fn call_error_frame_reaches_only_its_caller() {
        let cp = charge_point(&["AA11"], &[]);
        let _rx = attach_fake_transport(&cp);
        cp.set_accepted(true);

        let call = {
            let cp = cp.clone();
            tokio::spawn(async move { cp.send(messages::HEARTBEAT, json!({})).await })
        };
        tokio::task::yield_now().await;

        let pending = cp.router().pending_snapshot();
        cp.handle_incoming(
            &Frame::error(
                &pending[0].unique_id,
                "InternalError",
                "backend exploded",
                json!({"hint": 1}),
            )
            .serialize(),
        );

        let err = call.await.unwrap().unwrap_err();
        match err {
            SimulatorError::Call(crate::error::CallFailure::Fault { code, description, details }) => {
                assert_eq!(code, "InternalError");
                assert_eq!(description, "backend exploded");
                assert_eq!(details["hint"], 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The connection stayed attached.
        assert!(cp.is_connected());
    }

    #[tokio::test]
    async fn pending_calls_are_resent_with_identical_ids_after_reconnect() {
        let cp = charge_point(&["AA11"], &[]);
        let mut rx = attach_fake_transport(&cp);
        cp.set_accepted(true);

        let call = {
            let cp = cp.clone();
            tokio::spawn(async move { cp.send(messages::STOP_TRANSACTION, json!({"transactionId": 5})).await })
        };
        tokio::task::yield_now().await;
        let sent = rx.recv().await.unwrap();
        let original_id = Frame::parse(&sent).unwrap().unique_id().to_string();

        // Connection drops before the reply arrives.
        cp.router().detach();
        drop(rx);
        assert_eq!(cp.router().pending_count(), 1);

        // Reconnect and replay.
        let mut rx2 = attach_fake_transport(&cp);
        cp.resend_pending().await;
        let resent = rx2.recv().await.unwrap();
        assert_eq!(resent, sent, "replayed frame must be verbatim");
        let resent_id = Frame::parse(&resent).unwrap().unique_id().to_string();
        assert_eq!(resent_id, original_id);

        // The original caller resolves once the reply finally arrives.
        cp.handle_incoming(&Frame::result(&original_id, json!({"ok": true})).serialize());
        let reply = call.await.unwrap().unwrap();
        assert_eq!(reply["ok"], true);
        assert_eq!(cp.router().pending_count(), 0);
    }

    #[tokio::test]
    async fn replay_without_acceptance_fails_the_caller_instead_of_dropping_it() {
        let cp = charge_point(&["AA11"], &[]);
        let mut rx = attach_fake_transport(&cp);
        cp.set_accepted(true);

        let call = {
            let cp = cp.clone();
            tokio::spawn(async move { cp.send(messages::HEARTBEAT, json!({})).await })
        };
        tokio::task::yield_now().await;
        let _ = rx.recv().await.unwrap();

        cp.router().detach();
        drop(rx);
        cp.set_accepted(false); // a fresh boot has not been accepted yet

        let _rx2 = attach_fake_transport(&cp);
        cp.resend_pending().await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SimulatorError::Call(crate::error::CallFailure::Transport(_))
        ));
        assert_eq!(cp.router().pending_count(), 0);
    }

    #[tokio::test]
    async fn stopping_a_session_twice_always_fails() {
        let cp = charge_point(&["AA11"], &[]);
        let session_id = {
            let sess = Session::with_profile("AA11", 10.0, 10.0, chrono::Utc::now());
            let id = sess.id.clone();
            cp.sessions().write().unwrap().push(sess);
            id
        };

        let first = cp.stop_charging(&session_id).await.unwrap();
        assert!(first.stop.is_some(), "the returned snapshot is terminal");

        let second = cp.stop_charging(&session_id).await.unwrap_err();
        assert!(matches!(second, SimulatorError::AlreadyStopped { .. }));
    }

    #[tokio::test]
    async fn meter_value_survives_a_save_roundtrip() {
        let store = Arc::new(crate::persistence::MemoryStore::new());
        let mut state = PersistedChargePoint::empty("CP-SAVE");
        state.uids = vec!["AA11".into()];
        state.meter_value = 500;
        let cp = ChargePoint::new(state, backend_config(), EventBus::new(), store.clone());

        cp.notify(Notice::message("hello"));
        cp.save().await.unwrap();

        let loaded = store.load("CP-SAVE").await.unwrap().unwrap();
        assert_eq!(loaded.meter_value, 500);
        assert_eq!(loaded.uids, vec!["AA11".to_string()]);
        // The message log was drained into the store.
        assert_eq!(store.logs_for("CP-SAVE").len(), 1);
        cp.save().await.unwrap();
        assert_eq!(store.logs_for("CP-SAVE").len(), 1);
    }

    #[tokio::test]
    async fn destroy_cancels_callers_and_clears_state() {
        let cp = charge_point(&["AA11"], &[]);
        let _rx = attach_fake_transport(&cp);
        cp.set_accepted(true);

        let call = {
            let cp = cp.clone();
            tokio::spawn(async move { cp.send(messages::HEARTBEAT, json!({})).await })
        };
        tokio::task::yield_now().await;

        cp.destroy();
        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(
            err,
            SimulatorError::Call(crate::error::CallFailure::Cancelled)
        ));
        assert!(!cp.is_connected());
        assert_eq!(cp.router().pending_count(), 0);
    }
}
