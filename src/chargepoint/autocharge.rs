//! Auto-charge orchestration
//!
//! The loop cycles through the configured driver identities: authorize,
//! start a transaction, let the session timer run out, stop the transaction
//! with the updated meter value, then pick the next driver after a random
//! pause. New sessions are pushed out of the configured daily idle window.
//! One session at a time; the loop pauses (it does not crash) when an
//! attempt fails hard.

use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use futures_util::future::FutureExt;
use tracing::debug;

use crate::domain::params::keys;
use crate::domain::{
    messages, ChargePointStatus, OcppVersion, Session, SessionBounds, SessionSnapshot,
    SessionStatus,
};
use crate::error::SimulatorError;
use crate::notifications::Notice;
use crate::support::random;

use super::timers::TimerKind;
use super::ChargePoint;

/// Reported session energy is clamped to this many kWh.
const MAX_SESSION_ENERGY_KWH: f64 = 60.0;

/// Reported average power is clamped to this many kW.
const MAX_AVG_POWER_KW: f64 = 22.0;

/// How one charge attempt ended, short of a hard failure.
enum ChargeAttempt {
    /// Session created, transaction started, timer armed.
    Started,
    /// The backend refused the driver; skip to the next one.
    Refused,
    /// The configured protocol version cannot run sessions.
    UnsupportedVersion,
}

impl ChargePoint {
    /// Start the auto-charge loop with the first (pre-shuffled) driver.
    ///
    /// Rejected while the loop is already active or without driver
    /// identities; both are reported to the notice channel as well.
    pub async fn start(&self) -> Result<(), SimulatorError> {
        if self.in_loop() {
            self.notify(Notice::err(
                "Auto-charging loop is already active, please stop the loop \
                 before starting a new one.",
            ));
            return Err(SimulatorError::LoopActive);
        }
        self.notify(Notice::message("Starting auto-charge..."));

        let uids = self.uids();
        let Some(first) = uids.first().cloned() else {
            self.notify(Notice::err("No driver UIDs added to start charging"));
            return Err(SimulatorError::NoDriverUids);
        };

        self.set_in_loop_flag(true);
        self.charge(&first, 1).await
    }

    /// Run one charging attempt for `uid`.
    ///
    /// An unknown uid is a configuration error and fails loudly. While the
    /// status is `Unavailable` the attempt is aborted and the loop stays
    /// paused until the status changes. A hard failure mid-attempt is
    /// reported and unwinds without scheduling a successor.
    pub async fn charge(&self, uid: &str, connector_id: u32) -> Result<(), SimulatorError> {
        if !self.uids().iter().any(|u| u == uid) {
            let message = format!(
                "The UID {uid} isn't assigned to this chargepoint. Can't initiate the session."
            );
            self.notify(Notice::err(message));
            return Err(SimulatorError::UnknownUid(uid.to_string()));
        }

        if self.status() == ChargePointStatus::Unavailable {
            self.notify(Notice::err(format!(
                "Can't start session because status is \"{}\"",
                self.status()
            )));
            return Ok(());
        }

        match self.run_charge_attempt(uid, connector_id).await {
            Ok(ChargeAttempt::Started) => Ok(()),
            Ok(ChargeAttempt::Refused) => {
                self.session_ended(None).await;
                Ok(())
            }
            Ok(ChargeAttempt::UnsupportedVersion) => Ok(()),
            Err(e) => {
                self.notify(Notice::err(e.to_string()));
                Ok(())
            }
        }
    }

    async fn run_charge_attempt(
        &self,
        uid: &str,
        connector_id: u32,
    ) -> Result<ChargeAttempt, SimulatorError> {
        self.set_status(ChargePointStatus::Available, connector_id)
            .await?;

        let authorize = messages::AuthorizeRequest {
            id_tag: uid.to_string(),
        };
        let reply = self
            .send(messages::AUTHORIZE, serde_json::to_value(&authorize)?)
            .await?;
        let authorized: messages::AuthorizeResponse = serde_json::from_value(reply)?;
        if authorized.id_tag_info.status != messages::ACCEPTED {
            self.notify(Notice::err(format!(
                "UID #{uid} wasn't accepted by backend. Skipping..."
            )));
            return Ok(ChargeAttempt::Refused);
        }

        let version = match self.params().ocpp_version() {
            Ok(version) => version,
            Err(tag) => {
                self.notify(Notice::err(format!("Unsupported OCPP version {tag}")));
                return Ok(ChargeAttempt::UnsupportedVersion);
            }
        };
        let occupied = match version {
            OcppVersion::V15 => ChargePointStatus::Occupied,
            OcppVersion::V16 => ChargePointStatus::Preparing,
        };
        self.set_status(occupied, connector_id).await?;

        let session_id = {
            let sess = Session::sample(uid, &self.session_bounds());
            let id = sess.id.clone();
            self.sessions()
                .write()
                .expect("sessions lock poisoned")
                .push(sess);
            id
        };

        let start = messages::StartTransactionRequest {
            connector_id,
            id_tag: uid.to_string(),
            meter_start: self.meter_value(),
            timestamp: Utc::now(),
        };
        let reply = self
            .send(messages::START_TRANSACTION, serde_json::to_value(&start)?)
            .await?;
        let started: messages::StartTransactionResponse = serde_json::from_value(reply)?;

        let snapshot = {
            let mut sessions = self.sessions().write().expect("sessions lock poisoned");
            let sess = sessions
                .iter_mut()
                .find(|s| s.id == session_id)
                .ok_or_else(|| SimulatorError::SessionNotFound(session_id.clone()))?;
            sess.tx_id = Some(started.transaction_id);
            sess.connector_id = connector_id;
            sess.status = SessionStatus::Accepted;
            sess.snapshot()
        };

        self.start_charging(&session_id);
        self.notify(Notice::Session(Some(snapshot)));

        if version == OcppVersion::V16 {
            self.set_status(ChargePointStatus::Charging, connector_id)
                .await?;
        }

        Ok(ChargeAttempt::Started)
    }

    /// Arm the session timer and mark the loop continuation as registered.
    fn start_charging(&self, session_id: &str) {
        let (duration_min, pretty) = {
            let mut sessions = self.sessions().write().expect("sessions lock poisoned");
            let Some(sess) = sessions.iter_mut().find(|s| s.id == session_id) else {
                return;
            };
            sess.started = true;
            let pretty = serde_json::to_string_pretty(&sess.snapshot())
                .unwrap_or_else(|_| "{}".to_string());
            (sess.duration_min(), pretty)
        };

        self.notify(Notice::message(pretty));
        self.notify(Notice::success(format!(
            "Charging {session_id}. Duration {} min.",
            duration_min.round()
        )));

        let secs = duration_min * 60.0;
        if !secs.is_finite() || secs < 0.0 {
            self.notify(Notice::err(format!(
                "Session {session_id} has no usable duration; it will not stop on its own"
            )));
            return;
        }

        let cp = self.handle();
        let id = session_id.to_string();
        self.timers().register(
            TimerKind::Session,
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs_f64(secs)).await;
                // Detach before stopping, so cancelling the session timer
                // never aborts the stop sequence itself.
                tokio::spawn(async move {
                    if let Err(e) = cp.stop_charging(&id).boxed().await {
                        cp.notify(Notice::err(e.to_string()));
                    }
                });
            }),
        );
    }

    /// Loop continuation after a session ended (or an attempt was refused).
    pub(crate) async fn session_ended(&self, ended: Option<SessionSnapshot>) {
        let next_uid = random::pick(&self.uids());

        match ended {
            Some(sess) if sess.status == SessionStatus::Accepted => {
                if let Err(e) = self.finish_accepted_session(&sess).await {
                    self.notify(Notice::err(e.to_string()));
                    return;
                }
                if !self.in_loop() {
                    return;
                }
                let Some(uid) = next_uid else { return };

                let (min_pause, max_pause) = self.pause_bounds();
                let mut pause = random::in_range(min_pause, max_pause);
                let resume_at =
                    Utc::now() + chrono::Duration::milliseconds((pause * 60_000.0) as i64);
                if let Some(window) = self.idle_window() {
                    if window.contains(resume_at) {
                        self.notify(Notice::unimportant(self.idle_time_message()));
                        pause += (window.end - resume_at).num_milliseconds() as f64 / 60_000.0;
                        // Extra pause so sessions don't all start right when
                        // the idle window closes.
                        pause += random::in_range(min_pause, max_pause);
                    }
                }

                let pause = pause.max(0.0);
                self.notify(Notice::message(format!(
                    "Waiting {} min until next charge",
                    pause.round()
                )));
                self.schedule_next_charge(uid, Duration::from_secs_f64(pause * 60.0), true);
            }
            _ => {
                if !self.in_loop() {
                    return;
                }
                let Some(uid) = next_uid else { return };

                match self.idle_window() {
                    Some(window) if window.contains(Utc::now()) => {
                        self.notify(Notice::message(self.idle_time_message()));
                        let wait = (window.end - Utc::now())
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        self.schedule_next_charge(uid, wait, false);
                    }
                    _ => self.schedule_next_charge(uid, Duration::ZERO, false),
                }
            }
        }
    }

    async fn finish_accepted_session(
        &self,
        sess: &SessionSnapshot,
    ) -> Result<(), SimulatorError> {
        if self.params().ocpp_version() == Ok(OcppVersion::V16) {
            self.set_status(ChargePointStatus::Finishing, sess.connector_id)
                .await?;
        }

        self.notify(Notice::message(format!(
            "Trying to stop charging {}...",
            sess.id
        )));

        // Clamp what the meter reports: per-session energy and average power
        // both have hard ceilings.
        let elapsed_hours = sess.elapsed as f64 / 60.0;
        let consumed = sess.energy_spent.min(MAX_SESSION_ENERGY_KWH);
        let meter = self.meter_value() as f64;
        let mut meter_end = meter + consumed * 1000.0;
        if consumed / elapsed_hours > MAX_AVG_POWER_KW {
            meter_end = meter + MAX_AVG_POWER_KW * 1000.0 * elapsed_hours;
        }
        let new_meter = (meter_end.ceil() as u64).max(self.meter_value());
        self.set_meter_value(new_meter);
        debug!(serial = %self.serial(), session = %sess.id, meter = new_meter, "meter updated");

        let stop = messages::StopTransactionRequest {
            id_tag: sess.uid.clone(),
            meter_stop: new_meter,
            timestamp: Utc::now(),
            transaction_id: sess.tx_id.unwrap_or_default(),
        };
        self.send(messages::STOP_TRANSACTION, serde_json::to_value(&stop)?)
            .await?;

        self.notify(Notice::Session(None));
        self.notify(Notice::success(format!("{} has stopped charging", sess.id)));

        self.set_status(ChargePointStatus::Available, sess.connector_id)
            .await?;
        Ok(())
    }

    fn schedule_next_charge(&self, uid: String, delay: Duration, check_loop_at_fire: bool) {
        let cp = self.handle();
        self.timers().register(
            TimerKind::NextSession,
            tokio::spawn(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if check_loop_at_fire && !cp.in_loop() {
                    return;
                }
                if let Err(e) = cp.charge(&uid, 1).boxed().await {
                    cp.notify(Notice::err(e.to_string()));
                }
            }),
        );
    }

    fn session_bounds(&self) -> SessionBounds {
        SessionBounds {
            min_energy: self.params().get_f64(keys::MIN_ENERGY, 26.0),
            max_energy: self.params().get_f64(keys::MAX_ENERGY, 68.0),
            min_power: self.params().get_f64(keys::MIN_POWER, 11.0),
            max_power: self.params().get_f64(keys::MAX_POWER, 22.0),
        }
    }

    fn pause_bounds(&self) -> (f64, f64) {
        (
            self.params().get_f64(keys::MIN_PAUSE, 23.0),
            self.params().get_f64(keys::MAX_PAUSE, 44.0),
        )
    }

    /// Today's idle window, or `None` when the bounds are malformed.
    pub fn idle_window(&self) -> Option<IdleWindow> {
        parse_idle_window(
            &self.get_param(keys::START_IDLE_TIME, ""),
            &self.get_param(keys::END_IDLE_TIME, ""),
            Utc::now().date_naive(),
        )
    }

    fn idle_time_message(&self) -> String {
        let now = Utc::now();
        format!(
            "It's idle time, no charging until {} UTC. Currently {} UTC.",
            self.get_param(keys::END_IDLE_TIME, ""),
            now.format("%H:%M")
        )
    }
}

/// A daily no-charging window in UTC. Spans midnight when the end hour is
/// before the start hour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdleWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl IdleWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at > self.start && at < self.end
    }
}

/// Build the idle window anchored on `date`. Malformed or out-of-range HH:MM
/// bounds yield `None` ("no idle time").
pub(crate) fn parse_idle_window(start: &str, end: &str, date: NaiveDate) -> Option<IdleWindow> {
    let (start_hour, start_min) = parse_hhmm(start)?;
    let (end_hour, end_min) = parse_hhmm(end)?;

    let window_start = date.and_hms_opt(start_hour, start_min, 0)?.and_utc();
    let end_date = if end_hour < start_hour {
        date.succ_opt()?
    } else {
        date
    };
    let window_end = end_date.and_hms_opt(end_hour, end_min, 0)?.and_utc();

    Some(IdleWindow {
        start: window_start,
        end: window_end,
    })
}

fn parse_hhmm(text: &str) -> Option<(u32, u32)> {
    let (hour, minute) = text.split_once(':')?;
    Some((hour.trim().parse().ok()?, minute.trim().parse().ok()?))
}
