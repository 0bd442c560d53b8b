//! Boot handshake and heartbeat loop
//!
//! Until a BootNotification is answered with `Accepted`, the charge point
//! may send nothing else. A rejection (or any failure during boot) schedules
//! a full retry after a fixed delay. Acceptance starts the heartbeat loop at
//! the configured interval; the interval parameter is re-read every cycle so
//! runtime changes take effect.

use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::domain::params::keys;
use crate::domain::{messages, OcppVersion};
use crate::notifications::Notice;

use super::timers::TimerKind;
use super::ChargePoint;

/// Delay before a rejected or failed boot is retried.
const BOOT_RETRY: Duration = Duration::from_secs(10);

/// Default heartbeat interval in seconds.
const DEFAULT_HEARTBEAT_SECS: u64 = 90;

impl ChargePoint {
    /// Run the boot handshake.
    ///
    /// Always resets `accepted` first: nothing but BootNotification may go
    /// out until the central system accepts the charge point again.
    pub async fn boot(&self) {
        self.set_accepted(false);
        self.notify(Notice::message("Sending BootNotification..."));

        let request = messages::BootNotificationRequest {
            charge_point_model: self.get_param(keys::MODEL, ""),
            charge_point_vendor: self.get_param(keys::VENDOR, ""),
        };
        let payload = match serde_json::to_value(&request) {
            Ok(payload) => payload,
            Err(e) => {
                self.notify(Notice::err(format!("BootNotification payload: {e}")));
                return;
            }
        };

        match self.send(messages::BOOT_NOTIFICATION, payload).await {
            Ok(reply) => {
                let status = reply["status"].as_str().unwrap_or_default().to_string();
                self.handle_boot_status(&status, &reply);
            }
            Err(e) => {
                self.notify(Notice::err(e.to_string()));
                self.notify(Notice::message(format!(
                    "Will resend BootNotification after {}s...",
                    BOOT_RETRY.as_secs()
                )));
                self.schedule_boot_retry();
            }
        }
    }

    fn handle_boot_status(&self, status: &str, reply: &serde_json::Value) {
        match status {
            messages::ACCEPTED => {
                self.set_accepted(true);
                self.notify(Notice::success("Charge point has been accepted"));
                debug!(serial = %self.serial(), interval = ?reply["interval"], "boot accepted");

                // A fresh acceptance owns the heartbeat loop alone.
                self.timers().cancel(TimerKind::Heartbeat);
                let interval = self.params().get_u64(keys::HEARTBEAT, DEFAULT_HEARTBEAT_SECS);
                self.start_heartbeat(Some(interval));
                self.notify(Notice::message(format!(
                    "Heartbeat interval set at {interval} sec"
                )));
            }
            messages::REJECTED => {
                self.notify(Notice::err(format!(
                    "Charge point has been rejected by the backend. Retrying after {}s...",
                    BOOT_RETRY.as_secs()
                )));
                self.schedule_boot_retry();
            }
            messages::PENDING
                if self.params().ocpp_version() == Ok(OcppVersion::V16) =>
            {
                // The central system drives completion, typically through
                // TriggerMessage/GetConfiguration.
                self.notify(Notice::message(
                    "The central system needs more information before the CP can be \
                     accepted. It will proceed automatically. Please don't take any action.",
                ));
            }
            _ => self.notify(Notice::err("Invalid response")),
        }
    }

    fn schedule_boot_retry(&self) {
        let cp = self.handle();
        self.timers().register(
            TimerKind::RetryBoot,
            tokio::spawn(async move {
                tokio::time::sleep(BOOT_RETRY).await;
                cp.boot().await;
            }),
        );
    }

    /// Send a heartbeat now and, given an interval, keep the loop running.
    ///
    /// The loop reschedules unconditionally: a failed send is reported but
    /// the next cycle still happens. Each cycle re-reads the configured
    /// interval; a non-positive interval ends the loop.
    pub fn start_heartbeat(&self, resend_after: Option<u64>) {
        let cp = self.handle();
        self.timers().register(
            TimerKind::Heartbeat,
            tokio::spawn(async move {
                let mut interval = resend_after;
                loop {
                    match cp.send(messages::HEARTBEAT, json!({})).await {
                        Ok(_) => cp.notify(Notice::Heartbeat {
                            resend_after: interval,
                        }),
                        Err(e) => cp.notify(Notice::err(e.to_string())),
                    }

                    match interval {
                        Some(secs) if secs > 0 => {
                            tokio::time::sleep(Duration::from_secs(secs)).await;
                            interval = Some(
                                cp.params().get_u64(keys::HEARTBEAT, DEFAULT_HEARTBEAT_SECS),
                            );
                        }
                        _ => break,
                    }
                }
            }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::super::testkit::*;
    use super::*;
    use crate::support::Frame;
    use serde_json::json;

    #[tokio::test]
    async fn accepted_boot_sets_flag_and_starts_heartbeat() {
        let cp = charge_point(&["AA11"], &[]);
        let rx = attach_fake_transport(&cp);
        let seen = spawn_central_system(&cp, rx);

        cp.boot().await;

        assert!(cp.is_accepted());
        assert!(cp.timers().is_armed(TimerKind::Heartbeat));
        // The heartbeat loop fires immediately after acceptance.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let actions = actions_seen(&seen);
        assert_eq!(actions[0], messages::BOOT_NOTIFICATION);
        assert!(actions.contains(&messages::HEARTBEAT.to_string()));
        cp.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_boot_schedules_a_retry() {
        let cp = charge_point(&["AA11"], &[]);
        let mut rx = attach_fake_transport(&cp);

        let responder = {
            let cp = cp.clone();
            tokio::spawn(async move {
                let mut boots = 0;
                while let Some(raw) = rx.recv().await {
                    if let Ok(Frame::Call { unique_id, action, .. }) = Frame::parse(&raw) {
                        if action == messages::BOOT_NOTIFICATION {
                            boots += 1;
                            cp.handle_incoming(
                                &Frame::result(&unique_id, json!({"status": "Rejected"}))
                                    .serialize(),
                            );
                        }
                        if boots == 2 {
                            break;
                        }
                    }
                }
                boots
            })
        };

        cp.boot().await;
        assert!(!cp.is_accepted());
        assert!(cp.timers().is_armed(TimerKind::RetryBoot));

        // The retry fires after the fixed delay and boots again.
        let boots = responder.await.unwrap();
        assert_eq!(boots, 2);
        cp.destroy();
    }

    #[tokio::test]
    async fn pending_boot_is_informational_only_under_v16() {
        let cp = charge_point(&["AA11"], &[("ocppVersion", "ocpp1.6")]);
        let mut rx = attach_fake_transport(&cp);

        let cp2 = cp.clone();
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                if let Ok(Frame::Call { unique_id, .. }) = Frame::parse(&raw) {
                    cp2.handle_incoming(
                        &Frame::result(&unique_id, json!({"status": "Pending"})).serialize(),
                    );
                }
            }
        });

        cp.boot().await;

        assert!(!cp.is_accepted());
        assert!(!cp.timers().is_armed(TimerKind::RetryBoot));
        assert!(!cp.timers().is_armed(TimerKind::Heartbeat));
        cp.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_reschedules_after_send_failure() {
        // Pinned behavior: a failed heartbeat send does not end the loop.
        let cp = charge_point(&["AA11"], &[("heartbeat", "1")]);
        cp.set_accepted(true);

        // No transport attached: the first send fails.
        cp.start_heartbeat(Some(1));
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        // Attach a transport; the loop must still be alive and keep sending.
        let rx = attach_fake_transport(&cp);
        let seen = spawn_central_system(&cp, rx);
        tokio::time::sleep(std::time::Duration::from_millis(2100)).await;

        let actions = actions_seen(&seen);
        assert!(
            actions.iter().any(|a| a == messages::HEARTBEAT),
            "heartbeat loop died after a failed send"
        );
        cp.destroy();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_interval_is_reread_each_cycle() {
        let cp = charge_point(&["AA11"], &[("heartbeat", "1")]);
        let rx = attach_fake_transport(&cp);
        let seen = spawn_central_system(&cp, rx);
        cp.set_accepted(true);

        cp.start_heartbeat(Some(1));
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        // Raising the interval at runtime slows the loop down.
        cp.set_param(keys::HEARTBEAT, "3600");
        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;
        let count_before = actions_seen(&seen).len();
        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        let count_after = actions_seen(&seen).len();
        assert!(count_after <= count_before + 2, "interval change ignored");
        cp.destroy();
    }
}
