//! Handlers for central-system-initiated requests
//!
//! Registered per action name on the correlation layer. Each handler answers
//! through the responder context; work that has to talk to the backend is
//! spawned so the reader task is never blocked.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::domain::messages::{
    self, ChangeAvailabilityRequest, GetConfigurationResponse, KeyValue, ResetRequest,
    TriggerMessageRequest,
};
use crate::domain::{ChargePointStatus, DeferredAction, OcppVersion};
use crate::notifications::Notice;

use super::ChargePoint;

/// Core-profile configuration keys: name, readonly, fixed value (if any).
const CONFIGURATION_KEYS: &[(&str, bool, Option<i64>)] = &[
    ("AuthorizeRemoteTxRequests", false, None),
    ("ClockAlignedDataInterval", false, None),
    ("ConnectionTimeOut", false, None),
    ("ConnectorPhaseRotation", false, None),
    ("GetConfigurationMaxKeys", true, Some(100)),
    ("HeartbeatInterval", false, None),
    ("LocalAuthorizeOffline", false, None),
    ("LocalPreAuthorize", false, None),
    ("MeterValuesAlignedData", false, None),
    ("MeterValuesSampledData", false, None),
    ("MeterValueSampleInterval", false, None),
    ("NumberOfConnectors", true, Some(1)),
    ("ResetRetries", false, None),
    ("StopTransactionOnEVSideDisconnect", false, None),
    ("StopTransactionOnInvalidId", false, None),
    ("StopTxnAlignedData", false, None),
    ("StopTxnSampledData", false, None),
    ("SupportedFeatureProfiles", false, None),
    ("TransactionMessageAttempts", false, None),
    ("TransactionMessageRetryInterval", false, None),
    ("UnlockConnectorOnEVSideDisconnect", false, None),
];

pub(crate) fn register_call_handlers(cp: &Arc<ChargePoint>) {
    cp.on(
        "Reset",
        Box::new(|_cp, payload, ctx| {
            match serde_json::from_value::<ResetRequest>(payload) {
                Ok(req) if req.kind == "Soft" || req.kind == "Hard" => {
                    // Explicit policy: the simulator does not reset.
                    ctx.success(json!({"status": "Rejected"}));
                }
                _ => ctx.error(
                    "PropertyConstraintViolation",
                    "type must be Soft or Hard",
                    json!({}),
                ),
            }
        }),
    );

    // Not implemented by the simulator; explicit policy, not an oversight.
    cp.on(
        "RemoteStopTransaction",
        Box::new(|_cp, _payload, ctx| ctx.success(json!({"status": "Rejected"}))),
    );
    cp.on(
        "UnlockConnector",
        Box::new(|_cp, _payload, ctx| ctx.success(json!({"status": "Rejected"}))),
    );

    cp.on(
        "TriggerMessage",
        Box::new(|cp, payload, ctx| {
            // Only ocpp1.6 knows TriggerMessage; under earlier versions the
            // request is ignored without a response.
            if cp.params().ocpp_version() != Ok(OcppVersion::V16) {
                return;
            }

            let request: TriggerMessageRequest = match serde_json::from_value(payload) {
                Ok(request) => request,
                Err(_) => {
                    ctx.success(json!({"status": "NotImplemented"}));
                    return;
                }
            };
            let connector_id = request.connector_id.unwrap_or(0);

            let status = match request.requested_message.as_str() {
                "BootNotification" => {
                    let cp = cp.clone();
                    tokio::spawn(async move { cp.boot().await });
                    "Accepted"
                }
                "Heartbeat" => {
                    let cp = cp.clone();
                    tokio::spawn(async move {
                        if let Err(e) = cp.send(messages::HEARTBEAT, json!({})).await {
                            cp.notify(Notice::err(e.to_string()));
                        }
                    });
                    "Accepted"
                }
                "StatusNotification" => {
                    let current = cp.status();
                    let cp = cp.clone();
                    tokio::spawn(async move {
                        if let Err(e) = cp.set_status(current, connector_id).await {
                            cp.notify(Notice::err(e.to_string()));
                        }
                    });
                    "Accepted"
                }
                _ => "NotImplemented",
            };

            ctx.success(json!({"status": status}));
        }),
    );

    cp.on(
        "ChangeAvailability",
        Box::new(|cp, payload, ctx| {
            let request = serde_json::from_value::<ChangeAvailabilityRequest>(payload);
            let target = match request.as_ref().map(|r| r.kind.as_str()) {
                Ok("Inoperative") => ChargePointStatus::Unavailable,
                Ok("Operative") => ChargePointStatus::Available,
                _ => {
                    ctx.success(json!({"status": "Rejected"}));
                    return;
                }
            };

            // A live session defers the change until it ends naturally.
            let scheduled = {
                let mut sessions = cp.sessions().write().expect("sessions lock poisoned");
                match sessions.last_mut().filter(|s| s.is_active()) {
                    Some(sess) => {
                        sess.deferred.push(DeferredAction::SetAvailability(target));
                        true
                    }
                    None => false,
                }
            };

            if scheduled {
                ctx.success(json!({"status": "Scheduled"}));
            } else {
                ctx.success(json!({"status": "Accepted"}));
                let cp = cp.clone();
                tokio::spawn(async move {
                    if let Err(e) = cp.set_status(target, 0).await {
                        cp.notify(Notice::err(e.to_string()));
                    }
                });
            }
        }),
    );

    cp.on(
        "GetConfiguration",
        Box::new(|_cp, payload, ctx| {
            let key = payload.get("key").cloned().unwrap_or(Value::Null);
            let requested: Option<Vec<String>> = key.as_array().and_then(|arr| {
                arr.iter()
                    .map(|k| k.as_str().map(str::to_string))
                    .collect()
            });

            let Some(requested) = requested else {
                ctx.error(
                    "FormationViolation",
                    "`key` should be an array of string",
                    json!({ "key": key }),
                );
                return;
            };

            let mut configuration_key = Vec::new();
            let mut unknown_key = Vec::new();
            for name in requested {
                match CONFIGURATION_KEYS.iter().find(|(known, ..)| *known == name) {
                    Some((known, readonly, value)) => configuration_key.push(KeyValue {
                        key: (*known).to_string(),
                        readonly: *readonly,
                        value: value.map(Value::from),
                    }),
                    None => unknown_key.push(name),
                }
            }

            let response = GetConfigurationResponse {
                configuration_key,
                unknown_key,
            };
            match serde_json::to_value(&response) {
                Ok(value) => ctx.success(value),
                Err(e) => ctx.error("InternalError", &e.to_string(), json!({})),
            }
        }),
    );
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use super::super::testkit::*;
    use super::*;
    use crate::domain::{Session, SessionStatus};
    use crate::support::Frame;
    use tokio::sync::mpsc;

    /// Records every raw frame the charge point transmits and answers its
    /// Calls with empty success payloads.
    fn spawn_recorder(
        cp: &Arc<ChargePoint>,
        mut rx: mpsc::UnboundedReceiver<String>,
    ) -> Arc<StdMutex<Vec<String>>> {
        let recorded = Arc::new(StdMutex::new(Vec::new()));
        let sink = recorded.clone();
        let cp = cp.clone();
        tokio::spawn(async move {
            while let Some(raw) = rx.recv().await {
                sink.lock().unwrap().push(raw.clone());
                if let Ok(Frame::Call { unique_id, .. }) = Frame::parse(&raw) {
                    cp.handle_incoming(&Frame::result(&unique_id, json!({})).serialize());
                }
            }
        });
        recorded
    }

    async fn wait_for_frame(
        recorded: &Arc<StdMutex<Vec<String>>>,
        predicate: impl Fn(&str) -> bool,
    ) -> String {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(hit) = recorded
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|raw| predicate(raw))
                    .cloned()
                {
                    return hit;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("expected frame never transmitted")
    }

    fn inbound_call(cp: &Arc<ChargePoint>, id: &str, action: &str, payload: Value) {
        cp.handle_incoming(&Frame::call(id, action, payload).serialize());
    }

    #[tokio::test]
    async fn reset_is_politely_refused() {
        let cp = charge_point(&["AA11"], &[]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);

        inbound_call(&cp, "r1", "Reset", json!({"type": "Soft"}));
        let reply = wait_for_frame(&recorded, |raw| raw.contains("r1")).await;
        match Frame::parse(&reply).unwrap() {
            Frame::CallResult { payload, .. } => assert_eq!(payload["status"], "Rejected"),
            other => panic!("unexpected frame {other:?}"),
        }
        cp.destroy();
    }

    #[tokio::test]
    async fn reset_with_bogus_type_is_a_protocol_error() {
        let cp = charge_point(&["AA11"], &[]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);

        inbound_call(&cp, "r2", "Reset", json!({"type": "Medium"}));
        let reply = wait_for_frame(&recorded, |raw| raw.contains("r2")).await;
        match Frame::parse(&reply).unwrap() {
            Frame::CallError { error_code, .. } => {
                assert_eq!(error_code, "PropertyConstraintViolation");
            }
            other => panic!("unexpected frame {other:?}"),
        }
        // The connection is still usable.
        assert!(cp.is_connected());
        cp.destroy();
    }

    #[tokio::test]
    async fn remote_stop_and_unlock_are_rejected() {
        let cp = charge_point(&["AA11"], &[]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);

        inbound_call(&cp, "m1", "RemoteStopTransaction", json!({"transactionId": 9}));
        inbound_call(&cp, "m2", "UnlockConnector", json!({"connectorId": 1}));

        for id in ["m1", "m2"] {
            let reply = wait_for_frame(&recorded, |raw| raw.contains(id)).await;
            match Frame::parse(&reply).unwrap() {
                Frame::CallResult { payload, .. } => assert_eq!(payload["status"], "Rejected"),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        cp.destroy();
    }

    #[tokio::test]
    async fn unknown_actions_are_silently_ignored() {
        let cp = charge_point(&["AA11"], &[]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);

        inbound_call(&cp, "x1", "DataTransfer", json!({}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recorded.lock().unwrap().is_empty());
        cp.destroy();
    }

    #[tokio::test]
    async fn trigger_message_is_ignored_under_legacy_version() {
        let cp = charge_point(&["AA11"], &[]); // default ocpp1.5
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);

        inbound_call(&cp, "t1", "TriggerMessage", json!({"requestedMessage": "Heartbeat"}));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recorded.lock().unwrap().is_empty());
        cp.destroy();
    }

    #[tokio::test]
    async fn trigger_message_heartbeat_is_accepted_under_v16() {
        let cp = charge_point(&["AA11"], &[("ocppVersion", "ocpp1.6")]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);
        cp.set_accepted(true);

        inbound_call(&cp, "t2", "TriggerMessage", json!({"requestedMessage": "Heartbeat"}));

        let reply = wait_for_frame(&recorded, |raw| raw.contains("t2")).await;
        match Frame::parse(&reply).unwrap() {
            Frame::CallResult { payload, .. } => assert_eq!(payload["status"], "Accepted"),
            other => panic!("unexpected frame {other:?}"),
        }
        // The triggered heartbeat actually goes out.
        wait_for_frame(&recorded, |raw| raw.contains(messages::HEARTBEAT)).await;
        cp.destroy();
    }

    #[tokio::test]
    async fn trigger_message_unsupported_trigger_is_not_implemented() {
        let cp = charge_point(&["AA11"], &[("ocppVersion", "ocpp1.6")]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);

        inbound_call(&cp, "t3", "TriggerMessage", json!({"requestedMessage": "MeterValues"}));
        let reply = wait_for_frame(&recorded, |raw| raw.contains("t3")).await;
        match Frame::parse(&reply).unwrap() {
            Frame::CallResult { payload, .. } => {
                assert_eq!(payload["status"], "NotImplemented");
            }
            other => panic!("unexpected frame {other:?}"),
        }
        cp.destroy();
    }

    #[tokio::test]
    async fn change_availability_applies_immediately_without_a_session() {
        let cp = charge_point(&["AA11"], &[]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);
        cp.set_accepted(true);

        inbound_call(&cp, "a1", "ChangeAvailability", json!({"type": "Inoperative"}));

        let reply = wait_for_frame(&recorded, |raw| raw.contains("a1")).await;
        match Frame::parse(&reply).unwrap() {
            Frame::CallResult { payload, .. } => assert_eq!(payload["status"], "Accepted"),
            other => panic!("unexpected frame {other:?}"),
        }
        // The status change flows out as a StatusNotification.
        wait_for_frame(&recorded, |raw| raw.contains("Unavailable")).await;
        assert_eq!(cp.status(), ChargePointStatus::Unavailable);
        cp.destroy();
    }

    #[tokio::test]
    async fn change_availability_with_unknown_type_is_rejected() {
        let cp = charge_point(&["AA11"], &[]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);

        inbound_call(&cp, "a2", "ChangeAvailability", json!({"type": "HalfOperative"}));
        let reply = wait_for_frame(&recorded, |raw| raw.contains("a2")).await;
        match Frame::parse(&reply).unwrap() {
            Frame::CallResult { payload, .. } => assert_eq!(payload["status"], "Rejected"),
            other => panic!("unexpected frame {other:?}"),
        }
        cp.destroy();
    }

    #[tokio::test]
    async fn change_availability_mid_session_is_scheduled_and_applied_after_stop() {
        let cp = charge_point(&["AA11"], &[]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);
        cp.set_accepted(true);
        cp.set_in_loop_flag(true);

        // A live, accepted session.
        let session_id = {
            let mut sess = Session::with_profile("AA11", 30.0, 15.0, chrono::Utc::now());
            sess.status = SessionStatus::Accepted;
            sess.tx_id = Some(7);
            sess.started = true;
            let id = sess.id.clone();
            cp.sessions().write().unwrap().push(sess);
            id
        };

        inbound_call(&cp, "a3", "ChangeAvailability", json!({"type": "Inoperative"}));
        let reply = wait_for_frame(&recorded, |raw| raw.contains("a3")).await;
        match Frame::parse(&reply).unwrap() {
            Frame::CallResult { payload, .. } => assert_eq!(payload["status"], "Scheduled"),
            other => panic!("unexpected frame {other:?}"),
        }

        // Nothing changed yet; the session is still running.
        assert_ne!(cp.status(), ChargePointStatus::Unavailable);
        assert!(cp.in_loop());

        // When the session ends, the deferred change lands and the loop stops.
        cp.stop_charging(&session_id).await.unwrap();
        assert_eq!(cp.status(), ChargePointStatus::Unavailable);
        assert!(!cp.in_loop());
        wait_for_frame(&recorded, |raw| raw.contains(messages::STOP_TRANSACTION)).await;
        cp.destroy();
    }

    #[tokio::test]
    async fn get_configuration_partitions_known_and_unknown_keys() {
        let cp = charge_point(&["AA11"], &[]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);

        inbound_call(
            &cp,
            "g1",
            "GetConfiguration",
            json!({"key": ["HeartbeatInterval", "GetConfigurationMaxKeys", "NoSuchKey"]}),
        );

        let reply = wait_for_frame(&recorded, |raw| raw.contains("g1")).await;
        let Frame::CallResult { payload, .. } = Frame::parse(&reply).unwrap() else {
            panic!("expected CallResult");
        };
        let known = payload["configurationKey"].as_array().unwrap();
        assert_eq!(known.len(), 2);
        assert_eq!(known[0]["key"], "HeartbeatInterval");
        assert_eq!(known[0]["readonly"], false);
        assert!(known[0].get("value").is_none());
        assert_eq!(known[1]["key"], "GetConfigurationMaxKeys");
        assert_eq!(known[1]["readonly"], true);
        assert_eq!(known[1]["value"], 100);
        assert_eq!(payload["unknownKey"], json!(["NoSuchKey"]));
        cp.destroy();
    }

    #[tokio::test]
    async fn get_configuration_rejects_a_non_string_key_list() {
        let cp = charge_point(&["AA11"], &[]);
        let rx = attach_fake_transport(&cp);
        let recorded = spawn_recorder(&cp, rx);

        inbound_call(&cp, "g2", "GetConfiguration", json!({"key": [1, 2, 3]}));
        let reply = wait_for_frame(&recorded, |raw| raw.contains("g2")).await;
        match Frame::parse(&reply).unwrap() {
            Frame::CallError {
                error_code,
                error_details,
                ..
            } => {
                assert_eq!(error_code, "FormationViolation");
                assert_eq!(error_details["key"], json!([1, 2, 3]));
            }
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(cp.is_connected());
        cp.destroy();
    }
}
