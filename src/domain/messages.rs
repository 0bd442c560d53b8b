//! Typed payloads for the OCPP message subset the simulator speaks
//!
//! Field names follow the camelCase wire encoding shared by ocpp1.5 and
//! ocpp1.6 for these messages. Response statuses are kept as plain strings:
//! the simulator must report, not reject, a status value it does not know.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::ChargePointStatus;

pub const BOOT_NOTIFICATION: &str = "BootNotification";
pub const HEARTBEAT: &str = "Heartbeat";
pub const AUTHORIZE: &str = "Authorize";
pub const START_TRANSACTION: &str = "StartTransaction";
pub const STOP_TRANSACTION: &str = "StopTransaction";
pub const STATUS_NOTIFICATION: &str = "StatusNotification";

pub const ACCEPTED: &str = "Accepted";
pub const REJECTED: &str = "Rejected";
pub const PENDING: &str = "Pending";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationRequest {
    pub charge_point_model: String,
    pub charge_point_vendor: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootNotificationResponse {
    pub status: String,
    #[serde(default)]
    pub current_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub interval: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub id_tag: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdTagInfo {
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub id_tag_info: IdTagInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionRequest {
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTransactionResponse {
    pub transaction_id: i64,
    #[serde(default)]
    pub id_tag_info: Option<IdTagInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTransactionRequest {
    pub id_tag: String,
    pub meter_stop: u64,
    pub timestamp: DateTime<Utc>,
    pub transaction_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusNotificationRequest {
    pub connector_id: u32,
    pub error_code: String,
    pub status: ChargePointStatus,
}

// ── Inbound requests from the central system ───────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ResetRequest {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerMessageRequest {
    pub requested_message: String,
    #[serde(default)]
    pub connector_id: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeAvailabilityRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub connector_id: Option<u32>,
}

/// One entry of a GetConfiguration response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyValue {
    pub key: String,
    pub readonly: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetConfigurationResponse {
    pub configuration_key: Vec<KeyValue>,
    pub unknown_key: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_encode_camel_case() {
        let req = StartTransactionRequest {
            connector_id: 1,
            id_tag: "ABC123".into(),
            meter_start: 4200,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["connectorId"], 1);
        assert_eq!(json["idTag"], "ABC123");
        assert_eq!(json["meterStart"], 4200);
    }

    #[test]
    fn responses_decode_camel_case() {
        let resp: StartTransactionResponse = serde_json::from_value(serde_json::json!({
            "transactionId": 77,
            "idTagInfo": { "status": "Accepted" }
        }))
        .unwrap();
        assert_eq!(resp.transaction_id, 77);
        assert_eq!(resp.id_tag_info.unwrap().status, ACCEPTED);
    }

    #[test]
    fn boot_response_tolerates_missing_optionals() {
        let resp: BootNotificationResponse =
            serde_json::from_value(serde_json::json!({ "status": "Pending" })).unwrap();
        assert_eq!(resp.status, PENDING);
        assert!(resp.interval.is_none());
    }

    #[test]
    fn reset_request_reads_type_field() {
        let req: ResetRequest = serde_json::from_value(serde_json::json!({"type": "Hard"})).unwrap();
        assert_eq!(req.kind, "Hard");
    }

    #[test]
    fn key_value_omits_absent_value() {
        let kv = KeyValue {
            key: "HeartbeatInterval".into(),
            readonly: false,
            value: None,
        };
        let json = serde_json::to_value(&kv).unwrap();
        assert!(json.get("value").is_none());
    }
}
