//! Wire formats of the queue endpoints.
//!
//! Requests are flat JSON objects. Message content travels base64 encoded and
//! timestamps as epoch milliseconds. Responses use the short keys `s`
//! (status), `m` (message), `r` (result) and `v` (value).

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::{QueueMessage, QueueResponse, ResponseValue};

#[derive(Debug, Default, Deserialize)]
pub struct QueueRequest {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub queue_name: Option<String>,
    #[serde(default)]
    pub queue_id: Option<i64>,
    #[serde(default)]
    pub org_timestamp: Option<i64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub num_requeues: Option<i32>,
    /// Base64 encoded payload
    #[serde(default)]
    pub content: Option<String>,
}

impl QueueRequest {
    pub fn secret(&self) -> &str {
        self.secret.as_deref().unwrap_or_default()
    }

    pub fn queue_name(&self) -> &str {
        self.queue_name.as_deref().unwrap_or_default()
    }

    /// Decoded content. Missing content is empty.
    pub fn content_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        match self.content.as_deref() {
            Some(encoded) if !encoded.is_empty() => STANDARD.decode(encoded),
            _ => Ok(Vec::new()),
        }
    }

    /// Message described by the request fields.
    pub fn to_message(&self) -> Result<QueueMessage, base64::DecodeError> {
        let now = Utc::now();
        let original_timestamp = self.org_timestamp.map(millis_to_datetime).unwrap_or(now);
        let timestamp = self.timestamp.map(millis_to_datetime).unwrap_or(now);

        Ok(QueueMessage::from_parts(
            self.queue_id.unwrap_or_default(),
            original_timestamp,
            timestamp,
            self.num_requeues.unwrap_or_default(),
            self.content_bytes()?,
        ))
    }
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub queue_id: i64,
    pub org_timestamp: i64,
    pub timestamp: i64,
    pub num_requeues: i32,
    /// Base64 encoded payload
    pub content: String,
}

impl From<&QueueMessage> for WireMessage {
    fn from(msg: &QueueMessage) -> Self {
        Self {
            queue_id: msg.id,
            org_timestamp: msg.original_timestamp.timestamp_millis(),
            timestamp: msg.timestamp.timestamp_millis(),
            num_requeues: msg.num_requeues,
            content: STANDARD.encode(&msg.content),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireValue {
    Message(WireMessage),
    Size(i64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireResponse {
    #[serde(rename = "s")]
    pub status: u16,
    #[serde(rename = "m")]
    pub message: String,
    #[serde(rename = "r")]
    pub result: bool,
    #[serde(rename = "v", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<WireValue>,
}

impl WireResponse {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: 400,
            message: message.into(),
            result: false,
            value: None,
        }
    }
}

impl From<QueueResponse> for WireResponse {
    fn from(response: QueueResponse) -> Self {
        let value = response.value.map(|v| match v {
            ResponseValue::Message(ref msg) => WireValue::Message(msg.into()),
            ResponseValue::Size(size) => WireValue::Size(size),
        });

        Self {
            status: response.status,
            message: response.message,
            result: response.result,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_to_message() {
        let request: QueueRequest = serde_json::from_str(
            r#"{
                "secret": "s",
                "queue_name": "orders",
                "queue_id": 7,
                "org_timestamp": 1700000000000,
                "timestamp": 1700000005000,
                "num_requeues": 2,
                "content": "aGVsbG8="
            }"#,
        )
        .unwrap();

        let msg = request.to_message().unwrap();
        assert_eq!(msg.id, 7);
        assert_eq!(msg.original_timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(msg.timestamp.timestamp_millis(), 1_700_000_005_000);
        assert_eq!(msg.num_requeues, 2);
        assert_eq!(msg.content, b"hello".to_vec());
    }

    #[test]
    fn test_missing_fields_default() {
        let request: QueueRequest = serde_json::from_str(r#"{"queue_name": null}"#).unwrap();

        assert_eq!(request.secret(), "");
        assert_eq!(request.queue_name(), "");
        assert!(request.content_bytes().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_base64_rejected() {
        let request = QueueRequest {
            content: Some("not base64!".to_string()),
            ..Default::default()
        };
        assert!(request.content_bytes().is_err());
    }

    #[test]
    fn test_response_keys() {
        let response = WireResponse {
            status: 200,
            message: String::new(),
            result: true,
            value: Some(WireValue::Size(3)),
        };
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json, serde_json::json!({"s": 200, "m": "", "r": true, "v": 3}));
    }

    #[test]
    fn test_value_omitted_when_absent() {
        let json = serde_json::to_value(WireResponse::bad_request("nope")).unwrap();
        assert!(json.get("v").is_none());
    }
}
