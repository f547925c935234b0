//! Status messages received on `/watchdog/{id}/status`
//!
//! Payloads are opaque. A payload that is not JSON is kept as raw text rather
//! than dropped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Payload text that failed to parse as JSON
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawText(pub String);

impl fmt::Display for RawText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-UTF-8 bytes are converted lossily into the raw text.
pub fn try_parse_json(payload: &[u8]) -> Result<Value, RawText> {
    serde_json::from_slice(payload).map_err(|_| RawText(String::from_utf8_lossy(payload).into_owned()))
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatusPayload {
    Json(Value),
    Raw(String),
}

impl StatusPayload {
    pub fn from_bytes(payload: &[u8]) -> Self {
        match try_parse_json(payload) {
            Ok(value) => StatusPayload::Json(value),
            Err(RawText(text)) => StatusPayload::Raw(text),
        }
    }

    /// JSON pretty-printed with two-space indentation, raw text untouched
    pub fn render(&self) -> String {
        match self {
            StatusPayload::Json(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            StatusPayload::Raw(text) => text.clone(),
        }
    }

    /// Typed view of the firmware's periodic online report, when it matches
    pub fn device_status(&self) -> Option<DeviceStatus> {
        match self {
            StatusPayload::Json(value) => DeviceStatus::deserialize(value).ok(),
            StatusPayload::Raw(_) => None,
        }
    }
}

/// Online report the firmware publishes after connecting and once a minute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub status: String,
    /// Seconds since the device booted
    pub uptime: u64,
    pub ip: Option<String>,
    pub rssi: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub topic: String,
    pub payload: StatusPayload,
    pub received_at: DateTime<Utc>,
}

impl StatusMessage {
    pub fn from_publish(topic: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            payload: StatusPayload::from_bytes(payload),
            received_at: Utc::now(),
        }
    }
}
