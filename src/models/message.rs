//! Inbound response messages delivered on a session's callback channel.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header naming the registration a response is addressed to.
pub const CALLBACK_ID_HEADER: &str = "x-callback-id";

/// Action the broker sends periodically to keep cloud-hosted channels open.
pub const HEARTBEAT_ACTION: &str = "broker/heartbeat";

/// One response message pushed by the broker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct ResponseMessage {
    /// Message action string.
    pub action: String,
    /// String headers attached by the broker.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Response payload.
    #[serde(default)]
    pub body: Value,
}

impl ResponseMessage {
    /// Message with no headers.
    #[must_use]
    pub fn new(action: impl Into<String>, body: Value) -> Self {
        Self {
            action: action.into(),
            headers: HashMap::new(),
            body,
        }
    }

    /// Heartbeat message.
    #[must_use]
    pub fn heartbeat() -> Self {
        Self::new(HEARTBEAT_ACTION, Value::Null)
    }

    /// Builder-style header insertion.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Registration id the message is addressed to.
    #[must_use]
    pub fn callback_id(&self) -> Option<&str> {
        self.headers.get(CALLBACK_ID_HEADER).map(String::as_str)
    }

    /// Whether this is a keep-alive heartbeat.
    #[must_use]
    pub fn is_heartbeat(&self) -> bool {
        self.action == HEARTBEAT_ACTION
    }
}
