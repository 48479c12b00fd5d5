//! HTTP DTOs for the app API.
//!
//! Shapes follow the Pusher HTTP API so existing server libraries can talk
//! to it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::ports::AdapterError;

/// Most channels one publish may target.
pub const MAX_EVENT_CHANNELS: usize = 100;

// ════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════

/// `info` and `filter_by_prefix` query parameters.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelsQuery {
    #[serde(default)]
    pub filter_by_prefix: Option<String>,
    /// Comma-separated attributes: `user_count`, `subscription_count`
    #[serde(default)]
    pub info: Option<String>,
}

impl ChannelsQuery {
    pub fn wants(&self, attribute: &str) -> bool {
        self.info
            .as_deref()
            .map(|info| info.split(',').any(|a| a.trim() == attribute))
            .unwrap_or(false)
    }
}

/// Request to publish an event.
#[derive(Debug, Clone, Deserialize)]
pub struct PublishEventRequest {
    pub name: String,
    /// Event payload; non-string values are sent JSON-encoded
    pub data: Value,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub channel: Option<String>,
    /// Socket to exclude from delivery
    #[serde(default)]
    pub socket_id: Option<String>,
}

impl PublishEventRequest {
    /// Target channels from either `channels` or `channel`.
    pub fn targets(&self) -> Vec<String> {
        let mut targets = self.channels.clone();
        if let Some(channel) = &self.channel {
            if !targets.contains(channel) {
                targets.push(channel.clone());
            }
        }
        targets
    }

    pub fn data_string(&self) -> String {
        match &self.data {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_count: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelsResponse {
    pub channels: BTreeMap<String, ChannelAttributes>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelResponse {
    pub occupied: bool,
    #[serde(flatten)]
    pub attributes: ChannelAttributes,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserEntry {
    pub id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UsersResponse {
    pub users: Vec<UserEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn adapter(error: &AdapterError) -> Self {
        let code = if error.is_timeout() {
            "CLUSTER_TIMEOUT"
        } else {
            "ADAPTER_ERROR"
        };
        Self {
            code: code.to_string(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn info_attributes_are_parsed() {
        let query = ChannelsQuery {
            info: Some("user_count, subscription_count".into()),
            ..Default::default()
        };
        assert!(query.wants("user_count"));
        assert!(query.wants("subscription_count"));
        assert!(!ChannelsQuery::default().wants("user_count"));
    }

    #[test]
    fn publish_targets_merge_channel_and_channels() {
        let request: PublishEventRequest = serde_json::from_value(json!({
            "name": "e",
            "data": {"a": 1},
            "channels": ["c1", "c2"],
            "channel": "c1",
        }))
        .unwrap();
        assert_eq!(request.targets(), vec!["c1", "c2"]);
        assert_eq!(request.data_string(), r#"{"a":1}"#);
    }

    #[test]
    fn channel_response_flattens_attributes() {
        let response = ChannelResponse {
            occupied: true,
            attributes: ChannelAttributes {
                user_count: None,
                subscription_count: Some(3),
            },
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"occupied": true, "subscription_count": 3})
        );
    }

    #[test]
    fn timeout_has_its_own_code() {
        let error = AdapterError::Timeout {
            request_id: "r".into(),
            request_type: crate::domain::RequestType::ChannelMembers,
            received: 1,
            expected: 2,
        };
        assert_eq!(ErrorResponse::adapter(&error).code, "CLUSTER_TIMEOUT");
    }
}
