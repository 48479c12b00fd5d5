//! Pusher protocol frames.
//!
//! Client frames are `{"event", "channel"?, "data"}`. Server frames carry
//! their `data` as a JSON-encoded string, as Pusher clients expect.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::domain::{PresenceMember, SocketId};

/// Seconds a client may stay silent before it should ping.
pub const ACTIVITY_TIMEOUT_SECS: u64 = 120;

// ============================================
// Client → Server
// ============================================

#[derive(Debug, Clone, Deserialize)]
struct RawClientMessage {
    event: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    data: Value,
}

/// Payload of `pusher:subscribe`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscribeRequest {
    pub channel: String,
    #[serde(default)]
    pub auth: Option<String>,
    /// JSON-encoded `{user_id, user_info}` for presence channels
    #[serde(default)]
    pub channel_data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct UnsubscribeRequest {
    channel: String,
}

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Subscribe(SubscribeRequest),
    Unsubscribe { channel: String },
    Ping,
    /// `client-*` event relayed to the other subscribers
    ClientEvent {
        event: String,
        channel: String,
        data: Value,
    },
}

impl ClientMessage {
    /// Parses a text frame. `None` for malformed or unsupported frames.
    pub fn parse(text: &str) -> Option<Self> {
        let raw: RawClientMessage = serde_json::from_str(text).ok()?;
        match raw.event.as_str() {
            "pusher:subscribe" => serde_json::from_value(raw.data)
                .ok()
                .map(ClientMessage::Subscribe),
            "pusher:unsubscribe" => serde_json::from_value::<UnsubscribeRequest>(raw.data)
                .ok()
                .map(|r| ClientMessage::Unsubscribe { channel: r.channel }),
            "pusher:ping" => Some(ClientMessage::Ping),
            event if event.starts_with("client-") => Some(ClientMessage::ClientEvent {
                event: raw.event.clone(),
                channel: raw.channel?,
                data: raw.data,
            }),
            _ => None,
        }
    }
}

/// Reads presence `channel_data`. Numeric user ids are accepted.
pub fn parse_channel_data(channel_data: &str) -> Option<PresenceMember> {
    let value: Value = serde_json::from_str(channel_data).ok()?;
    let user_id = match value.get("user_id")? {
        Value::String(id) if !id.is_empty() => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };
    let user_info = value.get("user_info").cloned().unwrap_or(Value::Null);
    Some(PresenceMember::new(user_id, user_info))
}

// ============================================
// Server → Client
// ============================================

fn frame(event: &str, channel: Option<&str>, data: Value) -> Value {
    let mut message = json!({
        "event": event,
        "data": data.to_string(),
    });
    if let Some(channel) = channel {
        message["channel"] = Value::String(channel.to_string());
    }
    message
}

pub fn connection_established(socket_id: &SocketId) -> Value {
    frame(
        "pusher:connection_established",
        None,
        json!({
            "socket_id": socket_id,
            "activity_timeout": ACTIVITY_TIMEOUT_SECS,
        }),
    )
}

pub fn pong() -> Value {
    frame("pusher:pong", None, json!({}))
}

pub fn error(code: Option<u16>, message: &str) -> Value {
    frame(
        "pusher:error",
        None,
        json!({
            "code": code,
            "message": message,
        }),
    )
}

pub fn subscription_succeeded(channel: &str) -> Value {
    frame(
        "pusher_internal:subscription_succeeded",
        Some(channel),
        json!({}),
    )
}

/// Subscription confirmation carrying the cluster-wide member list.
pub fn presence_subscription_succeeded(channel: &str, members: &HashMap<String, Value>) -> Value {
    let ids: Vec<&String> = members.keys().collect();
    frame(
        "pusher_internal:subscription_succeeded",
        Some(channel),
        json!({
            "presence": {
                "ids": ids,
                "hash": members,
                "count": members.len(),
            }
        }),
    )
}

pub fn subscription_error(channel: &str, status: u16, error: &str) -> Value {
    frame(
        "pusher:subscription_error",
        Some(channel),
        json!({
            "type": "AdapterError",
            "error": error,
            "status": status,
        }),
    )
}

pub fn member_added(channel: &str, member: &PresenceMember) -> Value {
    frame(
        "pusher_internal:member_added",
        Some(channel),
        json!({
            "user_id": member.user_id,
            "user_info": member.user_info,
        }),
    )
}

pub fn member_removed(channel: &str, user_id: &str) -> Value {
    frame(
        "pusher_internal:member_removed",
        Some(channel),
        json!({ "user_id": user_id }),
    )
}

/// A relayed `client-*` event. Presence channels name the sender.
pub fn client_event(event: &str, channel: &str, data: &Value, user_id: Option<&str>) -> Value {
    let mut message = json!({
        "event": event,
        "channel": channel,
        "data": data,
    });
    if let Some(user_id) = user_id {
        message["user_id"] = Value::String(user_id.to_string());
    }
    message
}
