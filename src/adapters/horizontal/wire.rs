//! Wire envelopes exchanged between nodes.
//!
//! All nodes of one cluster share a driver and therefore these shapes and
//! their JSON encoding. Maps travel as arrays of `[key, value]` pairs and sets
//! as arrays, and are rebuilt on receipt.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{AppId, RequestType, SocketId, SocketInfo};
use crate::ports::AdapterError;

/// A user message to be delivered by every other node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastEnvelope {
    /// Id of the origin node.
    pub uuid: String,
    pub app_id: AppId,
    pub channel: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excepting_id: Option<SocketId>,
}

/// Query parameters carried by a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_id: Option<SocketId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl RequestOptions {
    pub fn channel(channel: &str) -> Self {
        Self {
            channel: Some(channel.to_string()),
            ..Default::default()
        }
    }

    pub fn socket_in_channel(channel: &str, socket_id: &SocketId) -> Self {
        Self {
            channel: Some(channel.to_string()),
            socket_id: Some(socket_id.clone()),
            ..Default::default()
        }
    }

    pub fn user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            ..Default::default()
        }
    }
}

/// A scatter-gather request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub request_id: String,
    pub app_id: AppId,
    #[serde(rename = "type")]
    pub request_type: RequestType,
    #[serde(default)]
    pub opts: RequestOptions,
    /// Issuing node, set on requests that expect no response and therefore
    /// have no pending entry to recognise them by.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// A peer's local answer to a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub request_id: String,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

/// Type-specific body of a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponsePayload {
    Sockets(Vec<(SocketId, SocketInfo)>),
    Channels(Vec<(String, Vec<SocketId>)>),
    ChannelCounts(Vec<(String, usize)>),
    Members(Vec<(String, Value)>),
    TotalCount(usize),
    Exists(bool),
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, AdapterError> {
    serde_json::to_vec(message).map_err(|e| AdapterError::Encode(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, AdapterError> {
    serde_json::from_slice(payload).map_err(|e| AdapterError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn broadcast_envelope_uses_camel_case_fields() {
        let envelope = BroadcastEnvelope {
            uuid: "node-a".into(),
            app_id: AppId::from("app"),
            channel: "c1".into(),
            data: json!({"event": "e"}),
            excepting_id: Some(SocketId::new("1.1")),
        };

        let value: Value = serde_json::from_slice(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(value["appId"], "app");
        assert_eq!(value["exceptingId"], "1.1");
        assert_eq!(value["uuid"], "node-a");
    }

    #[test]
    fn request_envelope_names_type_field() {
        let envelope = RequestEnvelope {
            request_id: "r1".into(),
            app_id: AppId::from("app"),
            request_type: RequestType::ChannelSocketsCount,
            opts: RequestOptions::channel("c1"),
            origin: None,
        };

        let value: Value = serde_json::from_slice(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(value["type"], "channel_sockets_count");
        assert_eq!(value["opts"], json!({"channel": "c1"}));
        assert!(value.get("origin").is_none());
    }

    #[test]
    fn response_payload_is_flattened_next_to_request_id() {
        let envelope = ResponseEnvelope {
            request_id: "r1".into(),
            payload: ResponsePayload::Channels(vec![(
                "c1".into(),
                vec![SocketId::new("1.1"), SocketId::new("1.2")],
            )]),
        };

        let value: Value = serde_json::from_slice(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(value, json!({"requestId": "r1", "channels": [["c1", ["1.1", "1.2"]]]}));

        let decoded: ResponseEnvelope = decode(&encode(&envelope).unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn members_response_decodes_from_pairs() {
        let raw = br#"{"requestId":"r9","members":[["1",{"name":"John"}]]}"#;
        let decoded: ResponseEnvelope = decode(raw).unwrap();
        assert_eq!(
            decoded.payload,
            ResponsePayload::Members(vec![("1".into(), json!({"name": "John"}))])
        );
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let result: Result<RequestEnvelope, _> = decode(b"not json");
        assert!(matches!(result, Err(AdapterError::Decode(_))));
    }
}
