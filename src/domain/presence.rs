//! Presence membership and connection snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::SocketId;

/// A user's presence in one presence channel, attached to the socket that
/// joined it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMember {
    pub user_id: String,
    #[serde(default)]
    pub user_info: Value,
}

impl PresenceMember {
    pub fn new(user_id: impl Into<String>, user_info: Value) -> Self {
        Self {
            user_id: user_id.into(),
            user_info,
        }
    }
}

/// Authenticated user identity carried by a socket after sign-in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserData {
    pub id: String,
    #[serde(default)]
    pub user_info: Value,
}

impl UserData {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            user_info: Value::Null,
        }
    }
}

/// Serializable snapshot of a socket.
///
/// Live socket handles never leave the node that owns them; cluster-wide
/// socket queries return these snapshots instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketInfo {
    pub id: SocketId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub presence: HashMap<String, PresenceMember>,
}
