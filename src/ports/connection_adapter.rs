//! ConnectionAdapter port - the connection and channel registry contract.
//!
//! The WebSocket gateway and HTTP API only ever talk to this trait. A
//! single-node implementation answers from local state; a horizontal one
//! combines the local answer with the answers of every other node.
//!
//! Every query takes an `only_local` flag. When set, implementations answer
//! from this node's state without any network I/O.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::domain::{AppId, RequestType, Socket, SocketId, SocketInfo};

use super::TransportError;

/// Errors surfaced by connection adapters.
///
/// Of the protocol errors only `Timeout` ever reaches callers of a query;
/// malformed and stale wire messages are dropped inside the adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("{request_type} request {request_id} timed out with {received}/{expected} responses")]
    Timeout {
        request_id: String,
        request_type: RequestType,
        received: usize,
        expected: usize,
    },

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("failed to encode wire message: {0}")]
    Encode(String),

    #[error("failed to decode wire message: {0}")]
    Decode(String),

    #[error("request {0} was abandoned before completion")]
    Abandoned(String),
}

impl AdapterError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AdapterError::Timeout { .. })
    }
}

/// Port for connection, channel and presence bookkeeping.
#[async_trait]
pub trait ConnectionAdapter: Send + Sync {
    /// Registers a connection. Overwrites an existing entry with the same id.
    async fn add_socket(&self, app_id: &AppId, socket: Arc<Socket>) -> Result<bool, AdapterError>;

    /// Removes a connection from every channel and from the registry.
    /// Removing an unknown id is a no-op.
    async fn remove_socket(&self, app_id: &AppId, socket_id: &SocketId)
        -> Result<bool, AdapterError>;

    /// Subscribes a socket; returns the channel's local member count.
    async fn add_to_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket: Arc<Socket>,
    ) -> Result<usize, AdapterError>;

    /// Unsubscribes a socket; returns the remaining local member count,
    /// 0 when the channel no longer exists.
    async fn remove_from_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket_id: &SocketId,
    ) -> Result<usize, AdapterError>;

    /// Batch form used during disconnect cleanup.
    async fn remove_from_channels(
        &self,
        app_id: &AppId,
        channels: &[String],
        socket_id: &SocketId,
    ) -> Result<(), AdapterError>;

    /// Delivers `data` to every subscriber of `channel` except `except`.
    async fn send(
        &self,
        app_id: &AppId,
        channel: &str,
        data: Value,
        except: Option<&SocketId>,
    ) -> Result<(), AdapterError>;

    /// Disconnects every connection of a user.
    async fn terminate_user_connections(
        &self,
        app_id: &AppId,
        user_id: &str,
    ) -> Result<(), AdapterError>;

    async fn get_sockets(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<HashMap<SocketId, SocketInfo>, AdapterError>;

    async fn get_sockets_count(&self, app_id: &AppId, only_local: bool)
        -> Result<usize, AdapterError>;

    async fn get_channels(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<HashMap<String, HashSet<SocketId>>, AdapterError>;

    async fn get_channels_with_sockets_count(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<HashMap<String, usize>, AdapterError>;

    async fn get_channel_sockets(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<HashMap<SocketId, SocketInfo>, AdapterError>;

    async fn get_channel_sockets_count(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<usize, AdapterError>;

    /// Presence members of a channel keyed by user id.
    async fn get_channel_members(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<HashMap<String, Value>, AdapterError>;

    async fn get_channel_members_count(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<usize, AdapterError>;

    async fn is_in_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket_id: &SocketId,
        only_local: bool,
    ) -> Result<bool, AdapterError>;

    /// Indexes a socket under its authenticated user, if any.
    async fn add_user(&self, socket: Arc<Socket>) -> Result<(), AdapterError>;

    async fn remove_user(&self, socket: &Socket) -> Result<(), AdapterError>;

    /// Live handles of a user's connections on this node.
    async fn get_user_sockets(
        &self,
        app_id: &AppId,
        user_id: &str,
    ) -> Result<Vec<Arc<Socket>>, AdapterError>;

    /// Replaces an app's namespace with an empty one.
    async fn clear_namespace(&self, app_id: &AppId) -> Result<(), AdapterError>;

    async fn clear_namespaces(&self) -> Result<(), AdapterError>;

    /// Releases the transport, if any.
    async fn disconnect(&self) -> Result<(), AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn ConnectionAdapter) {}

    #[test]
    fn timeout_message_names_progress() {
        let err = AdapterError::Timeout {
            request_id: "r1".into(),
            request_type: RequestType::ChannelMembers,
            received: 2,
            expected: 3,
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "channel_members request r1 timed out with 2/3 responses"
        );
    }
}
