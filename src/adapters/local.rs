//! Single-node connection adapter.
//!
//! Answers every query from in-memory namespaces and never touches the
//! network. The horizontal adapter composes one of these for its local half.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::{server_to_user_target, AppId, Socket, SocketId, SocketInfo};
use crate::ports::{AdapterError, ConnectionAdapter};

use super::namespace::Namespace;

/// In-memory adapter holding one [`Namespace`] per app.
#[derive(Debug, Default)]
pub struct LocalAdapter {
    namespaces: RwLock<HashMap<AppId, Arc<Namespace>>>,
}

impl LocalAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the app's namespace, creating it on first reference.
    pub async fn namespace(&self, app_id: &AppId) -> Arc<Namespace> {
        if let Some(ns) = self.namespaces.read().await.get(app_id) {
            return ns.clone();
        }

        self.namespaces
            .write()
            .await
            .entry(app_id.clone())
            .or_insert_with(|| Arc::new(Namespace::new(app_id.clone())))
            .clone()
    }

    /// Returns the app's namespace if it has one. Queries go through here so
    /// that asking about an unknown app leaves no state behind.
    pub async fn existing(&self, app_id: &AppId) -> Option<Arc<Namespace>> {
        self.namespaces.read().await.get(app_id).cloned()
    }

    pub async fn namespaces(&self) -> Vec<(AppId, Arc<Namespace>)> {
        self.namespaces
            .read()
            .await
            .iter()
            .map(|(id, ns)| (id.clone(), ns.clone()))
            .collect()
    }

    /// Replaces the app's namespace with an empty one. Socket handles taken
    /// from the old namespace are orphaned.
    pub async fn clear_namespace(&self, app_id: &AppId) {
        self.namespaces
            .write()
            .await
            .insert(app_id.clone(), Arc::new(Namespace::new(app_id.clone())));
    }

    pub async fn clear_namespaces(&self) {
        self.namespaces.write().await.clear();
    }

    /// Delivers `data` to this node's subscribers of `channel`.
    ///
    /// Server-to-user destinations resolve the user's connections instead of
    /// a channel. A failed write to one socket never stops delivery to the
    /// others.
    pub async fn deliver(
        &self,
        app_id: &AppId,
        channel: &str,
        data: &Value,
        except: Option<&SocketId>,
    ) {
        let Some(ns) = self.existing(app_id).await else {
            return;
        };

        let targets: Vec<Arc<Socket>> = match server_to_user_target(channel) {
            Some(user_id) => ns.user_sockets(user_id).await,
            None => ns.channel_sockets(channel).await.into_values().collect(),
        };

        if targets.is_empty() {
            return;
        }

        let text = data.to_string();
        for socket in targets {
            if except == Some(socket.id()) {
                continue;
            }
            if let Err(e) = socket.send_text(text.clone()) {
                tracing::debug!(
                    app_id = %app_id,
                    channel,
                    "Dropping message for socket: {}",
                    e
                );
            }
        }
    }

    pub async fn sockets_snapshot(&self, app_id: &AppId) -> HashMap<SocketId, SocketInfo> {
        match self.existing(app_id).await {
            Some(ns) => snapshot(ns.sockets().await).await,
            None => HashMap::new(),
        }
    }

    pub async fn channel_sockets_snapshot(
        &self,
        app_id: &AppId,
        channel: &str,
    ) -> HashMap<SocketId, SocketInfo> {
        match self.existing(app_id).await {
            Some(ns) => snapshot(ns.channel_sockets(channel).await).await,
            None => HashMap::new(),
        }
    }

    pub async fn sockets_count(&self, app_id: &AppId) -> usize {
        match self.existing(app_id).await {
            Some(ns) => ns.sockets_count().await,
            None => 0,
        }
    }

    pub async fn channels(&self, app_id: &AppId) -> HashMap<String, HashSet<SocketId>> {
        match self.existing(app_id).await {
            Some(ns) => ns.channels().await,
            None => HashMap::new(),
        }
    }

    pub async fn channels_with_sockets_count(&self, app_id: &AppId) -> HashMap<String, usize> {
        match self.existing(app_id).await {
            Some(ns) => ns.channels_with_sockets_count().await,
            None => HashMap::new(),
        }
    }

    pub async fn channel_sockets_count(&self, app_id: &AppId, channel: &str) -> usize {
        match self.existing(app_id).await {
            Some(ns) => ns.channel_sockets_count(channel).await,
            None => 0,
        }
    }

    pub async fn channel_members(&self, app_id: &AppId, channel: &str) -> HashMap<String, Value> {
        match self.existing(app_id).await {
            Some(ns) => ns.channel_members(channel).await,
            None => HashMap::new(),
        }
    }

    pub async fn channel_members_count(&self, app_id: &AppId, channel: &str) -> usize {
        self.channel_members(app_id, channel).await.len()
    }

    pub async fn socket_in_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket_id: &SocketId,
    ) -> bool {
        match self.existing(app_id).await {
            Some(ns) => ns.is_in_channel(socket_id, channel).await,
            None => false,
        }
    }

    pub async fn terminate_user_connections(&self, app_id: &AppId, user_id: &str) {
        if let Some(ns) = self.existing(app_id).await {
            ns.terminate_user_connections(user_id).await;
        }
    }
}

async fn snapshot(sockets: HashMap<SocketId, Arc<Socket>>) -> HashMap<SocketId, SocketInfo> {
    let mut infos = HashMap::with_capacity(sockets.len());
    for (id, socket) in sockets {
        infos.insert(id, socket.info().await);
    }
    infos
}

#[async_trait]
impl ConnectionAdapter for LocalAdapter {
    async fn add_socket(&self, app_id: &AppId, socket: Arc<Socket>) -> Result<bool, AdapterError> {
        Ok(self.namespace(app_id).await.add_socket(socket).await)
    }

    async fn remove_socket(
        &self,
        app_id: &AppId,
        socket_id: &SocketId,
    ) -> Result<bool, AdapterError> {
        match self.existing(app_id).await {
            Some(ns) => Ok(ns.remove_socket(socket_id).await),
            None => Ok(false),
        }
    }

    async fn add_to_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket: Arc<Socket>,
    ) -> Result<usize, AdapterError> {
        Ok(self
            .namespace(app_id)
            .await
            .add_to_channel(&socket, channel)
            .await)
    }

    async fn remove_from_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket_id: &SocketId,
    ) -> Result<usize, AdapterError> {
        match self.existing(app_id).await {
            Some(ns) => Ok(ns.remove_from_channel(socket_id, channel).await),
            None => Ok(0),
        }
    }

    async fn remove_from_channels(
        &self,
        app_id: &AppId,
        channels: &[String],
        socket_id: &SocketId,
    ) -> Result<(), AdapterError> {
        if let Some(ns) = self.existing(app_id).await {
            ns.remove_from_channels(socket_id, channels).await;
        }
        Ok(())
    }

    async fn send(
        &self,
        app_id: &AppId,
        channel: &str,
        data: Value,
        except: Option<&SocketId>,
    ) -> Result<(), AdapterError> {
        self.deliver(app_id, channel, &data, except).await;
        Ok(())
    }

    async fn terminate_user_connections(
        &self,
        app_id: &AppId,
        user_id: &str,
    ) -> Result<(), AdapterError> {
        LocalAdapter::terminate_user_connections(self, app_id, user_id).await;
        Ok(())
    }

    async fn get_sockets(
        &self,
        app_id: &AppId,
        _only_local: bool,
    ) -> Result<HashMap<SocketId, SocketInfo>, AdapterError> {
        Ok(self.sockets_snapshot(app_id).await)
    }

    async fn get_sockets_count(
        &self,
        app_id: &AppId,
        _only_local: bool,
    ) -> Result<usize, AdapterError> {
        Ok(self.sockets_count(app_id).await)
    }

    async fn get_channels(
        &self,
        app_id: &AppId,
        _only_local: bool,
    ) -> Result<HashMap<String, HashSet<SocketId>>, AdapterError> {
        Ok(self.channels(app_id).await)
    }

    async fn get_channels_with_sockets_count(
        &self,
        app_id: &AppId,
        _only_local: bool,
    ) -> Result<HashMap<String, usize>, AdapterError> {
        Ok(self.channels_with_sockets_count(app_id).await)
    }

    async fn get_channel_sockets(
        &self,
        app_id: &AppId,
        channel: &str,
        _only_local: bool,
    ) -> Result<HashMap<SocketId, SocketInfo>, AdapterError> {
        Ok(self.channel_sockets_snapshot(app_id, channel).await)
    }

    async fn get_channel_sockets_count(
        &self,
        app_id: &AppId,
        channel: &str,
        _only_local: bool,
    ) -> Result<usize, AdapterError> {
        Ok(self.channel_sockets_count(app_id, channel).await)
    }

    async fn get_channel_members(
        &self,
        app_id: &AppId,
        channel: &str,
        _only_local: bool,
    ) -> Result<HashMap<String, Value>, AdapterError> {
        Ok(self.channel_members(app_id, channel).await)
    }

    async fn get_channel_members_count(
        &self,
        app_id: &AppId,
        channel: &str,
        _only_local: bool,
    ) -> Result<usize, AdapterError> {
        Ok(self.channel_members_count(app_id, channel).await)
    }

    async fn is_in_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket_id: &SocketId,
        _only_local: bool,
    ) -> Result<bool, AdapterError> {
        Ok(self.socket_in_channel(app_id, channel, socket_id).await)
    }

    async fn add_user(&self, socket: Arc<Socket>) -> Result<(), AdapterError> {
        self.namespace(socket.app_id()).await.add_user(&socket).await;
        Ok(())
    }

    async fn remove_user(&self, socket: &Socket) -> Result<(), AdapterError> {
        if let Some(ns) = self.existing(socket.app_id()).await {
            ns.remove_user(socket).await;
        }
        Ok(())
    }

    async fn get_user_sockets(
        &self,
        app_id: &AppId,
        user_id: &str,
    ) -> Result<Vec<Arc<Socket>>, AdapterError> {
        match self.existing(app_id).await {
            Some(ns) => Ok(ns.user_sockets(user_id).await),
            None => Ok(Vec::new()),
        }
    }

    async fn clear_namespace(&self, app_id: &AppId) -> Result<(), AdapterError> {
        LocalAdapter::clear_namespace(self, app_id).await;
        Ok(())
    }

    async fn clear_namespaces(&self) -> Result<(), AdapterError> {
        LocalAdapter::clear_namespaces(self).await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        Ok(())
    }
}
