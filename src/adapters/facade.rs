//! Adapter facade - the one handle the gateway and HTTP API hold.
//!
//! Picks the implementation from configuration. Anything but `local` wraps a
//! [`HorizontalAdapter`] over the matching transport; failing to reach the
//! transport fails `init`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::config::{AdapterDriver, AppConfig};
use crate::domain::{AppId, Socket, SocketId, SocketInfo};
use crate::ports::{AdapterError, AdapterMetrics, ConnectionAdapter, TracingMetrics, Transport};

use super::horizontal::HorizontalAdapter;
use super::local::LocalAdapter;
use super::transport::{AmqpTransport, NatsTransport, RedisTransport};

/// Configured connection adapter.
#[derive(Clone)]
pub struct Adapter {
    driver: AdapterDriver,
    inner: Arc<dyn ConnectionAdapter>,
}

impl Adapter {
    /// Connects the configured transport and returns a ready adapter.
    pub async fn init(config: &AppConfig) -> Result<Self, AdapterError> {
        let driver = config.adapter.driver;
        let prefix = config.adapter.prefix.as_str();

        let inner: Arc<dyn ConnectionAdapter> = match driver {
            AdapterDriver::Local => Arc::new(LocalAdapter::new()),
            AdapterDriver::Redis => {
                let transport = RedisTransport::connect(&config.redis.url, prefix).await?;
                horizontal(transport, config).await?
            }
            AdapterDriver::Nats => {
                let transport = NatsTransport::connect(&config.nats, prefix).await?;
                horizontal(transport, config).await?
            }
            AdapterDriver::Amqp => {
                let transport = AmqpTransport::connect(&config.amqp, prefix).await?;
                horizontal(transport, config).await?
            }
        };

        tracing::info!(driver = %driver, "Connection adapter ready");
        Ok(Self { driver, inner })
    }

    /// Wraps an already-built adapter, e.g. a horizontal adapter over an
    /// in-process transport.
    pub fn from_adapter(driver: AdapterDriver, inner: Arc<dyn ConnectionAdapter>) -> Self {
        Self { driver, inner }
    }

    pub fn driver(&self) -> AdapterDriver {
        self.driver
    }
}

async fn horizontal<T: Transport>(
    transport: T,
    config: &AppConfig,
) -> Result<Arc<dyn ConnectionAdapter>, AdapterError> {
    let metrics: Arc<dyn AdapterMetrics> = Arc::new(TracingMetrics);
    let adapter =
        HorizontalAdapter::init_with_metrics(transport, config.adapter.requests_timeout(), metrics)
            .await?;
    Ok(adapter)
}

#[async_trait]
impl ConnectionAdapter for Adapter {
    async fn add_socket(&self, app_id: &AppId, socket: Arc<Socket>) -> Result<bool, AdapterError> {
        self.inner.add_socket(app_id, socket).await
    }

    async fn remove_socket(
        &self,
        app_id: &AppId,
        socket_id: &SocketId,
    ) -> Result<bool, AdapterError> {
        self.inner.remove_socket(app_id, socket_id).await
    }

    async fn add_to_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket: Arc<Socket>,
    ) -> Result<usize, AdapterError> {
        self.inner.add_to_channel(app_id, channel, socket).await
    }

    async fn remove_from_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket_id: &SocketId,
    ) -> Result<usize, AdapterError> {
        self.inner
            .remove_from_channel(app_id, channel, socket_id)
            .await
    }

    async fn remove_from_channels(
        &self,
        app_id: &AppId,
        channels: &[String],
        socket_id: &SocketId,
    ) -> Result<(), AdapterError> {
        self.inner
            .remove_from_channels(app_id, channels, socket_id)
            .await
    }

    async fn send(
        &self,
        app_id: &AppId,
        channel: &str,
        data: Value,
        except: Option<&SocketId>,
    ) -> Result<(), AdapterError> {
        self.inner.send(app_id, channel, data, except).await
    }

    async fn terminate_user_connections(
        &self,
        app_id: &AppId,
        user_id: &str,
    ) -> Result<(), AdapterError> {
        self.inner.terminate_user_connections(app_id, user_id).await
    }

    async fn get_sockets(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<HashMap<SocketId, SocketInfo>, AdapterError> {
        self.inner.get_sockets(app_id, only_local).await
    }

    async fn get_sockets_count(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<usize, AdapterError> {
        self.inner.get_sockets_count(app_id, only_local).await
    }

    async fn get_channels(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<HashMap<String, HashSet<SocketId>>, AdapterError> {
        self.inner.get_channels(app_id, only_local).await
    }

    async fn get_channels_with_sockets_count(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<HashMap<String, usize>, AdapterError> {
        self.inner
            .get_channels_with_sockets_count(app_id, only_local)
            .await
    }

    async fn get_channel_sockets(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<HashMap<SocketId, SocketInfo>, AdapterError> {
        self.inner
            .get_channel_sockets(app_id, channel, only_local)
            .await
    }

    async fn get_channel_sockets_count(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<usize, AdapterError> {
        self.inner
            .get_channel_sockets_count(app_id, channel, only_local)
            .await
    }

    async fn get_channel_members(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<HashMap<String, Value>, AdapterError> {
        self.inner
            .get_channel_members(app_id, channel, only_local)
            .await
    }

    async fn get_channel_members_count(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<usize, AdapterError> {
        self.inner
            .get_channel_members_count(app_id, channel, only_local)
            .await
    }

    async fn is_in_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket_id: &SocketId,
        only_local: bool,
    ) -> Result<bool, AdapterError> {
        self.inner
            .is_in_channel(app_id, channel, socket_id, only_local)
            .await
    }

    async fn add_user(&self, socket: Arc<Socket>) -> Result<(), AdapterError> {
        self.inner.add_user(socket).await
    }

    async fn remove_user(&self, socket: &Socket) -> Result<(), AdapterError> {
        self.inner.remove_user(socket).await
    }

    async fn get_user_sockets(
        &self,
        app_id: &AppId,
        user_id: &str,
    ) -> Result<Vec<Arc<Socket>>, AdapterError> {
        self.inner.get_user_sockets(app_id, user_id).await
    }

    async fn clear_namespace(&self, app_id: &AppId) -> Result<(), AdapterError> {
        self.inner.clear_namespace(app_id).await
    }

    async fn clear_namespaces(&self) -> Result<(), AdapterError> {
        self.inner.clear_namespaces().await
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        self.inner.disconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_OUTBOX_CAPACITY;

    #[tokio::test]
    async fn local_driver_needs_no_transport() {
        let adapter = Adapter::init(&AppConfig::default()).await.unwrap();
        assert_eq!(adapter.driver(), AdapterDriver::Local);

        let app = AppId::from("app");
        let (socket, _rx) =
            Socket::with_outbox(SocketId::new("1.1"), app.clone(), DEFAULT_OUTBOX_CAPACITY);
        let socket = Arc::new(socket);
        adapter.add_socket(&app, socket.clone()).await.unwrap();
        adapter.add_to_channel(&app, "c1", socket).await.unwrap();

        assert_eq!(adapter.get_channel_sockets_count(&app, "c1", false).await.unwrap(), 1);
        assert!(adapter.disconnect().await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_transport_fails_init() {
        let mut config = AppConfig::default();
        config.adapter.driver = AdapterDriver::Redis;
        config.redis.url = "redis://127.0.0.1:1".to_string();

        let result = Adapter::init(&config).await;
        assert!(matches!(result, Err(AdapterError::Transport(_))));
    }
}
