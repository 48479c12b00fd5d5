//! Horizontal adapter - cluster-wide answers over a pub/sub transport.
//!
//! Every query is answered locally first. When other nodes listen on the
//! request topic, the adapter publishes a request, merges every peer's local
//! answer into the local one and resolves once all nodes answered (or an
//! existence check turns up positive). A request that misses its deadline
//! fails with [`AdapterError::Timeout`]; partial results never escape.
//!
//! Broadcasts are published to every node and delivered locally right away.
//! Each node drops its own echoes by comparing the envelope's node id.

mod pending;
pub mod wire;

pub use pending::{
    Accumulator, FinishedRequest, PendingGuard, PendingRequest, PendingRequests, RequestState,
    ResponseDisposition,
};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::{AppId, RequestOutcome, RequestType, Socket, SocketId, SocketInfo};
use crate::ports::{
    AdapterError, AdapterMetrics, ConnectionAdapter, InboundMessage, NoopMetrics, Topic,
    Transport,
};

use super::local::LocalAdapter;
use wire::{BroadcastEnvelope, RequestEnvelope, RequestOptions, ResponseEnvelope, ResponsePayload};

/// Default deadline for cross-node requests.
pub const DEFAULT_REQUESTS_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection adapter that spans every node sharing a transport.
pub struct HorizontalAdapter<T: Transport> {
    local: Arc<LocalAdapter>,
    transport: T,
    node_id: String,
    pending: Arc<PendingRequests>,
    requests_timeout: Duration,
    metrics: Arc<dyn AdapterMetrics>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> HorizontalAdapter<T> {
    /// Starts listening on the transport and returns a ready adapter.
    pub async fn init(transport: T, requests_timeout: Duration) -> Result<Arc<Self>, AdapterError> {
        Self::init_with_metrics(transport, requests_timeout, Arc::new(NoopMetrics)).await
    }

    pub async fn init_with_metrics(
        transport: T,
        requests_timeout: Duration,
        metrics: Arc<dyn AdapterMetrics>,
    ) -> Result<Arc<Self>, AdapterError> {
        let adapter = Arc::new(Self {
            local: Arc::new(LocalAdapter::new()),
            transport,
            node_id: Uuid::new_v4().to_string(),
            pending: Arc::new(PendingRequests::new()),
            requests_timeout,
            metrics,
            listener: Mutex::new(None),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        adapter.transport.listen(tx).await?;

        let handle = tokio::spawn(dispatch_loop(Arc::downgrade(&adapter), rx));
        *adapter.listener.lock().await = Some(handle);

        tracing::info!(
            transport = adapter.transport.name(),
            node_id = %adapter.node_id,
            "Horizontal adapter listening"
        );

        Ok(adapter)
    }

    /// Id this node stamps on its broadcasts.
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn local(&self) -> &Arc<LocalAdapter> {
        &self.local
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Number of requests issued by this node still waiting for answers.
    pub async fn pending_requests(&self) -> usize {
        self.pending.len().await
    }

    async fn dispatch(&self, message: InboundMessage) {
        match message.topic {
            Topic::Broadcast => match wire::decode::<BroadcastEnvelope>(&message.payload) {
                Ok(envelope) => self.on_broadcast(envelope).await,
                Err(e) => tracing::debug!("Dropping malformed broadcast: {}", e),
            },
            Topic::Request => match wire::decode::<RequestEnvelope>(&message.payload) {
                Ok(envelope) => self.on_request(envelope).await,
                Err(e) => tracing::debug!("Dropping malformed request: {}", e),
            },
            Topic::Response => match wire::decode::<ResponseEnvelope>(&message.payload) {
                Ok(envelope) => self.on_response(envelope).await,
                Err(e) => tracing::debug!("Dropping malformed response: {}", e),
            },
        }
    }

    async fn on_broadcast(&self, envelope: BroadcastEnvelope) {
        if envelope.uuid == self.node_id {
            return;
        }
        self.local
            .deliver(
                &envelope.app_id,
                &envelope.channel,
                &envelope.data,
                envelope.excepting_id.as_ref(),
            )
            .await;
    }

    async fn on_request(&self, request: RequestEnvelope) {
        if request.origin.as_deref() == Some(self.node_id.as_str())
            || self.pending.contains(&request.request_id).await
        {
            return;
        }

        if request.request_type == RequestType::TerminateUserConnections {
            match request.opts.user_id.as_deref() {
                Some(user_id) => {
                    self.local
                        .terminate_user_connections(&request.app_id, user_id)
                        .await
                }
                None => tracing::debug!(
                    request_id = %request.request_id,
                    "Dropping terminate request without user id"
                ),
            }
            return;
        }

        let payload = match self
            .local_payload(&request.app_id, request.request_type, &request.opts)
            .await
        {
            Some(payload) => payload,
            None => {
                tracing::debug!(
                    request_id = %request.request_id,
                    request_type = %request.request_type,
                    "Dropping request with missing options"
                );
                return;
            }
        };

        let response = ResponseEnvelope {
            request_id: request.request_id,
            payload,
        };
        let result = match wire::encode(&response) {
            Ok(bytes) => self
                .transport
                .publish(Topic::Response, &request.app_id, bytes)
                .await
                .map_err(AdapterError::from),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            tracing::warn!(
                request_id = %response.request_id,
                "Failed to answer request: {}",
                e
            );
        }
    }

    async fn on_response(&self, response: ResponseEnvelope) {
        let request_id = response.request_id;
        match self.pending.apply_response(&request_id, response.payload).await {
            ResponseDisposition::Unknown => {
                tracing::debug!(request_id = %request_id, "Dropping response for unknown request")
            }
            ResponseDisposition::Mismatched => {
                tracing::debug!(request_id = %request_id, "Dropping response of the wrong shape")
            }
            ResponseDisposition::Merged { .. } => {}
            ResponseDisposition::Finished(done) => {
                if let Some(outcome) = done.state.outcome() {
                    self.metrics
                        .record_request(&done.app_id, done.request_type, done.elapsed, outcome);
                }
            }
        }
    }

    /// This node's answer to a query, in wire form. `None` when the options
    /// the type needs are missing or the type has no response.
    async fn local_payload(
        &self,
        app_id: &AppId,
        request_type: RequestType,
        opts: &RequestOptions,
    ) -> Option<ResponsePayload> {
        let local = &self.local;
        let payload = match request_type {
            RequestType::Sockets => {
                ResponsePayload::Sockets(local.sockets_snapshot(app_id).await.into_iter().collect())
            }
            RequestType::SocketsCount => ResponsePayload::TotalCount(local.sockets_count(app_id).await),
            RequestType::Channels => ResponsePayload::Channels(
                local
                    .channels(app_id)
                    .await
                    .into_iter()
                    .map(|(channel, ids)| (channel, ids.into_iter().collect()))
                    .collect(),
            ),
            RequestType::ChannelsWithSocketsCount => ResponsePayload::ChannelCounts(
                local
                    .channels_with_sockets_count(app_id)
                    .await
                    .into_iter()
                    .collect(),
            ),
            RequestType::ChannelSockets => {
                let channel = opts.channel.as_deref()?;
                ResponsePayload::Sockets(
                    local
                        .channel_sockets_snapshot(app_id, channel)
                        .await
                        .into_iter()
                        .collect(),
                )
            }
            RequestType::ChannelSocketsCount => {
                let channel = opts.channel.as_deref()?;
                ResponsePayload::TotalCount(local.channel_sockets_count(app_id, channel).await)
            }
            RequestType::ChannelMembers => {
                let channel = opts.channel.as_deref()?;
                ResponsePayload::Members(
                    local
                        .channel_members(app_id, channel)
                        .await
                        .into_iter()
                        .collect(),
                )
            }
            RequestType::ChannelMembersCount => {
                let channel = opts.channel.as_deref()?;
                ResponsePayload::TotalCount(local.channel_members_count(app_id, channel).await)
            }
            RequestType::SocketExistsInChannel => {
                let channel = opts.channel.as_deref()?;
                let socket_id = opts.socket_id.as_ref()?;
                ResponsePayload::Exists(local.socket_in_channel(app_id, channel, socket_id).await)
            }
            RequestType::TerminateUserConnections => return None,
        };
        Some(payload)
    }

    /// Local answer, widened to the cluster unless `only_local`.
    async fn query(
        &self,
        app_id: &AppId,
        request_type: RequestType,
        opts: RequestOptions,
        only_local: bool,
    ) -> Result<Accumulator, AdapterError> {
        let local = self
            .local_payload(app_id, request_type, &opts)
            .await
            .map(Accumulator::from)
            .ok_or_else(|| AdapterError::Encode(format!("{request_type} query is missing options")))?;

        if only_local || local == Accumulator::Exists(true) {
            return Ok(local);
        }

        self.gather(app_id, request_type, opts, local).await
    }

    /// Scatter-gather across every node listening on the request topic.
    async fn gather(
        &self,
        app_id: &AppId,
        request_type: RequestType,
        opts: RequestOptions,
        local: Accumulator,
    ) -> Result<Accumulator, AdapterError> {
        let expected = self.transport.subscriber_count().await?;
        if expected <= 1 {
            return Ok(local);
        }

        let request_id = Uuid::new_v4().to_string();
        let (request, mut reply) =
            PendingRequest::new(app_id.clone(), request_type, expected, local);
        self.pending.register(request_id.clone(), request).await;
        let guard = PendingGuard::new(self.pending.clone(), request_id.clone());

        let envelope = RequestEnvelope {
            request_id: request_id.clone(),
            app_id: app_id.clone(),
            request_type,
            opts,
            origin: None,
        };
        if let Err(e) = self.publish(Topic::Request, app_id, &envelope).await {
            self.pending.cancel(&request_id).await;
            guard.disarm();
            return Err(e);
        }

        let outcome = match tokio::time::timeout(self.requests_timeout, &mut reply).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(AdapterError::Abandoned(request_id)),
            Err(_) => match self.pending.expire(&request_id).await {
                Some(expired) => {
                    tracing::warn!(
                        app_id = %app_id,
                        request_id = %request_id,
                        request_type = %request_type,
                        received = expired.received,
                        expected = expired.expected,
                        "Horizontal request timed out"
                    );
                    self.metrics.record_request(
                        app_id,
                        request_type,
                        expired.elapsed,
                        RequestOutcome::TimedOut,
                    );
                    Err(AdapterError::Timeout {
                        request_id,
                        request_type,
                        received: expired.received,
                        expected: expired.expected,
                    })
                }
                // Finished between the deadline and the expiry.
                None => reply
                    .try_recv()
                    .map_err(|_| AdapterError::Abandoned(request_id)),
            },
        };
        guard.disarm();
        outcome
    }

    async fn publish<M: serde::Serialize>(
        &self,
        topic: Topic,
        app_id: &AppId,
        message: &M,
    ) -> Result<(), AdapterError> {
        let payload = wire::encode(message)?;
        self.transport.publish(topic, app_id, payload).await?;
        Ok(())
    }
}

impl<T: Transport> Drop for HorizontalAdapter<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}

async fn dispatch_loop<T: Transport>(
    weak: Weak<HorizontalAdapter<T>>,
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
) {
    while let Some(message) = inbound.recv().await {
        let Some(adapter) = weak.upgrade() else {
            break;
        };
        adapter.dispatch(message).await;
    }
    tracing::debug!("Horizontal dispatch loop stopped");
}

fn unexpected(request_type: RequestType) -> AdapterError {
    AdapterError::Decode(format!("unexpected result shape for {request_type} request"))
}

#[async_trait]
impl<T: Transport> ConnectionAdapter for HorizontalAdapter<T> {
    async fn add_socket(&self, app_id: &AppId, socket: Arc<Socket>) -> Result<bool, AdapterError> {
        self.local.add_socket(app_id, socket).await
    }

    async fn remove_socket(
        &self,
        app_id: &AppId,
        socket_id: &SocketId,
    ) -> Result<bool, AdapterError> {
        self.local.remove_socket(app_id, socket_id).await
    }

    async fn add_to_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket: Arc<Socket>,
    ) -> Result<usize, AdapterError> {
        self.local.add_to_channel(app_id, channel, socket).await
    }

    async fn remove_from_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket_id: &SocketId,
    ) -> Result<usize, AdapterError> {
        self.local
            .remove_from_channel(app_id, channel, socket_id)
            .await
    }

    async fn remove_from_channels(
        &self,
        app_id: &AppId,
        channels: &[String],
        socket_id: &SocketId,
    ) -> Result<(), AdapterError> {
        self.local
            .remove_from_channels(app_id, channels, socket_id)
            .await
    }

    /// Publishes to every node and delivers locally. Local delivery happens
    /// even if publishing fails; the publish error is returned afterwards.
    async fn send(
        &self,
        app_id: &AppId,
        channel: &str,
        data: Value,
        except: Option<&SocketId>,
    ) -> Result<(), AdapterError> {
        let envelope = BroadcastEnvelope {
            uuid: self.node_id.clone(),
            app_id: app_id.clone(),
            channel: channel.to_string(),
            data,
            excepting_id: except.cloned(),
        };
        let published = self.publish(Topic::Broadcast, app_id, &envelope).await;

        self.local
            .deliver(app_id, channel, &envelope.data, except)
            .await;

        published
    }

    async fn terminate_user_connections(
        &self,
        app_id: &AppId,
        user_id: &str,
    ) -> Result<(), AdapterError> {
        self.local.terminate_user_connections(app_id, user_id).await;

        let envelope = RequestEnvelope {
            request_id: Uuid::new_v4().to_string(),
            app_id: app_id.clone(),
            request_type: RequestType::TerminateUserConnections,
            opts: RequestOptions::user(user_id),
            origin: Some(self.node_id.clone()),
        };
        self.publish(Topic::Request, app_id, &envelope).await
    }

    async fn get_sockets(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<HashMap<SocketId, SocketInfo>, AdapterError> {
        let request_type = RequestType::Sockets;
        self.query(app_id, request_type, RequestOptions::default(), only_local)
            .await?
            .into_sockets()
            .ok_or_else(|| unexpected(request_type))
    }

    async fn get_sockets_count(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<usize, AdapterError> {
        let request_type = RequestType::SocketsCount;
        self.query(app_id, request_type, RequestOptions::default(), only_local)
            .await?
            .into_count()
            .ok_or_else(|| unexpected(request_type))
    }

    async fn get_channels(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<HashMap<String, HashSet<SocketId>>, AdapterError> {
        let request_type = RequestType::Channels;
        self.query(app_id, request_type, RequestOptions::default(), only_local)
            .await?
            .into_channels()
            .ok_or_else(|| unexpected(request_type))
    }

    async fn get_channels_with_sockets_count(
        &self,
        app_id: &AppId,
        only_local: bool,
    ) -> Result<HashMap<String, usize>, AdapterError> {
        let request_type = RequestType::ChannelsWithSocketsCount;
        self.query(app_id, request_type, RequestOptions::default(), only_local)
            .await?
            .into_channel_counts()
            .ok_or_else(|| unexpected(request_type))
    }

    async fn get_channel_sockets(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<HashMap<SocketId, SocketInfo>, AdapterError> {
        let request_type = RequestType::ChannelSockets;
        self.query(app_id, request_type, RequestOptions::channel(channel), only_local)
            .await?
            .into_sockets()
            .ok_or_else(|| unexpected(request_type))
    }

    async fn get_channel_sockets_count(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<usize, AdapterError> {
        let request_type = RequestType::ChannelSocketsCount;
        self.query(app_id, request_type, RequestOptions::channel(channel), only_local)
            .await?
            .into_count()
            .ok_or_else(|| unexpected(request_type))
    }

    async fn get_channel_members(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<HashMap<String, Value>, AdapterError> {
        let request_type = RequestType::ChannelMembers;
        self.query(app_id, request_type, RequestOptions::channel(channel), only_local)
            .await?
            .into_members()
            .ok_or_else(|| unexpected(request_type))
    }

    async fn get_channel_members_count(
        &self,
        app_id: &AppId,
        channel: &str,
        only_local: bool,
    ) -> Result<usize, AdapterError> {
        let request_type = RequestType::ChannelMembersCount;
        self.query(app_id, request_type, RequestOptions::channel(channel), only_local)
            .await?
            .into_count()
            .ok_or_else(|| unexpected(request_type))
    }

    async fn is_in_channel(
        &self,
        app_id: &AppId,
        channel: &str,
        socket_id: &SocketId,
        only_local: bool,
    ) -> Result<bool, AdapterError> {
        let request_type = RequestType::SocketExistsInChannel;
        let opts = RequestOptions::socket_in_channel(channel, socket_id);
        self.query(app_id, request_type, opts, only_local)
            .await?
            .into_exists()
            .ok_or_else(|| unexpected(request_type))
    }

    async fn add_user(&self, socket: Arc<Socket>) -> Result<(), AdapterError> {
        self.local.add_user(socket).await
    }

    async fn remove_user(&self, socket: &Socket) -> Result<(), AdapterError> {
        self.local.remove_user(socket).await
    }

    async fn get_user_sockets(
        &self,
        app_id: &AppId,
        user_id: &str,
    ) -> Result<Vec<Arc<Socket>>, AdapterError> {
        self.local.get_user_sockets(app_id, user_id).await
    }

    async fn clear_namespace(&self, app_id: &AppId) -> Result<(), AdapterError> {
        self.local.clear_namespace(app_id).await;
        Ok(())
    }

    async fn clear_namespaces(&self) -> Result<(), AdapterError> {
        self.local.clear_namespaces().await;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), AdapterError> {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        let abandoned = self.pending.abandon_all().await;
        if abandoned > 0 {
            tracing::debug!(abandoned, "Abandoned in-flight requests on disconnect");
        }
        self.transport.disconnect().await?;
        tracing::info!(transport = self.transport.name(), "Horizontal adapter disconnected");
        Ok(())
    }
}
