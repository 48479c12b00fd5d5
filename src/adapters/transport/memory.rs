//! In-process transport.
//!
//! A [`MemoryHub`] plays the broker: every [`MemoryTransport`] created from
//! the same hub sees the others' messages. This is the reference semantics
//! for the other drivers and lets several nodes run inside one process.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::domain::AppId;
use crate::ports::{InboundMessage, Topic, Transport, TransportError};

#[derive(Debug, Default)]
struct HubState {
    listeners: RwLock<HashMap<u64, mpsc::UnboundedSender<InboundMessage>>>,
    published: RwLock<HashMap<Topic, usize>>,
    next_id: AtomicU64,
}

/// Shared in-memory broker.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Arc<HubState>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new node endpoint on this hub.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            hub: self.clone(),
            id: self.state.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Messages published on `topic` so far.
    pub async fn published(&self, topic: Topic) -> usize {
        self.state
            .published
            .read()
            .await
            .get(&topic)
            .copied()
            .unwrap_or(0)
    }

    /// Endpoints currently listening.
    pub async fn listeners(&self) -> usize {
        self.state.listeners.read().await.len()
    }
}

/// One node's endpoint on a [`MemoryHub`].
#[derive(Debug)]
pub struct MemoryTransport {
    hub: MemoryHub,
    id: u64,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn publish(
        &self,
        topic: Topic,
        _app_id: &AppId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        *self
            .hub
            .state
            .published
            .write()
            .await
            .entry(topic)
            .or_default() += 1;

        let listeners = self.hub.state.listeners.read().await;
        for sink in listeners.values() {
            // A closed sink belongs to a node whose dispatch loop stopped.
            let _ = sink.send(InboundMessage {
                topic,
                payload: payload.clone(),
            });
        }
        Ok(())
    }

    async fn listen(
        &self,
        sink: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<(), TransportError> {
        self.hub.state.listeners.write().await.insert(self.id, sink);
        Ok(())
    }

    async fn subscriber_count(&self) -> Result<usize, TransportError> {
        Ok(self.hub.listeners().await)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.hub.state.listeners.write().await.remove(&self.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_reaches_every_listener_including_sender() {
        let hub = MemoryHub::new();
        let a = hub.transport();
        let b = hub.transport();
        let (tx_a, mut rx_a) = mpsc::unbounded_channel();
        let (tx_b, mut rx_b) = mpsc::unbounded_channel();
        a.listen(tx_a).await.unwrap();
        b.listen(tx_b).await.unwrap();

        a.publish(Topic::Broadcast, &AppId::from("app"), b"hi".to_vec())
            .await
            .unwrap();

        assert_eq!(rx_a.recv().await.unwrap().payload, b"hi");
        assert_eq!(rx_b.recv().await.unwrap().topic, Topic::Broadcast);
        assert_eq!(hub.published(Topic::Broadcast).await, 1);
        assert_eq!(hub.published(Topic::Request).await, 0);
    }

    #[tokio::test]
    async fn subscriber_count_tracks_listen_and_disconnect() {
        let hub = MemoryHub::new();
        let a = hub.transport();
        let b = hub.transport();
        assert_eq!(a.subscriber_count().await.unwrap(), 0);

        let (tx, _rx) = mpsc::unbounded_channel();
        a.listen(tx.clone()).await.unwrap();
        b.listen(tx).await.unwrap();
        assert_eq!(a.subscriber_count().await.unwrap(), 2);

        b.disconnect().await.unwrap();
        assert_eq!(a.subscriber_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn publish_survives_dropped_listener() {
        let hub = MemoryHub::new();
        let a = hub.transport();
        let (tx, rx) = mpsc::unbounded_channel();
        a.listen(tx).await.unwrap();
        drop(rx);

        let result = a
            .publish(Topic::Request, &AppId::from("app"), Vec::new())
            .await;
        assert!(result.is_ok());
    }
}
