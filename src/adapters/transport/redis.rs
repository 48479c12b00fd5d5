//! Redis pub/sub transport.
//!
//! Topics map onto plain Redis channels. Publishing shares one multiplexed
//! connection; listening holds a dedicated pub/sub connection. Nodes are
//! counted with `PUBSUB NUMSUB` on the request channel.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::domain::AppId;
use crate::ports::{InboundMessage, Topic, TopicNames, Transport, TransportError};

const NAME: &str = "redis";

pub struct RedisTransport {
    client: redis::Client,
    conn: MultiplexedConnection,
    names: TopicNames,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl RedisTransport {
    /// Opens the publishing connection. Fails fast when Redis is unreachable.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(url).map_err(|e| TransportError::connect(NAME, e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransportError::connect(NAME, e))?;

        tracing::info!(prefix, "Connected to Redis");

        Ok(Self {
            client,
            conn,
            names: TopicNames::new(prefix),
            listener: Mutex::new(None),
        })
    }

    pub fn topic_names(&self) -> &TopicNames {
        &self.names
    }
}

/// Maps a message on a Redis channel back to its topic. Channels outside
/// this prefix yield `None`.
fn inbound(names: &TopicNames, channel: &str, payload: &[u8]) -> Option<InboundMessage> {
    names.topic_of(channel).map(|topic| InboundMessage {
        topic,
        payload: payload.to_vec(),
    })
}

#[async_trait]
impl Transport for RedisTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn publish(
        &self,
        topic: Topic,
        _app_id: &AppId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        redis::cmd("PUBLISH")
            .arg(self.names.name(topic))
            .arg(payload)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn listen(
        &self,
        sink: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<(), TransportError> {
        let mut pubsub = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))?
            .into_pubsub();

        for topic in Topic::ALL {
            pubsub
                .subscribe(self.names.name(topic))
                .await
                .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        }

        let names = self.names.clone();
        let handle = tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let Some(message) =
                    inbound(&names, msg.get_channel_name(), msg.get_payload_bytes())
                else {
                    continue;
                };
                if sink.send(message).is_err() {
                    break;
                }
            }
            tracing::debug!("Redis subscription closed");
        });

        if let Some(previous) = self.listener.lock().await.replace(handle) {
            previous.abort();
        }
        Ok(())
    }

    async fn subscriber_count(&self) -> Result<usize, TransportError> {
        let mut conn = self.conn.clone();
        let (_, count): (String, usize) = redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(self.names.name(Topic::Request))
            .query_async(&mut conn)
            .await
            .map_err(|e| TransportError::SubscriberCount(e.to_string()))?;
        Ok(count)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        Ok(())
    }
}
