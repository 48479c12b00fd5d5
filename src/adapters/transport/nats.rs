//! NATS transport.
//!
//! Each topic is a subject. NATS has no subscriber-count command, so nodes
//! are either configured up front (`nodes_number`) or discovered per request:
//! every node answers pings on a discovery subject, and the replies that
//! arrive within the discovery window are counted.

use async_trait::async_trait;
use futures::StreamExt;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::NatsConfig;
use crate::domain::AppId;
use crate::ports::{InboundMessage, Topic, TopicNames, Transport, TransportError};

const NAME: &str = "nats";

pub struct NatsTransport {
    client: async_nats::Client,
    names: TopicNames,
    discovery_subject: String,
    nodes_number: Option<usize>,
    discovery_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl NatsTransport {
    pub async fn connect(config: &NatsConfig, prefix: &str) -> Result<Self, TransportError> {
        let servers = config.server_list().join(",");
        let client = async_nats::ConnectOptions::new()
            .connection_timeout(config.connect_timeout())
            .connect(servers.as_str())
            .await
            .map_err(|e| TransportError::connect(NAME, e))?;

        tracing::info!(servers = %servers, prefix, "Connected to NATS");

        Ok(Self {
            client,
            names: TopicNames::new(prefix),
            discovery_subject: format!("{prefix}#discovery"),
            nodes_number: config.nodes_number,
            discovery_timeout: config.discovery_timeout(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    async fn subscribe(&self, subject: &str) -> Result<async_nats::Subscriber, TransportError> {
        self.client
            .subscribe(subject.to_string())
            .await
            .map_err(|e| TransportError::Subscribe(e.to_string()))
    }

    /// Pings the discovery subject and counts the nodes that answer in time.
    async fn discover(&self) -> Result<usize, TransportError> {
        let inbox = self.client.new_inbox();
        let mut replies = self
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(|e| TransportError::SubscriberCount(e.to_string()))?;

        self.client
            .publish_with_reply(self.discovery_subject.clone(), inbox, Vec::new().into())
            .await
            .map_err(|e| TransportError::SubscriberCount(e.to_string()))?;

        let mut count = 0;
        let window = tokio::time::sleep(self.discovery_timeout);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                reply = replies.next() => match reply {
                    Some(_) => count += 1,
                    None => break,
                },
            }
        }

        if let Err(e) = replies.unsubscribe().await {
            tracing::debug!("Failed to drop discovery inbox: {}", e);
        }
        Ok(count)
    }
}

#[async_trait]
impl Transport for NatsTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn publish(
        &self,
        topic: Topic,
        _app_id: &AppId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.client
            .publish(self.names.name(topic).to_string(), payload.into())
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }

    async fn listen(
        &self,
        sink: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<(), TransportError> {
        let mut tasks = Vec::with_capacity(Topic::ALL.len() + 1);

        for topic in Topic::ALL {
            let mut subscriber = self.subscribe(self.names.name(topic)).await?;
            let sink = sink.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(message) = subscriber.next().await {
                    let inbound = InboundMessage {
                        topic,
                        payload: message.payload.to_vec(),
                    };
                    if sink.send(inbound).is_err() {
                        break;
                    }
                }
            }));
        }

        let mut pings = self.subscribe(&self.discovery_subject).await?;
        let client = self.client.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(ping) = pings.next().await {
                let Some(reply) = ping.reply else {
                    continue;
                };
                if let Err(e) = client.publish(reply, Vec::new().into()).await {
                    tracing::debug!("Failed to answer discovery ping: {}", e);
                }
            }
        }));

        let mut current = self.tasks.lock().await;
        for previous in current.drain(..) {
            previous.abort();
        }
        *current = tasks;
        Ok(())
    }

    async fn subscriber_count(&self) -> Result<usize, TransportError> {
        match self.nodes_number {
            Some(nodes) => Ok(nodes),
            None => self.discover().await,
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}
