//! AMQP (RabbitMQ) transport.
//!
//! One topic exchange per prefix. Messages are routed with
//! `<topic>.<app_id>` so apps stay isolated on the broker; every node binds
//! an exclusive, auto-deleted queue per topic with `<topic>.#`. RabbitMQ has
//! no subscriber-count primitive over AMQP, so nodes are counted through the
//! management API as the queues bound for requests on the exchange.

use async_trait::async_trait;
use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use serde::Deserialize;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::AmqpConfig;
use crate::domain::AppId;
use crate::ports::{InboundMessage, Topic, TopicNames, Transport, TransportError};

const NAME: &str = "amqp";

/// Exchange and queue names reserve `#`, so topics use `_` here.
const SEPARATOR: &str = "_";

#[derive(Debug, Deserialize)]
struct Binding {
    routing_key: String,
}

pub struct AmqpTransport {
    connection: Connection,
    channel: Channel,
    exchange: String,
    names: TopicNames,
    http: reqwest::Client,
    bindings_url: String,
    management_user: String,
    management_password: String,
    consumers: Mutex<Vec<JoinHandle<()>>>,
}

impl AmqpTransport {
    /// Connects and declares the exchange.
    pub async fn connect(config: &AmqpConfig, prefix: &str) -> Result<Self, TransportError> {
        let connection = Connection::connect(&config.uri, ConnectionProperties::default())
            .await
            .map_err(|e| TransportError::connect(NAME, e))?;
        let channel = connection
            .create_channel()
            .await
            .map_err(|e| TransportError::connect(NAME, e))?;

        let exchange = prefix.to_string();
        channel
            .exchange_declare(
                &exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| TransportError::connect(NAME, e))?;

        tracing::info!(exchange = %exchange, "Connected to AMQP broker");

        Ok(Self {
            connection,
            channel,
            bindings_url: bindings_url(&config.management_url, &config.vhost, &exchange),
            exchange,
            names: TopicNames::with_separator(prefix, SEPARATOR),
            http: reqwest::Client::new(),
            management_user: config.management_user.clone(),
            management_password: config.management_password.clone(),
            consumers: Mutex::new(Vec::new()),
        })
    }

    fn routing_key(&self, topic: Topic, app_id: &AppId) -> String {
        format!("{}.{}", self.names.name(topic), app_id)
    }

    fn binding_key(&self, topic: Topic) -> String {
        format!("{}.#", self.names.name(topic))
    }
}

/// Management API endpoint listing the exchange's outgoing bindings.
fn bindings_url(management_url: &str, vhost: &str, exchange: &str) -> String {
    format!(
        "{}/api/exchanges/{}/{}/bindings/source",
        management_url.trim_end_matches('/'),
        vhost.replace('/', "%2F"),
        exchange
    )
}

#[async_trait]
impl Transport for AmqpTransport {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn publish(
        &self,
        topic: Topic,
        app_id: &AppId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.channel
            .basic_publish(
                &self.exchange,
                &self.routing_key(topic, app_id),
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn listen(
        &self,
        sink: mpsc::UnboundedSender<InboundMessage>,
    ) -> Result<(), TransportError> {
        let mut consumers = Vec::with_capacity(Topic::ALL.len());

        for topic in Topic::ALL {
            let queue = self
                .channel
                .queue_declare(
                    "",
                    QueueDeclareOptions {
                        exclusive: true,
                        auto_delete: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| TransportError::Subscribe(e.to_string()))?;

            self.channel
                .queue_bind(
                    queue.name().as_str(),
                    &self.exchange,
                    &self.binding_key(topic),
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| TransportError::Subscribe(e.to_string()))?;

            let mut consumer = self
                .channel
                .basic_consume(
                    queue.name().as_str(),
                    "",
                    BasicConsumeOptions {
                        no_ack: true,
                        ..Default::default()
                    },
                    FieldTable::default(),
                )
                .await
                .map_err(|e| TransportError::Subscribe(e.to_string()))?;

            let sink = sink.clone();
            consumers.push(tokio::spawn(async move {
                while let Some(delivery) = consumer.next().await {
                    match delivery {
                        Ok(delivery) => {
                            let inbound = InboundMessage {
                                topic,
                                payload: delivery.data,
                            };
                            if sink.send(inbound).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("AMQP consumer failed: {}", e);
                            break;
                        }
                    }
                }
            }));
        }

        let mut current = self.consumers.lock().await;
        for previous in current.drain(..) {
            previous.abort();
        }
        *current = consumers;
        Ok(())
    }

    async fn subscriber_count(&self) -> Result<usize, TransportError> {
        let bindings: Vec<Binding> = self
            .http
            .get(&self.bindings_url)
            .basic_auth(&self.management_user, Some(&self.management_password))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| TransportError::SubscriberCount(e.to_string()))?
            .json()
            .await
            .map_err(|e| TransportError::SubscriberCount(e.to_string()))?;

        let request_key = self.binding_key(Topic::Request);
        Ok(bindings
            .iter()
            .filter(|binding| binding.routing_key == request_key)
            .count())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        for consumer in self.consumers.lock().await.drain(..) {
            consumer.abort();
        }
        self.connection
            .close(200, "disconnect")
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bindings_url_encodes_default_vhost() {
        assert_eq!(
            bindings_url("http://rabbit:15672/", "/", "pushline"),
            "http://rabbit:15672/api/exchanges/%2F/pushline/bindings/source"
        );
    }

    #[test]
    fn topic_names_avoid_hash() {
        let names = TopicNames::with_separator("pushline", SEPARATOR);
        assert_eq!(names.name(Topic::Request), "pushline_comm_req");
    }

    #[test]
    fn bindings_decode_from_management_json() {
        let raw = r#"[{"source":"pushline","routing_key":"pushline_comm_req.#","destination":"amq.gen-1"}]"#;
        let bindings: Vec<Binding> = serde_json::from_str(raw).unwrap();
        assert_eq!(bindings[0].routing_key, "pushline_comm_req.#");
    }
}
