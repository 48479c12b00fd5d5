//! Transport port - the pub/sub primitives horizontal scaling needs.
//!
//! A horizontal adapter layers its request/response protocol on top of three
//! primitives only: publish to a topic, listen on every topic, and count the
//! nodes listening. Drivers map the three logical topics onto their own
//! addressing scheme (flat channels, subjects, exchange routing keys).

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::AppId;

/// The logical wire channels of one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// User messages fanned out to every node.
    Broadcast,
    /// Scatter-gather requests.
    Request,
    /// Replies to requests.
    Response,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Broadcast, Topic::Request, Topic::Response];
}

/// Topic names namespaced by a deployment prefix.
///
/// Unrelated deployments sharing a broker must use different prefixes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicNames {
    broadcast: String,
    request: String,
    response: String,
}

impl TopicNames {
    /// Names of the form `<prefix>#broadcast`, `<prefix>#comm#req`,
    /// `<prefix>#comm#res`.
    pub fn new(prefix: &str) -> Self {
        Self::with_separator(prefix, "#")
    }

    /// Same layout with a custom separator, for brokers that reserve `#`.
    pub fn with_separator(prefix: &str, separator: &str) -> Self {
        Self {
            broadcast: format!("{prefix}{separator}broadcast"),
            request: format!("{prefix}{separator}comm{separator}req"),
            response: format!("{prefix}{separator}comm{separator}res"),
        }
    }

    pub fn name(&self, topic: Topic) -> &str {
        match topic {
            Topic::Broadcast => &self.broadcast,
            Topic::Request => &self.request,
            Topic::Response => &self.response,
        }
    }

    /// Reverse lookup from a wire name.
    pub fn topic_of(&self, name: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| self.name(*t) == name)
    }
}

/// A raw message received on one of the topics.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: Topic,
    pub payload: Vec<u8>,
}

/// Errors raised by transport drivers.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {transport}: {reason}")]
    Connect {
        transport: &'static str,
        reason: String,
    },

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("subscriber count query failed: {0}")]
    SubscriberCount(String),

    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    pub fn connect(transport: &'static str, reason: impl ToString) -> Self {
        TransportError::Connect {
            transport,
            reason: reason.to_string(),
        }
    }
}

/// Port for the pub/sub transport of a horizontal adapter.
///
/// Implementations must:
/// - deliver published messages to every listening node, the publisher
///   included (the adapter discards its own echoes)
/// - count the publisher itself in `subscriber_count`
/// - never block `publish` on slow listeners
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Short driver name for logs.
    fn name(&self) -> &'static str;

    /// Publishes a payload on a topic. `app_id` lets drivers with per-app
    /// routing isolate tenants; flat drivers ignore it.
    async fn publish(
        &self,
        topic: Topic,
        app_id: &AppId,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Starts forwarding every message on every topic into `sink`.
    async fn listen(&self, sink: mpsc::UnboundedSender<InboundMessage>)
        -> Result<(), TransportError>;

    /// Number of nodes currently listening on the request topic.
    async fn subscriber_count(&self) -> Result<usize, TransportError>;

    /// Stops listening and releases the connection.
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[allow(dead_code)]
    fn assert_object_safe(_: &dyn Transport) {}

    #[test]
    fn topic_names_are_prefixed() {
        let names = TopicNames::new("pushline");
        assert_eq!(names.name(Topic::Broadcast), "pushline#broadcast");
        assert_eq!(names.name(Topic::Request), "pushline#comm#req");
        assert_eq!(names.name(Topic::Response), "pushline#comm#res");
    }

    #[test]
    fn topic_of_inverts_name() {
        let names = TopicNames::with_separator("app", "_");
        for topic in Topic::ALL {
            assert_eq!(names.topic_of(names.name(topic)), Some(topic));
        }
        assert_eq!(names.topic_of("other"), None);
    }
}
