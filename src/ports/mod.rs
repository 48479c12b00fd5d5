//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the registry core and the outside world. Adapters implement these ports.
//!
//! - `ConnectionAdapter` - Connection/channel/presence registry used by the
//!   WebSocket gateway and HTTP API
//! - `Transport` - Pub/sub primitives a horizontal adapter runs on
//! - `AdapterMetrics` - Latency/outcome callback for cross-node requests

mod connection_adapter;
mod metrics;
mod transport;

pub use connection_adapter::{AdapterError, ConnectionAdapter};
pub use metrics::{AdapterMetrics, NoopMetrics, TracingMetrics};
pub use transport::{InboundMessage, Topic, TopicNames, Transport, TransportError};
