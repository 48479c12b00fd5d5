//! Adapters - Implementations of port interfaces.
//!
//! - `namespace` / `local` - In-process connection registry
//! - `horizontal` - Cluster-wide registry over a pub/sub transport
//! - `transport` - Redis, NATS, AMQP and in-memory transports
//! - `facade` - Driver selection from configuration
//! - `websocket` - Pusher client protocol gateway
//! - `http` - Pusher app API

pub mod facade;
pub mod horizontal;
pub mod http;
pub mod local;
pub mod namespace;
pub mod transport;
pub mod websocket;

pub use facade::Adapter;
pub use horizontal::HorizontalAdapter;
pub use local::LocalAdapter;
pub use namespace::Namespace;
