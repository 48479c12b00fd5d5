//! Transport drivers for the horizontal adapter.

pub mod amqp;
pub mod memory;
pub mod nats;
pub mod redis;

pub use amqp::AmqpTransport;
pub use memory::{MemoryHub, MemoryTransport};
pub use self::nats::NatsTransport;
pub use self::redis::RedisTransport;
