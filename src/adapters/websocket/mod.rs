//! WebSocket gateway speaking the Pusher client protocol.
//!
//! # Components
//!
//! - [`messages`] - Pusher frame parsing and construction
//! - [`session`] - Subscribe, unsubscribe, client events and cleanup
//! - [`handler`] - Axum WebSocket upgrade handler

pub mod handler;
pub mod messages;
pub mod session;

pub use handler::{websocket_router, ws_handler};
pub use messages::{ClientMessage, SubscribeRequest};
