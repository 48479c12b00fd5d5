//! Pushline - Pusher-compatible real-time messaging server
//!
//! Keeps the registry of connections, channels and presence members for
//! every app, and answers cluster-wide questions about it when several
//! nodes share a pub/sub transport.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
