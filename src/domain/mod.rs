//! Domain layer: the vocabulary of connections, channels and presence.
//!
//! # Module Organization
//!
//! - `ids` - App and socket identifiers
//! - `channel` - Channel naming conventions and server-to-user addressing
//! - `presence` - Presence members, user identity and socket snapshots
//! - `socket` - Live connection handle with its outbox
//! - `cluster` - Request kinds and outcomes of the cross-node protocol

mod channel;
mod cluster;
mod ids;
mod presence;
mod socket;

pub use channel::{
    is_presence_channel, server_to_user_channel, server_to_user_target, ChannelKind,
    SERVER_TO_USER_PREFIX,
};
pub use cluster::{RequestOutcome, RequestType};
pub use ids::{AppId, SocketId};
pub use presence::{PresenceMember, SocketInfo, UserData};
pub use socket::{Frame, Outbox, Socket, SocketError, DEFAULT_OUTBOX_CAPACITY};
