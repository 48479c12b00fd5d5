//! Channel naming conventions.
//!
//! Channel behaviour is encoded in the name prefix, following the Pusher
//! protocol. One extra convention, `#server-to-user-<user_id>`, addresses all
//! connections of an authenticated user and is never a real subscription.

use std::fmt;

/// Prefix of the destinations that address a user rather than a channel.
pub const SERVER_TO_USER_PREFIX: &str = "#server-to-user-";

/// The kind of a channel, derived from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    Public,
    Private,
    PrivateEncrypted,
    Presence,
}

impl ChannelKind {
    /// Classifies a channel by its name.
    pub fn of(channel: &str) -> Self {
        if channel.starts_with("presence-") {
            ChannelKind::Presence
        } else if channel.starts_with("private-encrypted-") {
            ChannelKind::PrivateEncrypted
        } else if channel.starts_with("private-") {
            ChannelKind::Private
        } else {
            ChannelKind::Public
        }
    }

    /// Whether subscribing requires a signed authorization.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, ChannelKind::Public)
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelKind::Public => "public",
            ChannelKind::Private => "private",
            ChannelKind::PrivateEncrypted => "private-encrypted",
            ChannelKind::Presence => "presence",
        };
        write!(f, "{}", s)
    }
}

/// Returns true for `presence-` channels.
pub fn is_presence_channel(channel: &str) -> bool {
    ChannelKind::of(channel) == ChannelKind::Presence
}

/// Extracts the user id from a server-to-user destination.
pub fn server_to_user_target(channel: &str) -> Option<&str> {
    channel
        .strip_prefix(SERVER_TO_USER_PREFIX)
        .filter(|user_id| !user_id.is_empty())
}

/// Builds the server-to-user destination for a user id.
pub fn server_to_user_channel(user_id: &str) -> String {
    format!("{}{}", SERVER_TO_USER_PREFIX, user_id)
}
