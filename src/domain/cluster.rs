//! Vocabulary of the cross-node request protocol.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of cluster-wide requests a node can issue to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Sockets,
    SocketsCount,
    Channels,
    ChannelsWithSocketsCount,
    ChannelSockets,
    ChannelSocketsCount,
    ChannelMembers,
    ChannelMembersCount,
    SocketExistsInChannel,
    /// Fire-and-forget: peers act on it and never reply.
    TerminateUserConnections,
}

impl RequestType {
    /// Whether peers answer this request on the response topic.
    pub fn expects_response(&self) -> bool {
        !matches!(self, RequestType::TerminateUserConnections)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestType::Sockets => "sockets",
            RequestType::SocketsCount => "sockets_count",
            RequestType::Channels => "channels",
            RequestType::ChannelsWithSocketsCount => "channels_with_sockets_count",
            RequestType::ChannelSockets => "channel_sockets",
            RequestType::ChannelSocketsCount => "channel_sockets_count",
            RequestType::ChannelMembers => "channel_members",
            RequestType::ChannelMembersCount => "channel_members_count",
            RequestType::SocketExistsInChannel => "socket_exists_in_channel",
            RequestType::TerminateUserConnections => "terminate_user_connections",
        };
        write!(f, "{}", s)
    }
}

/// How a pending cross-node request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestOutcome {
    /// Every expected peer answered.
    Resolved,
    /// An existence check found a positive answer early.
    ShortCircuited,
    /// The deadline elapsed first.
    TimedOut,
}
