//! Per-app connection bookkeeping on a single node.
//!
//! # Architecture
//!
//! ```text
//! Namespace(app-1)
//! ├── sockets:  1.1 → Socket, 1.2 → Socket, 2.7 → Socket
//! ├── channels: chat → {1.1, 1.2}   presence-room → {2.7}
//! └── users:    alice → {1.1, 2.7}
//! ```
//!
//! Empty channel and user entries are pruned as soon as their last member
//! leaves. Reads return snapshots, never live views.

use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::domain::{AppId, Socket, SocketId};

/// Close code sent to connections terminated by the application.
pub const TERMINATED_BY_APP_CODE: u16 = 4009;

/// Single-node registry of one app's sockets, channels and users.
///
/// Lock order when more than one map is needed: `sockets`, `channels`,
/// `users`. No method holds two locks at once.
#[derive(Debug)]
pub struct Namespace {
    app_id: AppId,
    sockets: RwLock<HashMap<SocketId, Arc<Socket>>>,
    channels: RwLock<HashMap<String, HashSet<SocketId>>>,
    users: RwLock<HashMap<String, HashSet<SocketId>>>,
}

impl Namespace {
    pub fn new(app_id: AppId) -> Self {
        Self {
            app_id,
            sockets: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            users: RwLock::new(HashMap::new()),
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// Registers a socket, replacing any previous entry with the same id.
    pub async fn add_socket(&self, socket: Arc<Socket>) -> bool {
        self.sockets
            .write()
            .await
            .insert(socket.id().clone(), socket);
        true
    }

    /// Removes a socket from every channel and user entry, then from the
    /// registry. Returns whether the socket was registered.
    ///
    /// Scans every channel key rather than the socket's own subscription
    /// cache so that no channel can keep a dangling id.
    pub async fn remove_socket(&self, socket_id: &SocketId) -> bool {
        let channels: Vec<String> = self.channels.read().await.keys().cloned().collect();
        self.remove_from_channels(socket_id, &channels).await;

        {
            let mut users = self.users.write().await;
            users.retain(|_, ids| {
                ids.remove(socket_id);
                !ids.is_empty()
            });
        }

        self.sockets.write().await.remove(socket_id).is_some()
    }

    /// Subscribes a socket to a channel; returns the new member count.
    pub async fn add_to_channel(&self, socket: &Socket, channel: &str) -> usize {
        let count = {
            let mut channels = self.channels.write().await;
            let members = channels.entry(channel.to_string()).or_default();
            members.insert(socket.id().clone());
            members.len()
        };
        socket.mark_subscribed(channel).await;
        count
    }

    /// Unsubscribes a socket; returns the remaining member count, 0 when the
    /// channel no longer exists.
    pub async fn remove_from_channel(&self, socket_id: &SocketId, channel: &str) -> usize {
        let remaining = {
            let mut channels = self.channels.write().await;
            match channels.get_mut(channel) {
                Some(members) => {
                    members.remove(socket_id);
                    let remaining = members.len();
                    if remaining == 0 {
                        channels.remove(channel);
                    }
                    remaining
                }
                None => 0,
            }
        };
        self.unmark(socket_id, std::iter::once(channel)).await;
        remaining
    }

    /// Batch unsubscribe used by disconnect cleanup.
    pub async fn remove_from_channels(&self, socket_id: &SocketId, channels: &[String]) {
        {
            let mut map = self.channels.write().await;
            for channel in channels {
                if let Some(members) = map.get_mut(channel) {
                    members.remove(socket_id);
                    if members.is_empty() {
                        map.remove(channel);
                    }
                }
            }
        }
        self.unmark(socket_id, channels.iter().map(String::as_str))
            .await;
    }

    pub async fn is_in_channel(&self, socket_id: &SocketId, channel: &str) -> bool {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|members| members.contains(socket_id))
            .unwrap_or(false)
    }

    pub async fn sockets(&self) -> HashMap<SocketId, Arc<Socket>> {
        self.sockets.read().await.clone()
    }

    pub async fn sockets_count(&self) -> usize {
        self.sockets.read().await.len()
    }

    pub async fn get_socket(&self, socket_id: &SocketId) -> Option<Arc<Socket>> {
        self.sockets.read().await.get(socket_id).cloned()
    }

    pub async fn channels(&self) -> HashMap<String, HashSet<SocketId>> {
        self.channels.read().await.clone()
    }

    pub async fn channels_with_sockets_count(&self) -> HashMap<String, usize> {
        self.channels
            .read()
            .await
            .iter()
            .map(|(channel, members)| (channel.clone(), members.len()))
            .collect()
    }

    /// Live handles of a channel's subscribers.
    pub async fn channel_sockets(&self, channel: &str) -> HashMap<SocketId, Arc<Socket>> {
        let ids: Vec<SocketId> = match self.channels.read().await.get(channel) {
            Some(members) => members.iter().cloned().collect(),
            None => return HashMap::new(),
        };

        let sockets = self.sockets.read().await;
        ids.into_iter()
            .filter_map(|id| sockets.get(&id).map(|s| (id, s.clone())))
            .collect()
    }

    pub async fn channel_sockets_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(HashSet::len)
            .unwrap_or(0)
    }

    /// Presence members of a channel keyed by user id.
    ///
    /// Derived from the subscribers' own presence entries; a subscriber
    /// without an entry for this channel contributes nothing.
    pub async fn channel_members(&self, channel: &str) -> HashMap<String, Value> {
        let mut members = HashMap::new();
        for socket in self.channel_sockets(channel).await.into_values() {
            if let Some(member) = socket.presence_for(channel).await {
                members.insert(member.user_id, member.user_info);
            }
        }
        members
    }

    /// Indexes a socket under its user id; no-op for anonymous sockets.
    pub async fn add_user(&self, socket: &Socket) {
        if let Some(user) = socket.user().await {
            self.users
                .write()
                .await
                .entry(user.id)
                .or_default()
                .insert(socket.id().clone());
        }
    }

    pub async fn remove_user(&self, socket: &Socket) {
        if let Some(user) = socket.user().await {
            let mut users = self.users.write().await;
            if let Some(ids) = users.get_mut(&user.id) {
                ids.remove(socket.id());
                if ids.is_empty() {
                    users.remove(&user.id);
                }
            }
        }
    }

    /// Live handles of a user's connections; empty for unknown users.
    pub async fn user_sockets(&self, user_id: &str) -> Vec<Arc<Socket>> {
        let ids: Vec<SocketId> = match self.users.read().await.get(user_id) {
            Some(ids) => ids.iter().cloned().collect(),
            None => return Vec::new(),
        };

        let sockets = self.sockets.read().await;
        ids.iter().filter_map(|id| sockets.get(id).cloned()).collect()
    }

    /// Sends each of the user's connections a 4009 error and closes it.
    /// Failures are ignored; the connection may already be gone.
    pub async fn terminate_user_connections(&self, user_id: &str) {
        let notice = json!({
            "event": "pusher:error",
            "data": {
                "code": TERMINATED_BY_APP_CODE,
                "message": "You got disconnected by the app.",
            },
        });

        for socket in self.user_sockets(user_id).await {
            if let Err(e) = socket.send_json(&notice) {
                tracing::debug!(socket_id = %socket.id(), "Termination notice not delivered: {}", e);
            }
            if let Err(e) = socket.close(TERMINATED_BY_APP_CODE, "You got disconnected by the app.") {
                tracing::debug!(socket_id = %socket.id(), "Close request not delivered: {}", e);
            }
        }
    }

    async fn unmark<'a>(&self, socket_id: &SocketId, channels: impl Iterator<Item = &'a str>) {
        let socket = self.sockets.read().await.get(socket_id).cloned();
        if let Some(socket) = socket {
            for channel in channels {
                socket.mark_unsubscribed(channel).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Frame, Outbox, PresenceMember, UserData};
    use proptest::prelude::*;

    fn socket(id: &str) -> (Arc<Socket>, Outbox) {
        let (socket, rx) = Socket::with_outbox(SocketId::new(id), AppId::from("app"), 8);
        (Arc::new(socket), rx)
    }

    fn namespace() -> Namespace {
        Namespace::new(AppId::from("app"))
    }

    #[tokio::test]
    async fn add_to_channel_returns_member_count() {
        let ns = namespace();
        let (a, _ra) = socket("1.1");
        let (b, _rb) = socket("1.2");
        ns.add_socket(a.clone()).await;
        ns.add_socket(b.clone()).await;

        assert_eq!(ns.add_to_channel(&a, "chat").await, 1);
        assert_eq!(ns.add_to_channel(&b, "chat").await, 2);
        assert_eq!(ns.add_to_channel(&b, "chat").await, 2);
    }

    #[tokio::test]
    async fn removing_last_member_prunes_channel() {
        let ns = namespace();
        let (a, _ra) = socket("1.1");
        ns.add_socket(a.clone()).await;
        ns.add_to_channel(&a, "chat").await;

        assert_eq!(ns.remove_from_channel(a.id(), "chat").await, 0);
        assert!(ns.channels().await.is_empty());
        assert!(a.subscribed_channels().await.is_empty());
    }

    #[tokio::test]
    async fn remove_from_unknown_channel_returns_zero() {
        let ns = namespace();
        assert_eq!(ns.remove_from_channel(&SocketId::new("9.9"), "nope").await, 0);
    }

    #[tokio::test]
    async fn remove_socket_clears_every_channel() {
        let ns = namespace();
        let (a, _ra) = socket("1.1");
        let (b, _rb) = socket("1.2");
        ns.add_socket(a.clone()).await;
        ns.add_socket(b.clone()).await;
        ns.add_to_channel(&a, "one").await;
        ns.add_to_channel(&a, "two").await;
        ns.add_to_channel(&b, "two").await;

        assert!(ns.remove_socket(a.id()).await);

        let channels = ns.channels().await;
        assert!(!channels.contains_key("one"));
        assert_eq!(channels["two"].len(), 1);
        assert!(!ns.sockets().await.contains_key(a.id()));
    }

    #[tokio::test]
    async fn remove_absent_socket_is_noop() {
        let ns = namespace();
        assert!(!ns.remove_socket(&SocketId::new("0.0")).await);
    }

    #[tokio::test]
    async fn is_in_channel_false_for_unknown_channel() {
        let ns = namespace();
        assert!(!ns.is_in_channel(&SocketId::new("1.1"), "missing").await);
    }

    #[tokio::test]
    async fn channel_members_skip_sockets_without_presence() {
        let ns = namespace();
        let (a, _ra) = socket("1.1");
        let (b, _rb) = socket("1.2");
        ns.add_socket(a.clone()).await;
        ns.add_socket(b.clone()).await;
        a.set_presence("presence-x", PresenceMember::new("1", json!("John")))
            .await;
        ns.add_to_channel(&a, "presence-x").await;
        ns.add_to_channel(&b, "presence-x").await;

        let members = ns.channel_members("presence-x").await;
        assert_eq!(members.len(), 1);
        assert_eq!(members["1"], json!("John"));
    }

    #[tokio::test]
    async fn user_index_prunes_empty_entries() {
        let ns = namespace();
        let (a, _ra) = socket("1.1");
        a.set_user(Some(UserData::new("alice"))).await;
        ns.add_socket(a.clone()).await;
        ns.add_user(&a).await;
        assert_eq!(ns.user_sockets("alice").await.len(), 1);

        ns.remove_user(&a).await;
        assert!(ns.user_sockets("alice").await.is_empty());
        assert!(ns.users.read().await.is_empty());
    }

    #[tokio::test]
    async fn anonymous_socket_is_not_indexed() {
        let ns = namespace();
        let (a, _ra) = socket("1.1");
        ns.add_user(&a).await;
        assert!(ns.users.read().await.is_empty());
    }

    #[tokio::test]
    async fn unknown_user_has_no_sockets() {
        assert!(namespace().user_sockets("ghost").await.is_empty());
    }

    #[tokio::test]
    async fn terminate_sends_notice_then_close() {
        let ns = namespace();
        let (a, mut ra) = socket("1.1");
        a.set_user(Some(UserData::new("alice"))).await;
        ns.add_socket(a.clone()).await;
        ns.add_user(&a).await;

        ns.terminate_user_connections("alice").await;

        match ra.recv().await {
            Some(Frame::Text(text)) => assert!(text.contains("4009")),
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(matches!(
            ra.recv().await,
            Some(Frame::Close { code: TERMINATED_BY_APP_CODE, .. })
        ));
    }

    #[tokio::test]
    async fn terminate_closes_connection_with_full_outbox() {
        let ns = namespace();
        let (a, mut ra) = Socket::with_outbox(SocketId::new("1.1"), AppId::from("app"), 2);
        let a = Arc::new(a);
        a.set_user(Some(UserData::new("alice"))).await;
        ns.add_socket(a.clone()).await;
        ns.add_user(&a).await;
        a.send_text("backlog-1").unwrap();
        a.send_text("backlog-2").unwrap();

        ns.terminate_user_connections("alice").await;

        assert!(matches!(
            ra.recv().await,
            Some(Frame::Close { code: TERMINATED_BY_APP_CODE, .. })
        ));
    }

    #[tokio::test]
    async fn terminate_ignores_closed_connections() {
        let ns = namespace();
        let (a, ra) = socket("1.1");
        a.set_user(Some(UserData::new("alice"))).await;
        ns.add_socket(a.clone()).await;
        ns.add_user(&a).await;
        drop(ra);

        ns.terminate_user_connections("alice").await;
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8),
        Remove(u8),
        Join(u8, u8),
        Leave(u8, u8),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6).prop_map(Op::Add),
            (0u8..6).prop_map(Op::Remove),
            (0u8..6, 0u8..4).prop_map(|(s, c)| Op::Join(s, c)),
            (0u8..6, 0u8..4).prop_map(|(s, c)| Op::Leave(s, c)),
        ]
    }

    proptest! {
        #[test]
        fn channels_never_hold_removed_or_empty_sets(ops in proptest::collection::vec(op_strategy(), 0..40)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let ns = namespace();
                let mut outboxes = Vec::new();
                let mut removed = HashSet::new();

                for op in ops {
                    match op {
                        Op::Add(s) => {
                            let (sock, rx) = socket(&format!("{}.0", s));
                            outboxes.push(rx);
                            ns.add_socket(sock).await;
                            removed.remove(&SocketId::new(format!("{}.0", s)));
                        }
                        Op::Remove(s) => {
                            let id = SocketId::new(format!("{}.0", s));
                            ns.remove_socket(&id).await;
                            removed.insert(id);
                        }
                        Op::Join(s, c) => {
                            let id = SocketId::new(format!("{}.0", s));
                            if let Some(sock) = ns.get_socket(&id).await {
                                ns.add_to_channel(&sock, &format!("c{}", c)).await;
                            }
                        }
                        Op::Leave(s, c) => {
                            let id = SocketId::new(format!("{}.0", s));
                            ns.remove_from_channel(&id, &format!("c{}", c)).await;
                        }
                    }
                }

                for (channel, members) in ns.channels().await {
                    assert!(!members.is_empty(), "channel {} left empty", channel);
                    for id in &removed {
                        assert!(!members.contains(id), "{} still in {}", id, channel);
                    }
                }
                for id in &removed {
                    assert!(ns.get_socket(id).await.is_none());
                }
            });
        }
    }
}
