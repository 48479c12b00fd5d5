//! Horizontal adapter integration tests.
//!
//! Several nodes share one in-memory hub, so every cross-node path runs for
//! real: request fan-out, response merging, timeouts and broadcasts.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use pushline::adapters::transport::{MemoryHub, MemoryTransport};
use pushline::adapters::HorizontalAdapter;
use pushline::domain::{AppId, Frame, Outbox, PresenceMember, Socket, SocketId, UserData};
use pushline::ports::{AdapterError, ConnectionAdapter, InboundMessage, Topic, Transport};

type Node = Arc<HorizontalAdapter<MemoryTransport>>;

const TIMEOUT: Duration = Duration::from_millis(300);

// =============================================================================
// Test Fixtures
// =============================================================================

fn app() -> AppId {
    AppId::from("app-1")
}

async fn node(hub: &MemoryHub) -> Node {
    HorizontalAdapter::init(hub.transport(), TIMEOUT)
        .await
        .expect("node should start")
}

async fn join(node: &Node, id: &str, channel: &str) -> (Arc<Socket>, Outbox) {
    let (socket, rx) = Socket::with_outbox(SocketId::new(id), app(), 16);
    let socket = Arc::new(socket);
    node.add_socket(&app(), socket.clone()).await.unwrap();
    node.add_to_channel(&app(), channel, socket.clone())
        .await
        .unwrap();
    (socket, rx)
}

async fn join_presence(
    node: &Node,
    id: &str,
    channel: &str,
    user_id: &str,
    user_info: Value,
) -> (Arc<Socket>, Outbox) {
    let (socket, rx) = Socket::with_outbox(SocketId::new(id), app(), 16);
    let socket = Arc::new(socket);
    socket
        .set_presence(channel, PresenceMember::new(user_id, user_info))
        .await;
    node.add_socket(&app(), socket.clone()).await.unwrap();
    node.add_to_channel(&app(), channel, socket.clone())
        .await
        .unwrap();
    (socket, rx)
}

/// A listener that never answers, standing in for a stalled peer.
async fn silent_peer(hub: &MemoryHub) -> (MemoryTransport, mpsc::UnboundedReceiver<InboundMessage>) {
    let transport = hub.transport();
    let (tx, rx) = mpsc::unbounded_channel();
    transport.listen(tx).await.unwrap();
    (transport, rx)
}

async fn next_frame(rx: &mut Outbox) -> Option<Frame> {
    tokio::time::timeout(Duration::from_millis(200), rx.recv())
        .await
        .ok()
        .flatten()
}

fn event_of(frame: Option<Frame>) -> Value {
    match frame {
        Some(Frame::Text(text)) => serde_json::from_str(&text).unwrap(),
        other => panic!("expected a text frame, got {:?}", other),
    }
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn channel_socket_count_sums_both_nodes() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let b = node(&hub).await;
    let _s1 = join(&a, "1.1", "c1").await;
    let _s2 = join(&b, "2.1", "c1").await;

    assert_eq!(a.get_channel_sockets_count(&app(), "c1", false).await.unwrap(), 2);
    assert_eq!(a.get_channel_sockets_count(&app(), "c1", true).await.unwrap(), 1);
    assert_eq!(a.pending_requests().await, 0);
}

#[tokio::test]
async fn single_node_answers_without_publishing() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let _s1 = join(&a, "1.1", "c1").await;

    assert_eq!(a.get_channel_sockets_count(&app(), "c1", false).await.unwrap(), 1);
    assert_eq!(hub.published(Topic::Request).await, 0);
}

#[tokio::test]
async fn presence_members_are_merged_across_nodes() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let b = node(&hub).await;
    let _s1 = join_presence(&a, "1.1", "presence-room", "1", json!("John")).await;
    let _s2 = join_presence(&b, "2.1", "presence-room", "2", json!("Alice")).await;

    let members = a
        .get_channel_members(&app(), "presence-room", false)
        .await
        .unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(members["1"], json!("John"));
    assert_eq!(members["2"], json!("Alice"));

    assert_eq!(
        b.get_channel_members_count(&app(), "presence-room", false)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn channels_with_counts_are_summed_per_channel() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let b = node(&hub).await;
    let _s1 = join(&a, "1.1", "c1").await;
    let _s2 = join(&b, "2.1", "c1").await;
    let _s3 = join(&b, "2.2", "c2").await;

    let counts = a.get_channels_with_sockets_count(&app(), false).await.unwrap();
    assert_eq!(counts["c1"], 2);
    assert_eq!(counts["c2"], 1);

    let sockets = a.get_sockets(&app(), false).await.unwrap();
    assert_eq!(sockets.len(), 3);
    assert_eq!(a.get_sockets_count(&app(), false).await.unwrap(), 3);
}

#[tokio::test]
async fn membership_check_finds_remote_socket() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let b = node(&hub).await;
    let _s2 = join(&b, "2.1", "c1").await;

    let remote = SocketId::new("2.1");
    assert!(a.is_in_channel(&app(), "c1", &remote, false).await.unwrap());
    assert!(!a.is_in_channel(&app(), "c1", &remote, true).await.unwrap());
    assert!(!a
        .is_in_channel(&app(), "c1", &SocketId::new("9.9"), false)
        .await
        .unwrap());
}

// =============================================================================
// Timeouts and short-circuits
// =============================================================================

#[tokio::test]
async fn silent_peer_times_out_and_leaves_no_pending_request() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let _peer = silent_peer(&hub).await;
    let _s1 = join(&a, "1.1", "c1").await;

    let result = a.get_channel_sockets_count(&app(), "c1", false).await;

    match result {
        Err(AdapterError::Timeout {
            received, expected, ..
        }) => {
            assert_eq!(received, 1);
            assert_eq!(expected, 2);
        }
        other => panic!("expected a timeout, got {:?}", other),
    }
    assert_eq!(a.pending_requests().await, 0);
}

#[tokio::test]
async fn abandoned_query_leaves_no_pending_request() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let _peer = silent_peer(&hub).await;
    let _s1 = join(&a, "1.1", "c1").await;

    let querying = a.clone();
    let query = tokio::spawn(async move { querying.get_sockets_count(&app(), false).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(a.pending_requests().await, 1);

    query.abort();
    assert!(query.await.unwrap_err().is_cancelled());
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Well before the request timeout.
    assert_eq!(a.pending_requests().await, 0);
}

#[tokio::test]
async fn local_membership_skips_the_network() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let _peer = silent_peer(&hub).await;
    let _s1 = join(&a, "1.1", "c1").await;

    let started = std::time::Instant::now();
    assert!(a
        .is_in_channel(&app(), "c1", &SocketId::new("1.1"), false)
        .await
        .unwrap());
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(hub.published(Topic::Request).await, 0);
}

#[tokio::test]
async fn positive_answer_resolves_before_silent_peer() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let b = node(&hub).await;
    let _peer = silent_peer(&hub).await;
    let _s2 = join(&b, "2.1", "c1").await;

    let started = std::time::Instant::now();
    assert!(a
        .is_in_channel(&app(), "c1", &SocketId::new("2.1"), false)
        .await
        .unwrap());
    assert!(started.elapsed() < TIMEOUT);
    assert_eq!(a.pending_requests().await, 0);
}

// =============================================================================
// Broadcasts
// =============================================================================

#[tokio::test]
async fn broadcast_reaches_remote_subscribers_except_excluded() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let b = node(&hub).await;
    let (_s1, mut rx1) = join(&a, "1.1", "c1").await;
    let (_s2, mut rx2) = join(&b, "2.1", "c1").await;
    let (_s3, mut rx3) = join(&b, "2.2", "c1").await;

    a.send(
        &app(),
        "c1",
        json!({"event": "e", "channel": "c1", "data": "x"}),
        Some(&SocketId::new("2.2")),
    )
    .await
    .unwrap();

    assert_eq!(event_of(next_frame(&mut rx1).await)["event"], "e");
    assert_eq!(event_of(next_frame(&mut rx2).await)["event"], "e");
    assert!(next_frame(&mut rx3).await.is_none());
}

#[tokio::test]
async fn sender_does_not_deliver_its_own_echo_twice() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let _b = node(&hub).await;
    let (_s1, mut rx1) = join(&a, "1.1", "c1").await;

    a.send(&app(), "c1", json!({"event": "e"}), None)
        .await
        .unwrap();

    assert!(next_frame(&mut rx1).await.is_some());
    assert!(next_frame(&mut rx1).await.is_none());
    assert_eq!(hub.published(Topic::Broadcast).await, 1);
}

// =============================================================================
// User termination
// =============================================================================

#[tokio::test]
async fn terminate_closes_user_sockets_on_every_node() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    let b = node(&hub).await;

    let mut outboxes = Vec::new();
    for (node, id) in [(&a, "1.1"), (&b, "2.1")] {
        let (socket, rx) = Socket::with_outbox(SocketId::new(id), app(), 16);
        let socket = Arc::new(socket);
        socket.set_user(Some(UserData::new("alice"))).await;
        node.add_socket(&app(), socket.clone()).await.unwrap();
        node.add_user(socket).await.unwrap();
        outboxes.push(rx);
    }

    a.terminate_user_connections(&app(), "alice").await.unwrap();

    for rx in outboxes.iter_mut() {
        let notice = event_of(next_frame(rx).await);
        assert_eq!(notice["event"], "pusher:error");
        assert!(matches!(next_frame(rx).await, Some(Frame::Close { .. })));
        // The requesting node does not act on its own request again.
        assert!(next_frame(rx).await.is_none());
    }
}

#[tokio::test]
async fn disconnect_stops_listening() {
    let hub = MemoryHub::new();
    let a = node(&hub).await;
    assert_eq!(hub.listeners().await, 1);

    a.disconnect().await.unwrap();

    assert_eq!(hub.listeners().await, 0);
}
