//! Per-connection protocol logic, independent of the WebSocket plumbing.
//!
//! Signature checks for private and presence channels belong to the app
//! layer in front of the adapter; subscriptions are accepted as presented.

use serde_json::Value;
use std::sync::Arc;

use crate::domain::{ChannelKind, PresenceMember, Socket, UserData};
use crate::ports::{AdapterError, ConnectionAdapter};

use super::messages::{self, ClientMessage, SubscribeRequest};

/// Pusher error code for a refused subscription.
const INVALID_CHANNEL_DATA_CODE: u16 = 4009;

/// Handles one client frame.
pub async fn handle_client_message(
    adapter: &dyn ConnectionAdapter,
    socket: &Arc<Socket>,
    message: ClientMessage,
) -> Result<(), AdapterError> {
    match message {
        ClientMessage::Ping => {
            reply(socket, &messages::pong());
            Ok(())
        }
        ClientMessage::Subscribe(request) => {
            let channel = request.channel.clone();
            let result = subscribe(adapter, socket, request).await;
            if let Err(e) = &result {
                reply(socket, &messages::subscription_error(&channel, 500, &e.to_string()));
            }
            result
        }
        ClientMessage::Unsubscribe { channel } => unsubscribe(adapter, socket, &channel).await,
        ClientMessage::ClientEvent {
            event,
            channel,
            data,
        } => relay_client_event(adapter, socket, &event, &channel, data).await,
    }
}

/// Subscribes a socket. Presence subscriptions announce the member to the
/// rest of the cluster when the user was not in the channel yet.
pub async fn subscribe(
    adapter: &dyn ConnectionAdapter,
    socket: &Arc<Socket>,
    request: SubscribeRequest,
) -> Result<(), AdapterError> {
    let app_id = socket.app_id().clone();
    let channel = request.channel;

    if ChannelKind::of(&channel) != ChannelKind::Presence {
        adapter
            .add_to_channel(&app_id, &channel, socket.clone())
            .await?;
        reply(socket, &messages::subscription_succeeded(&channel));
        return Ok(());
    }

    let member = match request
        .channel_data
        .as_deref()
        .and_then(messages::parse_channel_data)
    {
        Some(member) => member,
        None => {
            reply(
                socket,
                &messages::error(
                    Some(INVALID_CHANNEL_DATA_CODE),
                    "Presence channels need channel_data with a user_id.",
                ),
            );
            return Ok(());
        }
    };

    let already_present = adapter
        .get_channel_members(&app_id, &channel, false)
        .await?
        .contains_key(&member.user_id);

    socket.set_presence(&channel, member.clone()).await;
    if socket.user().await.is_none() {
        socket
            .set_user(Some(UserData {
                id: member.user_id.clone(),
                user_info: member.user_info.clone(),
            }))
            .await;
        adapter.add_user(socket.clone()).await?;
    }
    adapter
        .add_to_channel(&app_id, &channel, socket.clone())
        .await?;

    let mut members = adapter.get_channel_members(&app_id, &channel, false).await?;
    members.insert(member.user_id.clone(), member.user_info.clone());
    reply(
        socket,
        &messages::presence_subscription_succeeded(&channel, &members),
    );

    if !already_present {
        adapter
            .send(
                &app_id,
                &channel,
                messages::member_added(&channel, &member),
                Some(socket.id()),
            )
            .await?;
    }
    Ok(())
}

/// Unsubscribes a socket. Leaving a presence channel announces the member's
/// departure once none of the user's connections remain in it.
pub async fn unsubscribe(
    adapter: &dyn ConnectionAdapter,
    socket: &Arc<Socket>,
    channel: &str,
) -> Result<(), AdapterError> {
    let app_id = socket.app_id().clone();
    adapter
        .remove_from_channel(&app_id, channel, socket.id())
        .await?;

    if let Some(member) = socket.clear_presence(channel).await {
        announce_departure(adapter, socket, channel, &member).await?;
    }
    Ok(())
}

async fn announce_departure(
    adapter: &dyn ConnectionAdapter,
    socket: &Socket,
    channel: &str,
    member: &PresenceMember,
) -> Result<(), AdapterError> {
    let members = adapter
        .get_channel_members(socket.app_id(), channel, false)
        .await?;
    if !members.contains_key(&member.user_id) {
        adapter
            .send(
                socket.app_id(),
                channel,
                messages::member_removed(channel, &member.user_id),
                Some(socket.id()),
            )
            .await?;
    }
    Ok(())
}

/// Relays a `client-*` event to the channel's other subscribers. Only
/// authenticated channels the socket joined accept client events.
async fn relay_client_event(
    adapter: &dyn ConnectionAdapter,
    socket: &Socket,
    event: &str,
    channel: &str,
    data: Value,
) -> Result<(), AdapterError> {
    let app_id = socket.app_id();
    if !ChannelKind::of(channel).requires_auth()
        || !adapter
            .is_in_channel(app_id, channel, socket.id(), true)
            .await?
    {
        tracing::debug!(
            socket_id = %socket.id(),
            channel,
            "Ignoring client event outside a joined private channel"
        );
        return Ok(());
    }

    let user_id = match ChannelKind::of(channel) {
        ChannelKind::Presence => socket.presence_for(channel).await.map(|m| m.user_id),
        _ => None,
    };
    let message = messages::client_event(event, channel, &data, user_id.as_deref());
    adapter.send(app_id, channel, message, Some(socket.id())).await
}

/// Removes every trace of a closed connection.
pub async fn cleanup(adapter: &dyn ConnectionAdapter, socket: &Arc<Socket>) {
    let app_id = socket.app_id().clone();
    let channels = socket.subscribed_channels().await;

    let (presence, plain): (Vec<String>, Vec<String>) = channels
        .into_iter()
        .partition(|channel| ChannelKind::of(channel) == ChannelKind::Presence);

    for channel in &presence {
        if let Err(e) = unsubscribe(adapter, socket, channel).await {
            tracing::warn!(
                socket_id = %socket.id(),
                channel = %channel,
                "Presence cleanup failed: {}",
                e
            );
        }
    }

    let result = async {
        adapter
            .remove_from_channels(&app_id, &plain, socket.id())
            .await?;
        adapter.remove_user(socket).await?;
        adapter.remove_socket(&app_id, socket.id()).await?;
        Ok::<_, AdapterError>(())
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(socket_id = %socket.id(), "Connection cleanup failed: {}", e);
    }
}

/// Queues a frame; a full or closed outbox only costs this one frame.
fn reply(socket: &Socket, message: &Value) {
    if let Err(e) = socket.send_json(message) {
        tracing::debug!("Dropping reply: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::local::LocalAdapter;
    use crate::domain::{AppId, Frame, Outbox, SocketId};

    fn socket(id: &str) -> (Arc<Socket>, Outbox) {
        let (socket, rx) = Socket::with_outbox(SocketId::new(id), AppId::from("app"), 16);
        (Arc::new(socket), rx)
    }

    fn next_json(rx: &mut Outbox) -> Value {
        match rx.try_recv() {
            Ok(Frame::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    fn presence_request(channel: &str, user_id: &str) -> SubscribeRequest {
        SubscribeRequest {
            channel: channel.into(),
            auth: None,
            channel_data: Some(format!(r#"{{"user_id":"{user_id}","user_info":"{user_id}"}}"#)),
        }
    }

    #[tokio::test]
    async fn ping_gets_pong() {
        let adapter = LocalAdapter::new();
        let (s, mut rx) = socket("1.1");
        handle_client_message(&adapter, &s, ClientMessage::Ping)
            .await
            .unwrap();
        assert_eq!(next_json(&mut rx)["event"], "pusher:pong");
    }

    #[tokio::test]
    async fn presence_join_announces_new_member_only() {
        let adapter = LocalAdapter::new();
        let app = AppId::from("app");
        let (a, mut rx_a) = socket("1.1");
        let (b, mut rx_b) = socket("1.2");
        adapter.add_socket(&app, a.clone()).await.unwrap();
        adapter.add_socket(&app, b.clone()).await.unwrap();

        subscribe(&adapter, &a, presence_request("presence-x", "1"))
            .await
            .unwrap();
        assert_eq!(
            next_json(&mut rx_a)["event"],
            "pusher_internal:subscription_succeeded"
        );

        subscribe(&adapter, &b, presence_request("presence-x", "2"))
            .await
            .unwrap();
        let added = next_json(&mut rx_a);
        assert_eq!(added["event"], "pusher_internal:member_added");

        let confirmed = next_json(&mut rx_b);
        let data: Value = serde_json::from_str(confirmed["data"].as_str().unwrap()).unwrap();
        assert_eq!(data["presence"]["count"], 2);
        assert!(b.user().await.is_some());
    }

    #[tokio::test]
    async fn presence_without_channel_data_is_refused() {
        let adapter = LocalAdapter::new();
        let (s, mut rx) = socket("1.1");
        let request = SubscribeRequest {
            channel: "presence-x".into(),
            auth: None,
            channel_data: None,
        };
        subscribe(&adapter, &s, request).await.unwrap();
        assert_eq!(next_json(&mut rx)["event"], "pusher:error");
        assert!(s.subscribed_channels().await.is_empty());
    }

    #[tokio::test]
    async fn cleanup_announces_departure_and_forgets_socket() {
        let adapter = LocalAdapter::new();
        let app = AppId::from("app");
        let (a, _rx_a) = socket("1.1");
        let (b, mut rx_b) = socket("1.2");
        adapter.add_socket(&app, a.clone()).await.unwrap();
        adapter.add_socket(&app, b.clone()).await.unwrap();
        subscribe(&adapter, &a, presence_request("presence-x", "1"))
            .await
            .unwrap();
        subscribe(&adapter, &b, presence_request("presence-x", "2"))
            .await
            .unwrap();
        let _ = next_json(&mut rx_b);

        cleanup(&adapter, &a).await;

        assert_eq!(
            next_json(&mut rx_b)["event"],
            "pusher_internal:member_removed"
        );
        assert_eq!(adapter.get_sockets_count(&app, true).await.unwrap(), 1);
        assert!(adapter
            .get_user_sockets(&app, "1")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn client_events_skip_sender_and_public_channels() {
        let adapter = LocalAdapter::new();
        let app = AppId::from("app");
        let (a, mut rx_a) = socket("1.1");
        let (b, mut rx_b) = socket("1.2");
        for s in [&a, &b] {
            adapter.add_socket(&app, s.clone()).await.unwrap();
            adapter
                .add_to_channel(&app, "private-room", s.clone())
                .await
                .unwrap();
            adapter.add_to_channel(&app, "room", s.clone()).await.unwrap();
        }

        let event = ClientMessage::ClientEvent {
            event: "client-typing".into(),
            channel: "private-room".into(),
            data: serde_json::json!({"typing": true}),
        };
        handle_client_message(&adapter, &a, event).await.unwrap();
        assert_eq!(next_json(&mut rx_b)["event"], "client-typing");
        assert!(rx_a.try_recv().is_err());

        let public = ClientMessage::ClientEvent {
            event: "client-typing".into(),
            channel: "room".into(),
            data: Value::Null,
        };
        handle_client_message(&adapter, &a, public).await.unwrap();
        assert!(rx_b.try_recv().is_err());
    }
}
