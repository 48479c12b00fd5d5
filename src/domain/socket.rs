//! Live connection handle.
//!
//! A `Socket` is owned by exactly one node. Outgoing frames go through a
//! bounded outbox drained by the connection's writer task, so a slow or
//! vanished client shows up as a failed `try_send` instead of blocking the
//! broadcaster. A close request that finds the outbox full travels on a
//! separate one-shot signal, which the writer checks before queued frames.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot, RwLock};

use super::{AppId, PresenceMember, SocketId, SocketInfo, UserData};

/// Default capacity of a socket's outbox.
pub const DEFAULT_OUTBOX_CAPACITY: usize = 256;

/// A frame queued for the connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Text payload (a serialized Pusher message).
    Text(String),
    /// Close the connection with a WebSocket close code.
    Close { code: u16, reason: String },
}

/// Errors from writing to a single socket.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    #[error("outbox of socket {0} is full")]
    Backpressure(SocketId),

    #[error("socket {0} is closed")]
    Closed(SocketId),
}

/// Handle to one client connection.
#[derive(Debug)]
pub struct Socket {
    id: SocketId,
    app_id: AppId,
    user: RwLock<Option<UserData>>,
    presence: RwLock<HashMap<String, PresenceMember>>,
    subscribed: RwLock<HashSet<String>>,
    outbox: mpsc::Sender<Frame>,
    close_signal: Mutex<Option<oneshot::Sender<Frame>>>,
}

/// Receiving end of a socket's outbox, drained by the writer task.
#[derive(Debug)]
pub struct Outbox {
    frames: mpsc::Receiver<Frame>,
    close: Option<oneshot::Receiver<Frame>>,
}

impl Outbox {
    /// Next frame to write. A pending out-of-band close wins over queued
    /// frames. `None` once the socket is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        let signal = match self.close.as_mut() {
            Some(close) => tokio::select! {
                biased;
                signal = close => signal,
                frame = self.frames.recv() => return frame,
            },
            None => return self.frames.recv().await,
        };

        self.close = None;
        match signal {
            Ok(frame) => Some(frame),
            Err(_) => self.frames.recv().await,
        }
    }

    pub fn try_recv(&mut self) -> Result<Frame, mpsc::error::TryRecvError> {
        if let Some(close) = self.close.as_mut() {
            match close.try_recv() {
                Ok(frame) => {
                    self.close = None;
                    return Ok(frame);
                }
                Err(oneshot::error::TryRecvError::Closed) => self.close = None,
                Err(oneshot::error::TryRecvError::Empty) => {}
            }
        }
        self.frames.try_recv()
    }
}

impl Socket {
    /// Creates a socket together with the receiving end of its outbox.
    pub fn with_outbox(id: SocketId, app_id: AppId, capacity: usize) -> (Self, Outbox) {
        let (tx, frames) = mpsc::channel(capacity);
        let (close_tx, close_rx) = oneshot::channel();
        let socket = Self {
            id,
            app_id,
            user: RwLock::new(None),
            presence: RwLock::new(HashMap::new()),
            subscribed: RwLock::new(HashSet::new()),
            outbox: tx,
            close_signal: Mutex::new(Some(close_tx)),
        };
        let outbox = Outbox {
            frames,
            close: Some(close_rx),
        };
        (socket, outbox)
    }

    pub fn id(&self) -> &SocketId {
        &self.id
    }

    pub fn app_id(&self) -> &AppId {
        &self.app_id
    }

    /// The authenticated user, if the connection signed in.
    pub async fn user(&self) -> Option<UserData> {
        self.user.read().await.clone()
    }

    pub async fn set_user(&self, user: Option<UserData>) {
        *self.user.write().await = user;
    }

    /// Presence entry for a channel, if this socket joined it as a member.
    pub async fn presence_for(&self, channel: &str) -> Option<PresenceMember> {
        self.presence.read().await.get(channel).cloned()
    }

    pub async fn set_presence(&self, channel: &str, member: PresenceMember) {
        self.presence
            .write()
            .await
            .insert(channel.to_string(), member);
    }

    pub async fn clear_presence(&self, channel: &str) -> Option<PresenceMember> {
        self.presence.write().await.remove(channel)
    }

    /// Channels this socket believes it is subscribed to.
    pub async fn subscribed_channels(&self) -> Vec<String> {
        self.subscribed.read().await.iter().cloned().collect()
    }

    pub(crate) async fn mark_subscribed(&self, channel: &str) {
        self.subscribed.write().await.insert(channel.to_string());
    }

    pub(crate) async fn mark_unsubscribed(&self, channel: &str) {
        self.subscribed.write().await.remove(channel);
    }

    /// Queues a text frame without waiting.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), SocketError> {
        self.push(Frame::Text(text.into()))
    }

    /// Serializes and queues a JSON message.
    pub fn send_json(&self, message: &Value) -> Result<(), SocketError> {
        self.send_text(message.to_string())
    }

    /// Asks the writer task to close the connection.
    ///
    /// The close frame is queued behind earlier frames when there is room.
    /// A full outbox does not block it: the request then skips the queue.
    pub fn close(&self, code: u16, reason: impl Into<String>) -> Result<(), SocketError> {
        let frame = Frame::Close {
            code,
            reason: reason.into(),
        };
        match self.outbox.try_send(frame) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let signal = self
                    .close_signal
                    .lock()
                    .ok()
                    .and_then(|mut signal| signal.take());
                match signal {
                    Some(signal) => signal
                        .send(frame)
                        .map_err(|_| SocketError::Closed(self.id.clone())),
                    // Already signalled.
                    None => Ok(()),
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SocketError::Closed(self.id.clone())),
        }
    }

    /// Serializable snapshot for cross-node replies.
    pub async fn info(&self) -> SocketInfo {
        SocketInfo {
            id: self.id.clone(),
            user_id: self.user.read().await.as_ref().map(|u| u.id.clone()),
            presence: self.presence.read().await.clone(),
        }
    }

    fn push(&self, frame: Frame) -> Result<(), SocketError> {
        self.outbox.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SocketError::Backpressure(self.id.clone()),
            mpsc::error::TrySendError::Closed(_) => SocketError::Closed(self.id.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn socket(capacity: usize) -> (Socket, Outbox) {
        Socket::with_outbox(SocketId::new("1.1"), AppId::from("app"), capacity)
    }

    #[tokio::test]
    async fn send_json_queues_text_frame() {
        let (socket, mut rx) = socket(4);
        socket.send_json(&json!({"event": "x"})).unwrap();
        assert_eq!(rx.recv().await, Some(Frame::Text("{\"event\":\"x\"}".into())));
    }

    #[tokio::test]
    async fn full_outbox_reports_backpressure() {
        let (socket, _rx) = socket(1);
        socket.send_text("a").unwrap();
        assert_eq!(
            socket.send_text("b"),
            Err(SocketError::Backpressure(SocketId::new("1.1")))
        );
    }

    #[tokio::test]
    async fn close_on_full_outbox_jumps_the_queue() {
        let (socket, mut rx) = socket(2);
        socket.send_text("a").unwrap();
        socket.send_text("b").unwrap();

        socket.close(4009, "bye").unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Frame::Close {
                code: 4009,
                reason: "bye".into()
            })
        );
    }

    #[tokio::test]
    async fn close_with_room_follows_queued_frames() {
        let (socket, mut rx) = socket(4);
        socket.send_text("a").unwrap();
        socket.close(4009, "bye").unwrap();

        assert_eq!(rx.recv().await, Some(Frame::Text("a".into())));
        assert!(matches!(rx.recv().await, Some(Frame::Close { code: 4009, .. })));
    }

    #[tokio::test]
    async fn outbox_drains_after_socket_is_dropped() {
        let (socket, mut rx) = socket(2);
        socket.send_text("a").unwrap();
        drop(socket);

        assert_eq!(rx.recv().await, Some(Frame::Text("a".into())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_writer_reports_closed() {
        let (socket, rx) = socket(1);
        drop(rx);
        assert!(matches!(socket.send_text("a"), Err(SocketError::Closed(_))));
    }

    #[tokio::test]
    async fn info_reflects_user_and_presence() {
        let (socket, _rx) = socket(1);
        socket.set_user(Some(UserData::new("u1"))).await;
        socket
            .set_presence("presence-a", PresenceMember::new("u1", json!({"name": "John"})))
            .await;

        let info = socket.info().await;
        assert_eq!(info.user_id.as_deref(), Some("u1"));
        assert_eq!(info.presence["presence-a"].user_info, json!({"name": "John"}));
    }

    #[tokio::test]
    async fn subscription_cache_tracks_marks() {
        let (socket, _rx) = socket(1);
        socket.mark_subscribed("a").await;
        socket.mark_subscribed("b").await;
        socket.mark_unsubscribed("a").await;
        assert_eq!(socket.subscribed_channels().await, vec!["b".to_string()]);
    }
}
