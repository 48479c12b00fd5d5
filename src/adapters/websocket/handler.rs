//! WebSocket upgrade handler for Pusher client connections.
//!
//! Handles the HTTP → WebSocket upgrade and manages the connection lifecycle:
//! 1. Register a socket with the adapter
//! 2. Send `pusher:connection_established`
//! 3. Pump outbox frames to the client and client frames to the adapter
//! 4. Remove the socket from every channel on disconnect

use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};

use crate::adapters::facade::Adapter;
use crate::domain::{AppId, Frame, Socket, SocketId, DEFAULT_OUTBOX_CAPACITY};
use crate::ports::ConnectionAdapter;

use super::messages::{self, ClientMessage};
use super::session;

/// Handle WebSocket upgrade requests.
///
/// Route: `GET /app/:app_key`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(app_key): Path<String>,
    State(adapter): State<Adapter>,
) -> Response {
    let app_id = AppId::new(app_key);
    ws.on_upgrade(move |socket| handle_socket(socket, app_id, adapter))
}

/// Handle an established WebSocket connection.
///
/// Runs for the lifetime of the connection. Exactly one of the two pump
/// tasks finishing ends the connection.
async fn handle_socket(ws: WebSocket, app_id: AppId, adapter: Adapter) {
    let (mut sender, mut receiver) = ws.split();

    let (socket, mut outbox) =
        Socket::with_outbox(SocketId::generate(), app_id.clone(), DEFAULT_OUTBOX_CAPACITY);
    let socket = Arc::new(socket);
    let socket_id = socket.id().clone();

    if let Err(e) = adapter.add_socket(&app_id, socket.clone()).await {
        tracing::warn!(app_id = %app_id, "Failed to register socket: {}", e);
        return;
    }

    if let Err(e) = socket.send_json(&messages::connection_established(&socket_id)) {
        tracing::debug!("Failed to queue connection_established: {}", e);
    }

    // Forward queued frames to the client
    let mut send_task = {
        let socket_id = socket_id.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbox.recv().await {
                let result = match frame {
                    Frame::Text(text) => sender.send(Message::Text(text)).await,
                    Frame::Close { code, reason } => {
                        let close = Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        }));
                        let _ = sender.send(close).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    tracing::debug!(socket_id = %socket_id, "Send error, closing connection: {}", e);
                    break;
                }
            }
        })
    };

    // Handle incoming messages from client
    let mut recv_task = {
        let adapter = adapter.clone();
        let socket = socket.clone();
        tokio::spawn(async move {
            while let Some(result) = receiver.next().await {
                match result {
                    Ok(Message::Text(text)) => {
                        dispatch(&adapter, &socket, &text).await;
                    }
                    Ok(Message::Close(_)) => {
                        tracing::debug!(socket_id = %socket.id(), "Client sent close frame");
                        break;
                    }
                    Ok(Message::Binary(_)) => {
                        tracing::debug!(socket_id = %socket.id(), "Ignoring binary frame");
                    }
                    // Protocol pings are answered by axum
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
                    Err(e) => {
                        tracing::debug!(socket_id = %socket.id(), "Receive error: {}", e);
                        break;
                    }
                }
            }
        })
    };

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    session::cleanup(&adapter, &socket).await;
    tracing::debug!(socket_id = %socket_id, "Connection closed");
}

async fn dispatch(adapter: &Adapter, socket: &Arc<Socket>, text: &str) {
    let Some(message) = ClientMessage::parse(text) else {
        tracing::debug!(socket_id = %socket.id(), "Ignoring unsupported frame");
        return;
    };
    if let Err(e) = session::handle_client_message(adapter, socket, message).await {
        tracing::warn!(socket_id = %socket.id(), "Client message failed: {}", e);
    }
}

/// Create axum router for the WebSocket endpoint.
pub fn websocket_router() -> axum::Router<Adapter> {
    use axum::routing::get;

    axum::Router::new().route("/app/:app_key", get(ws_handler))
}
