//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use bytes::Bytes;
use futures::stream::SplitStream;
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::app::AppState;
use crate::game::room::AttachError;
use crate::game::transport::{close_code, reject, Transport};
use crate::game::RoomHandle;
use crate::util::names::sanitize_name;
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::ws::transport::{run_writer, ChannelTransport};

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub room: Option<String>,
    pub name: Option<String>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let name = sanitize_name(query.name.as_deref().unwrap_or_default());
    let room_id = query.room.filter(|id| !id.trim().is_empty());
    ws.on_upgrade(move |socket| handle_socket(socket, room_id, name, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, room_id: Option<String>, name: String, state: AppState) {
    let (ws_sink, ws_stream) = socket.split();
    let (transport, outbound) = ChannelTransport::new(state.config.max_backpressure);
    let writer = tokio::spawn(run_writer(ws_sink, outbound));

    let Some(room_id) = room_id else {
        debug!("connection without room id");
        return refuse(&*transport, writer, "Room not specified", close_code::POLICY_VIOLATION).await;
    };
    let Some(room) = state.rooms.get_room(&room_id) else {
        debug!(room_id = %room_id, "connection to unknown room");
        return refuse(&*transport, writer, "Room not found", close_code::POLICY_VIOLATION).await;
    };
    if room.is_full() {
        return refuse(&*transport, writer, "Room is full", close_code::POLICY_VIOLATION).await;
    }

    let room_transport: Arc<dyn Transport> = transport.clone();
    let player_id = match room.attach(room_transport, name).await {
        Ok(id) => id,
        Err(AttachError::RoomFull) => {
            return refuse(&*transport, writer, "Room is full", close_code::POLICY_VIOLATION).await;
        }
        Err(e) => {
            warn!(room_id = %room_id, error = %e, "attach failed");
            return refuse(&*transport, writer, "Failed to join room", close_code::INTERNAL_ERROR)
                .await;
        }
    };

    info!(room_id = %room_id, player_id = %player_id, "websocket session started");
    run_session(&room, &player_id, ws_stream, &transport).await;

    room.detach(player_id.clone()).await;
    transport.close(close_code::NORMAL, "");
    let _ = writer.await;
    info!(room_id = %room_id, player_id = %player_id, "websocket session closed");
}

async fn refuse(
    transport: &ChannelTransport,
    writer: JoinHandle<()>,
    message: &str,
    code: u16,
) {
    reject(transport, message, code);
    let _ = writer.await;
}

/// Reader loop: socket -> room. Ends when the client leaves or the server
/// closes the transport.
async fn run_session(
    room: &RoomHandle,
    player_id: &str,
    mut ws_stream: SplitStream<WebSocket>,
    transport: &ChannelTransport,
) {
    let rate_limiter = ConnectionRateLimiter::new();
    let mut close_requests = transport.close_requests();

    loop {
        let message = tokio::select! {
            message = ws_stream.next() => message,
            _ = close_requests.wait_for(Option::is_some) => {
                debug!(player_id = %player_id, "transport closed by server");
                break;
            }
        };

        match message {
            Some(Ok(Message::Binary(data))) => {
                if !rate_limiter.check_command() {
                    warn!(player_id = %player_id, "rate limited command");
                    continue;
                }
                if !room.handle_message(player_id, Bytes::from(data)) {
                    debug!(player_id = %player_id, "room queue full, command dropped");
                }
            }
            Some(Ok(Message::Text(_))) => {
                trace!(player_id = %player_id, "ignoring text frame");
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(player_id = %player_id, "client closed connection");
                break;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(player_id = %player_id, error = %e, "websocket error");
                break;
            }
        }
    }
}
