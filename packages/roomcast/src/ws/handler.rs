//! WebSocket Handler
//!
//! Bridges an upgraded axum socket to a [`RoomSession`]: a writer task drains the
//! connection's outbound queue into the socket, and inbound frames are fed to the
//! session as a stream.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{SplitSink, StreamExt};
use futures::{SinkExt, future};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::CloseReason;

use super::connection::ConnectionHandle;
use super::hub::ChatHub;
use super::protocol::ServerEvent;
use super::session::{InboundFrame, JoinRequest, RoomSession};

/// How long the writer may take to flush and send the close frame once the
/// session has ended.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle one per-room WebSocket connection until it closes.
pub async fn handle_room_ws(socket: WebSocket, hub: Arc<ChatHub>, request: JoinRequest) {
    hub.metrics.connection_opened();

    let (ws_sender, ws_receiver) = socket.split();
    let (connection, events) = ConnectionHandle::channel(hub.config.outbound_capacity);
    let conn_id = connection.id();
    info!(conn_id = %conn_id, room = %request.room, "New room WebSocket connection");

    let (close_tx, close_rx) = oneshot::channel();
    let mut writer = tokio::spawn(write_events(ws_sender, events, close_rx));

    let inbound = ws_receiver.filter_map(|msg| future::ready(inbound_frame(msg)));
    let outcome = RoomSession::new(hub.clone(), connection)
        .run(request, Box::pin(inbound))
        .await;

    let _ = close_tx.send(outcome.close.clone());
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(conn_id = %conn_id, "Writer task failed: {}", e),
        Err(_) => {
            warn!(conn_id = %conn_id, "Peer not reading, dropping socket");
            writer.abort();
        }
    }

    hub.metrics.connection_closed();
    info!(
        conn_id = %conn_id,
        code = outcome.close.code,
        "Room WebSocket connection closed"
    );
}

/// Map a transport message to a session frame. Ping/pong are answered by axum
/// and never reach the session.
fn inbound_frame(msg: Result<Message, axum::Error>) -> Option<InboundFrame> {
    match msg {
        Ok(Message::Text(text)) => Some(InboundFrame::Text(text.as_str().to_owned())),
        Ok(Message::Binary(bytes)) => Some(InboundFrame::Text(
            String::from_utf8_lossy(&bytes).into_owned(),
        )),
        Ok(Message::Close(_)) => Some(InboundFrame::Close),
        Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => None,
        Err(e) => Some(InboundFrame::Error(e.to_string())),
    }
}

/// Forward queued events to the socket. Once the session reports its close
/// reason, flush whatever is still queued and send the close frame.
async fn write_events(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: mpsc::Receiver<ServerEvent>,
    mut close: oneshot::Receiver<CloseReason>,
) {
    let reason = loop {
        tokio::select! {
            biased;
            Some(event) = events.recv() => {
                if send_event(&mut sink, &event).await.is_err() {
                    debug!("Socket closed while sending");
                    return;
                }
            }
            reason = &mut close => break reason.ok(),
        }
    };

    while let Ok(event) = events.try_recv() {
        if send_event(&mut sink, &event).await.is_err() {
            return;
        }
    }

    if let Some(reason) = reason {
        let frame = CloseFrame {
            code: reason.code,
            reason: reason.reason.into(),
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            debug!("Failed to send close frame: {}", e);
        }
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(j) => j,
        Err(e) => {
            error!("Failed to serialize {} event: {}", event.kind(), e);
            return Ok(());
        }
    };
    sink.send(Message::Text(json.into())).await
}
