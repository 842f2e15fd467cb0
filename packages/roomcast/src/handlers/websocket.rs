use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    response::Response,
};
use serde::Deserialize;

use crate::AppState;
use crate::ws::{self, JoinRequest};

#[derive(Debug, Deserialize)]
pub struct RoomWsQuery {
    #[serde(default)]
    token: String,
}

/// Room WebSocket endpoint. The room id and token are checked after the
/// upgrade so rejections reach the client as close codes.
pub async fn room_websocket_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Query(query): Query<RoomWsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let hub = state.hub.clone();
    let request = JoinRequest {
        room: room_id,
        token: query.token,
    };

    ws.on_upgrade(move |socket| ws::handle_room_ws(socket, hub, request))
}
