//! Room Session
//!
//! Drives one client connection to one room through
//! `Connecting → Authenticated → Joined → Receiving ⇄ {Sending, Idle} → Closing → Closed`.
//!
//! Every exit path goes through the same teardown: the connection's registry
//! entries are released and the rooms it left are told who is still online. If the
//! session future is dropped mid-flight, the [`Registration`] guard spawns that
//! teardown instead.

use futures::{Stream, StreamExt};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::error::{CloseReason, InboundError, SessionError};
use crate::ids::{MessageId, RoomId};
use crate::models::{NewMessage, Room, UserIdentity};

use super::connection::{ConnectionHandle, SendFailure};
use super::hub::ChatHub;
use super::protocol::{ClientEvent, PresenceAction, PresenceUser, ServerEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Joined,
    Receiving,
    Sending,
    Idle,
    Closing,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Authenticated, Joined)
                | (Joined, Receiving)
                | (Receiving, Sending)
                | (Sending, Receiving)
                | (Receiving, Idle)
                | (Idle, Receiving)
                | (Closing, Closed)
        ) || (next == Closing && !matches!(self, Closing | Closed))
    }
}

/// One frame read from the client transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Text(String),
    Close,
    Error(String),
}

/// What the client asked for when it opened the connection.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    /// Raw room id from the URL path.
    pub room: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub close: CloseReason,
    /// Each state the session entered, in order of first entry.
    pub path: Vec<SessionState>,
}

/// Context of a joined room, fixed for the life of the session.
struct JoinedRoom {
    room: Room,
    user: UserIdentity,
    can_send: bool,
}

pub struct RoomSession {
    hub: Arc<ChatHub>,
    connection: ConnectionHandle,
    state: SessionState,
    path: Vec<SessionState>,
}

impl RoomSession {
    pub fn new(hub: Arc<ChatHub>, connection: ConnectionHandle) -> Self {
        Self {
            hub,
            connection,
            state: SessionState::Connecting,
            path: vec![SessionState::Connecting],
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(conn_id = %self.connection.id(), "Session {:?} -> {:?}", self.state, next);
        self.state = next;
        if !self.path.contains(&next) {
            self.path.push(next);
        }
    }

    /// Run the session to completion and report how it closed.
    pub async fn run<S>(mut self, request: JoinRequest, mut inbound: S) -> SessionOutcome
    where
        S: Stream<Item = InboundFrame> + Unpin,
    {
        let close = match self.start(&request).await {
            Err(e) => {
                self.hub.metrics.session_rejected();
                match &e {
                    SessionError::Collaborator(cause) => {
                        error!(room = %request.room, "Join failed: {:#}", cause);
                    }
                    SessionError::Unauthenticated(auth) => {
                        info!(
                            room = %request.room,
                            reason = auth.error_code(),
                            "Join rejected: {}",
                            e
                        );
                    }
                    _ => info!(room = %request.room, "Join rejected: {}", e),
                }
                self.transition(SessionState::Closing);
                CloseReason::from(&e)
            }
            Ok((joined, registration)) => {
                info!(
                    room = %joined.room.id,
                    user = %joined.user.id,
                    conn_id = %self.connection.id(),
                    "Joined room {}",
                    joined.room.name
                );
                let close = self.receive(&joined, &mut inbound).await;
                self.transition(SessionState::Closing);
                registration.release().await;
                info!(
                    room = %joined.room.id,
                    user = %joined.user.id,
                    conn_id = %self.connection.id(),
                    code = close.code,
                    "Left room"
                );
                close
            }
        };

        self.transition(SessionState::Closed);
        SessionOutcome {
            close,
            path: self.path,
        }
    }

    async fn start(
        &mut self,
        request: &JoinRequest,
    ) -> Result<(JoinedRoom, Registration), SessionError> {
        let user = self
            .hub
            .services
            .tokens
            .validate(&request.token)
            .await
            .map_err(SessionError::Unauthenticated)?;
        self.transition(SessionState::Authenticated);
        self.join(user, &request.room).await
    }

    async fn join(
        &mut self,
        user: UserIdentity,
        raw_room: &str,
    ) -> Result<(JoinedRoom, Registration), SessionError> {
        let services = &self.hub.services;

        let room_id: RoomId = raw_room
            .parse()
            .map_err(|_| SessionError::InvalidRoomId(raw_room.to_string()))?;
        let room = services
            .rooms
            .room(room_id)
            .await
            .map_err(SessionError::Collaborator)?
            .ok_or(SessionError::RoomNotFound)?;
        let role = services
            .rooms
            .role(room_id, user.id)
            .await
            .map_err(SessionError::Collaborator)?
            .ok_or(SessionError::NotAMember)?;
        let history = services
            .messages
            .recent(room_id, self.hub.config.history_limit)
            .await
            .map_err(SessionError::Collaborator)?;

        if let Some(previous) = self
            .hub
            .registry
            .register(room_id, user.id, self.connection.clone())
            .await
        {
            if previous.id() != self.connection.id() {
                debug!(room = %room_id, user = %user.id, "Closing superseded connection");
                previous.supersede();
            }
        }
        let registration = Registration::new(
            self.hub.clone(),
            user.clone(),
            self.connection.clone(),
            room_id,
        );

        let online_users = match self.hub.presence.online_users(room_id).await {
            Ok(users) => users,
            Err(e) => {
                registration.abandon().await;
                return Err(SessionError::Collaborator(e));
            }
        };

        let can_send = role.can_send();
        let connected = ServerEvent::Connected {
            room_id,
            room_name: room.name.clone(),
            messages: history.messages,
            total_messages: history.total,
            online_users: online_users.clone(),
            can_send,
            timestamp: chrono::Utc::now(),
        };
        if let Err(e) = self.deliver(connected).await {
            debug!(room = %room_id, user = %user.id, "Could not send connected: {}", e);
        }
        self.transition(SessionState::Joined);

        let joined = ServerEvent::presence(
            PresenceAction::Joined,
            room_id,
            PresenceUser::from(&user),
            online_users,
        );
        self.hub.broadcaster.broadcast(room_id, &joined, None).await;

        Ok((
            JoinedRoom {
                room,
                user,
                can_send,
            },
            registration,
        ))
    }

    async fn receive<S>(&mut self, joined: &JoinedRoom, inbound: &mut S) -> CloseReason
    where
        S: Stream<Item = InboundFrame> + Unpin,
    {
        self.transition(SessionState::Receiving);
        let idle_timeout = self.hub.config.idle_timeout;
        let connection = self.connection.clone();
        let hub = self.hub.clone();

        loop {
            let next = tokio::select! {
                biased;
                _ = connection.closed() => {
                    return CloseReason::from(&SessionError::Superseded);
                }
                _ = hub.shutting_down() => {
                    return CloseReason::from(&SessionError::ShuttingDown);
                }
                frame = next_frame(inbound, idle_timeout) => frame,
            };

            match next {
                Err(timeout) => {
                    self.transition(SessionState::Idle);
                    info!(
                        room = %joined.room.id,
                        user = %joined.user.id,
                        "Closing idle connection"
                    );
                    return CloseReason::from(&SessionError::IdleTimeout(timeout));
                }
                Ok(None) | Ok(Some(InboundFrame::Close)) => return CloseReason::normal(),
                Ok(Some(InboundFrame::Error(e))) => {
                    debug!(user = %joined.user.id, "Transport error: {}", e);
                    return CloseReason::normal();
                }
                Ok(Some(InboundFrame::Text(text))) => {
                    self.hub.metrics.message_received();
                    self.dispatch(joined, &text).await;
                }
            }
        }
    }

    async fn dispatch(&mut self, joined: &JoinedRoom, text: &str) {
        let event = match ClientEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                debug!(user = %joined.user.id, "Rejected inbound frame: {}", e);
                self.reply_error(joined, &e).await;
                return;
            }
        };

        match event {
            ClientEvent::Ping => self.reply(ServerEvent::pong()).await,
            ClientEvent::Typing { is_typing } => {
                if !joined.can_send {
                    self.reply_error(joined, &InboundError::ReadOnly).await;
                    return;
                }
                self.transition(SessionState::Sending);
                let event = ServerEvent::typing(joined.room.id, &joined.user, is_typing);
                self.hub
                    .broadcaster
                    .broadcast(joined.room.id, &event, Some(joined.user.id))
                    .await;
                self.transition(SessionState::Receiving);
            }
            ClientEvent::Message {
                content,
                client_msg_id,
                reply_to_id,
            } => {
                self.post_message(joined, content, client_msg_id, reply_to_id)
                    .await
            }
        }
    }

    async fn post_message(
        &mut self,
        joined: &JoinedRoom,
        content: String,
        client_msg_id: Option<String>,
        reply_to_id: Option<String>,
    ) {
        if !joined.can_send {
            self.reply_error(joined, &InboundError::ReadOnly).await;
            return;
        }
        let content = content.trim();
        if content.is_empty() {
            self.reply_error(joined, &InboundError::EmptyContent).await;
            return;
        }
        // Unparseable reply targets are dropped, not rejected.
        let reply_to_id = reply_to_id.and_then(|id| id.parse::<MessageId>().ok());

        self.transition(SessionState::Sending);
        let room_id = joined.room.id;
        let gate = self.hub.sequencer.enter(room_id).await;

        let stored = self
            .hub
            .services
            .messages
            .append(NewMessage {
                room_id,
                sender_id: joined.user.id,
                sender_kind: joined.user.kind,
                content: content.to_string(),
                reply_to_id,
                meta: None,
            })
            .await;

        match stored {
            Ok(message) => {
                self.hub.metrics.message_stored();
                if let Err(e) = self
                    .connection
                    .try_send(ServerEvent::ack(client_msg_id, message.id))
                {
                    warn!(room = %room_id, user = %joined.user.id, "Ack not queued: {}", e);
                }
                self.hub
                    .broadcaster
                    .broadcast(room_id, &ServerEvent::message(message), None)
                    .await;
                drop(gate);
            }
            Err(e) => {
                drop(gate);
                error!(room = %room_id, user = %joined.user.id, "Failed to store message: {:#}", e);
                self.reply_error(joined, &InboundError::StoreFailed).await;
            }
        }
        self.transition(SessionState::Receiving);
    }

    /// Queue an event for this session's own client. Returns early once the
    /// connection is closed or the hub is shutting down, so a client that stops
    /// reading cannot pin the session on a full queue.
    async fn deliver(&self, event: ServerEvent) -> Result<(), SendFailure> {
        tokio::select! {
            biased;
            _ = self.hub.shutting_down() => Err(SendFailure::Closed),
            sent = self.connection.send(event) => sent,
        }
    }

    async fn reply(&self, event: ServerEvent) {
        if let Err(e) = self.deliver(event).await {
            debug!(conn_id = %self.connection.id(), "Reply dropped: {}", e);
        }
    }

    async fn reply_error(&self, joined: &JoinedRoom, err: &InboundError) {
        self.reply(ServerEvent::error(Some(joined.room.id), err))
            .await;
    }
}

/// Next inbound frame, or `Err(timeout)` if none arrives in time.
async fn next_frame<S>(
    inbound: &mut S,
    idle_timeout: Option<Duration>,
) -> Result<Option<InboundFrame>, Duration>
where
    S: Stream<Item = InboundFrame> + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, inbound.next())
            .await
            .map_err(|_| limit),
        None => Ok(inbound.next().await),
    }
}

/// Registry membership held by a joined session.
///
/// `release` runs the teardown. If the guard is dropped without it (the session
/// future was cancelled), the same teardown is spawned onto the runtime.
struct Registration {
    hub: Arc<ChatHub>,
    user: UserIdentity,
    connection: ConnectionHandle,
    rooms: Vec<RoomId>,
    armed: bool,
}

impl Registration {
    fn new(
        hub: Arc<ChatHub>,
        user: UserIdentity,
        connection: ConnectionHandle,
        room_id: RoomId,
    ) -> Self {
        Self {
            hub,
            user,
            connection,
            rooms: vec![room_id],
            armed: true,
        }
    }

    async fn release(mut self) {
        self.armed = false;
        teardown(
            self.hub.clone(),
            self.user.clone(),
            self.connection.clone(),
            std::mem::take(&mut self.rooms),
        )
        .await;
    }

    /// Undo the registration without announcing anything.
    async fn abandon(mut self) {
        self.armed = false;
        self.hub
            .registry
            .release_connection(self.user.id, self.connection.id())
            .await;
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(user = %self.user.id, "No runtime for session teardown");
            return;
        };
        runtime.spawn(teardown(
            self.hub.clone(),
            self.user.clone(),
            self.connection.clone(),
            std::mem::take(&mut self.rooms),
        ));
    }
}

/// Release the connection and send `presence: left` to every room it was the
/// user's live connection in.
///
/// A superseded connection only announces rooms it still owned at release; its
/// successor announces its own departure. An evicted connection also announces
/// the rooms it joined, since the eviction already removed its entries. Rooms the
/// user is registered in again are skipped either way.
async fn teardown(
    hub: Arc<ChatHub>,
    user: UserIdentity,
    connection: ConnectionHandle,
    joined_rooms: Vec<RoomId>,
) {
    let released = hub
        .registry
        .release_connection(user.id, connection.id())
        .await;
    let rooms: BTreeSet<RoomId> = if connection.is_superseded() {
        released.into_iter().collect()
    } else {
        released.into_iter().chain(joined_rooms).collect()
    };

    for room_id in rooms {
        if hub.registry.is_registered(room_id, user.id).await {
            debug!(room = %room_id, user = %user.id, "Skipping left: user reconnected");
            continue;
        }
        let online_users = match hub.presence.online_users(room_id).await {
            Ok(users) => users,
            Err(e) => {
                error!(room = %room_id, "Presence lookup failed during teardown: {:#}", e);
                continue;
            }
        };
        let left = ServerEvent::presence(
            PresenceAction::Left,
            room_id,
            PresenceUser::from(&user),
            online_users,
        );
        hub.broadcaster.broadcast(room_id, &left, None).await;
    }
}
