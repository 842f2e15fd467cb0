//! Error types and WebSocket close codes.

use std::time::Duration;

/// WebSocket close codes sent when a room session ends.
pub mod close_code {
    pub const NORMAL: u16 = 1000;
    pub const GOING_AWAY: u16 = 1001;
    pub const INTERNAL_ERROR: u16 = 1011;
    pub const INVALID_ROOM_ID: u16 = 4000;
    pub const INVALID_TOKEN: u16 = 4001;
    pub const NOT_A_MEMBER: u16 = 4003;
    pub const ROOM_NOT_FOUND: u16 = 4004;
    pub const IDLE_TIMEOUT: u16 = 4008;
    pub const SUPERSEDED: u16 = 4009;
}

/// Token validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("invalid or expired token")]
    InvalidToken,

    #[error("token subject is missing")]
    MissingSubject,

    #[error("unknown user: {0}")]
    UnknownUser(String),

    #[error("user is disabled")]
    Inactive,

    #[error("identity lookup failed: {0}")]
    Lookup(String),
}

impl AuthError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::InvalidToken => "invalid_token",
            Self::MissingSubject => "missing_subject",
            Self::UnknownUser(_) => "unknown_user",
            Self::Inactive => "inactive",
            Self::Lookup(_) => "lookup_failed",
        }
    }
}

/// Reasons a room session ends. Every variant maps to a distinct close code so
/// clients can tell causes apart.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Invalid or expired token")]
    Unauthenticated(#[source] AuthError),

    #[error("Invalid room ID format")]
    InvalidRoomId(String),

    #[error("Room not found")]
    RoomNotFound,

    #[error("Not a member of this room")]
    NotAMember,

    #[error("Idle for more than {}s", .0.as_secs())]
    IdleTimeout(Duration),

    #[error("Connection superseded")]
    Superseded,

    #[error("Server shutting down")]
    ShuttingDown,

    #[error("Internal error")]
    Collaborator(#[source] anyhow::Error),
}

impl SessionError {
    pub fn close_code(&self) -> u16 {
        match self {
            Self::Unauthenticated(_) => close_code::INVALID_TOKEN,
            Self::InvalidRoomId(_) => close_code::INVALID_ROOM_ID,
            Self::RoomNotFound => close_code::ROOM_NOT_FOUND,
            Self::NotAMember => close_code::NOT_A_MEMBER,
            Self::IdleTimeout(_) => close_code::IDLE_TIMEOUT,
            Self::Superseded => close_code::SUPERSEDED,
            Self::ShuttingDown => close_code::GOING_AWAY,
            Self::Collaborator(_) => close_code::INTERNAL_ERROR,
        }
    }
}

/// Per-event problems. Reported to the sender as an `error` event; the session
/// keeps running.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InboundError {
    #[error("Invalid JSON")]
    Malformed,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid payload for {0}")]
    InvalidPayload(String),

    #[error("Message content cannot be empty")]
    EmptyContent,

    #[error("VIEWERs cannot send messages")]
    ReadOnly,

    #[error("Failed to store message")]
    StoreFailed,
}

/// How a session ended, ready to go out as a close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: String,
}

impl CloseReason {
    pub fn normal() -> Self {
        Self {
            code: close_code::NORMAL,
            reason: String::new(),
        }
    }
}

impl From<&SessionError> for CloseReason {
    fn from(err: &SessionError) -> Self {
        Self {
            code: err.close_code(),
            reason: err.to_string(),
        }
    }
}
