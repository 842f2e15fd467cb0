//! WebSocket Protocol Types
//!
//! JSON events exchanged over a room connection. Every frame is an object with a
//! `type` tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InboundError;
use crate::ids::{MessageId, RoomId, UserId};
use crate::models::{ChatMessage, UserIdentity, UserKind};

/// Default number of history messages sent on join.
pub const DEFAULT_HISTORY_LIMIT: u32 = 50;

/// One online user, as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUser {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub kind: UserKind,
}

impl From<&UserIdentity> for PresenceUser {
    fn from(user: &UserIdentity) -> Self {
        Self {
            user_id: user.id,
            username: user.username.clone(),
            display_name: user.shown_name().to_string(),
            kind: user.kind,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceAction {
    Joined,
    Left,
}

/// Messages sent FROM the client TO the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Post a chat message to the room
    Message {
        #[serde(default)]
        content: String,
        /// Client correlation id, echoed back in the ack
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_msg_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to_id: Option<String>,
    },
    /// Typing indicator on/off
    Typing {
        #[serde(default = "default_true")]
        is_typing: bool,
    },
    /// Client heartbeat
    Ping,
}

fn default_true() -> bool {
    true
}

const CLIENT_EVENT_TYPES: &[&str] = &["message", "typing", "ping"];

impl ClientEvent {
    /// Parse one inbound text frame.
    ///
    /// Distinguishes unparseable JSON, unknown `type` values, and known types with
    /// a bad payload, so each gets its own error reply.
    pub fn parse(text: &str) -> Result<Self, InboundError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|_| InboundError::Malformed)?;
        let Some(object) = value.as_object() else {
            return Err(InboundError::Malformed);
        };

        let kind = object
            .get("type")
            .and_then(|t| t.as_str())
            .unwrap_or_default()
            .to_string();
        if !CLIENT_EVENT_TYPES.contains(&kind.as_str()) {
            return Err(InboundError::UnknownType(kind));
        }

        serde_json::from_value(value).map_err(|_| InboundError::InvalidPayload(kind))
    }
}

/// Messages sent FROM the server TO the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Initial snapshot after a successful join
    Connected {
        room_id: RoomId,
        room_name: String,
        /// Recent history, oldest first
        messages: Vec<ChatMessage>,
        total_messages: i64,
        online_users: Vec<PresenceUser>,
        can_send: bool,
        timestamp: DateTime<Utc>,
    },
    /// A stored chat message
    Message {
        message: ChatMessage,
        timestamp: DateTime<Utc>,
    },
    /// Sent only to the author once the message is stored
    Ack {
        client_msg_id: Option<String>,
        message_id: MessageId,
        timestamp: DateTime<Utc>,
    },
    /// Someone joined or left the room
    Presence {
        action: PresenceAction,
        room_id: RoomId,
        user: PresenceUser,
        online_users: Vec<PresenceUser>,
        timestamp: DateTime<Utc>,
    },
    Typing {
        room_id: RoomId,
        user_id: UserId,
        username: String,
        is_typing: bool,
        timestamp: DateTime<Utc>,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ServerEvent {
    pub fn message(message: ChatMessage) -> Self {
        Self::Message {
            message,
            timestamp: Utc::now(),
        }
    }

    pub fn ack(client_msg_id: Option<String>, message_id: MessageId) -> Self {
        Self::Ack {
            client_msg_id,
            message_id,
            timestamp: Utc::now(),
        }
    }

    pub fn presence(
        action: PresenceAction,
        room_id: RoomId,
        user: PresenceUser,
        online_users: Vec<PresenceUser>,
    ) -> Self {
        Self::Presence {
            action,
            room_id,
            user,
            online_users,
            timestamp: Utc::now(),
        }
    }

    pub fn typing(room_id: RoomId, user: &UserIdentity, is_typing: bool) -> Self {
        Self::Typing {
            room_id,
            user_id: user.id,
            username: user.shown_name().to_string(),
            is_typing,
            timestamp: Utc::now(),
        }
    }

    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Utc::now(),
        }
    }

    pub fn error(room_id: Option<RoomId>, err: &InboundError) -> Self {
        Self::Error {
            room_id,
            message: err.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// The `type` tag this event serializes with.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Message { .. } => "message",
            Self::Ack { .. } => "ack",
            Self::Presence { .. } => "presence",
            Self::Typing { .. } => "typing",
            Self::Pong { .. } => "pong",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_full() {
        let json = r#"{"type":"message","content":"hi","client_msg_id":"c1","reply_to_id":"abc"}"#;
        match ClientEvent::parse(json).unwrap() {
            ClientEvent::Message {
                content,
                client_msg_id,
                reply_to_id,
            } => {
                assert_eq!(content, "hi");
                assert_eq!(client_msg_id.as_deref(), Some("c1"));
                assert_eq!(reply_to_id.as_deref(), Some("abc"));
            }
            other => panic!("Expected Message, got {:?}", other),
        }
    }

    #[test]
    fn test_client_message_missing_content_defaults_empty() {
        let msg = ClientEvent::parse(r#"{"type":"message"}"#).unwrap();
        assert_eq!(
            msg,
            ClientEvent::Message {
                content: String::new(),
                client_msg_id: None,
                reply_to_id: None,
            }
        );
    }

    #[test]
    fn test_client_message_null_correlation_id() {
        let msg =
            ClientEvent::parse(r#"{"type":"message","content":"x","client_msg_id":null}"#).unwrap();
        match msg {
            ClientEvent::Message { client_msg_id, .. } => assert!(client_msg_id.is_none()),
            _ => panic!("Expected Message"),
        }
    }

    #[test]
    fn test_client_ping() {
        assert_eq!(
            ClientEvent::parse(r#"{"type":"ping"}"#).unwrap(),
            ClientEvent::Ping
        );
    }

    #[test]
    fn test_client_typing_defaults_true() {
        assert_eq!(
            ClientEvent::parse(r#"{"type":"typing"}"#).unwrap(),
            ClientEvent::Typing { is_typing: true }
        );
        assert_eq!(
            ClientEvent::parse(r#"{"type":"typing","is_typing":false}"#).unwrap(),
            ClientEvent::Typing { is_typing: false }
        );
    }

    #[test]
    fn test_invalid_json() {
        assert_eq!(
            ClientEvent::parse("{not json"),
            Err(InboundError::Malformed)
        );
        assert_eq!(ClientEvent::parse("[1,2]"), Err(InboundError::Malformed));
        assert_eq!(ClientEvent::parse("\"ping\""), Err(InboundError::Malformed));
    }

    #[test]
    fn test_unknown_type() {
        assert_eq!(
            ClientEvent::parse(r#"{"type":"join_room","payload":{}}"#),
            Err(InboundError::UnknownType("join_room".into()))
        );
        assert_eq!(
            ClientEvent::parse(r#"{"content":"no type"}"#),
            Err(InboundError::UnknownType(String::new()))
        );
    }

    #[test]
    fn test_known_type_bad_payload() {
        assert_eq!(
            ClientEvent::parse(r#"{"type":"message","content":42}"#),
            Err(InboundError::InvalidPayload("message".into()))
        );
    }

    #[test]
    fn test_server_pong_serialization() {
        let json = serde_json::to_value(ServerEvent::pong()).unwrap();
        assert_eq!(json["type"], "pong");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_server_ack_keeps_null_correlation_id() {
        let id = MessageId::new();
        let json = serde_json::to_value(ServerEvent::ack(None, id)).unwrap();
        assert_eq!(json["type"], "ack");
        assert!(json["client_msg_id"].is_null());
        assert_eq!(json["message_id"], id.to_string());
    }

    #[test]
    fn test_server_presence_serialization() {
        let user = PresenceUser {
            user_id: UserId::new(),
            username: "alice".into(),
            display_name: "alice".into(),
            kind: UserKind::Human,
        };
        let event = ServerEvent::presence(
            PresenceAction::Left,
            RoomId::new(),
            user.clone(),
            vec![],
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "presence");
        assert_eq!(json["action"], "left");
        assert_eq!(json["user"]["type"], "HUMAN");
        assert_eq!(json["user"]["username"], "alice");
        assert_eq!(json["online_users"], serde_json::json!([]));
        assert_eq!(event.kind(), "presence");
    }

    #[test]
    fn test_server_error_omits_missing_room() {
        let json =
            serde_json::to_value(ServerEvent::error(None, &InboundError::EmptyContent)).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "Message content cannot be empty");
        assert!(json.get("room_id").is_none());
    }

    #[test]
    fn test_server_event_roundtrip_typing() {
        let user = UserIdentity {
            id: UserId::new(),
            username: "bob".into(),
            kind: UserKind::Human,
            display_name: None,
            slug: None,
            is_active: true,
        };
        let original = ServerEvent::typing(RoomId::new(), &user, true);
        let json = serde_json::to_string(&original).unwrap();
        let decoded: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
    }
}
