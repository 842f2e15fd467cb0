use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, RoomId, UserId};

// === User models ===

/// Whether a user is a person or an automated participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UserKind {
    Human,
    Bot,
}

impl UserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserKind::Human => "HUMAN",
            UserKind::Bot => "BOT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HUMAN" => Some(UserKind::Human),
            "BOT" => Some(UserKind::Bot),
            _ => None,
        }
    }
}

/// Resolved user identity as seen by the chat core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: UserId,
    pub username: String,
    pub kind: UserKind,
    /// Bot display name (e.g. "Sparkbot"); humans usually have none.
    pub display_name: Option<String>,
    /// Bot mention slug, also accepted as a token subject.
    pub slug: Option<String>,
    pub is_active: bool,
}

impl UserIdentity {
    /// Name to show in user lists: the display name when set, else the username.
    pub fn shown_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

// === Room models ===

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
}

/// A user's role within one room. Decided outside the core; the core only asks
/// whether the role may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "OWNER")]
    Owner,
    #[serde(rename = "MOD")]
    Moderator,
    #[serde(rename = "MEMBER")]
    Member,
    /// Read-only: may join and watch but not send.
    #[serde(rename = "VIEWER")]
    Viewer,
    #[serde(rename = "BOT")]
    Bot,
}

impl Role {
    pub fn can_send(&self) -> bool {
        !matches!(self, Role::Viewer)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Owner => "OWNER",
            Role::Moderator => "MOD",
            Role::Member => "MEMBER",
            Role::Viewer => "VIEWER",
            Role::Bot => "BOT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OWNER" => Some(Role::Owner),
            "MOD" => Some(Role::Moderator),
            "MEMBER" => Some(Role::Member),
            "VIEWER" => Some(Role::Viewer),
            "BOT" => Some(Role::Bot),
            _ => None,
        }
    }
}

// === Message models ===

/// A message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_kind: UserKind,
    pub content: String,
    pub reply_to_id: Option<MessageId>,
    /// Opaque client-defined attachment data, stored and echoed verbatim.
    pub meta: Option<serde_json::Value>,
}

/// A durable message as returned by the store and sent to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub sender_type: UserKind,
    pub sender_username: String,
    pub sender_display_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub meta: Option<serde_json::Value>,
    pub reply_to_id: Option<MessageId>,
}

/// A bounded window of recent messages, oldest first.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    pub messages: Vec<ChatMessage>,
    /// Total messages in the room, not just this page.
    pub total: i64,
    pub has_more: bool,
}
