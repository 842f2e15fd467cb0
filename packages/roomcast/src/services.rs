//! Collaborators the chat core depends on but does not own.
//!
//! Token validation, room/membership lookup, message persistence and identity
//! lookup are all resolved outside the core. Sessions receive them bundled in
//! [`ChatServices`]; the SQLite [`ChatRepository`](crate::repository::ChatRepository)
//! implements the storage-backed ones.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::error::AuthError;
use crate::ids::{RoomId, UserId};
use crate::models::{ChatMessage, MessagePage, NewMessage, Role, Room, UserIdentity};

/// Resolves a bearer token to a user.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<UserIdentity, AuthError>;
}

/// Room existence and per-room roles.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn room(&self, room_id: RoomId) -> Result<Option<Room>>;

    /// `None` means the user is not a member.
    async fn role(&self, room_id: RoomId, user_id: UserId) -> Result<Option<Role>>;
}

/// Durable, ordered message storage.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and timestamp.
    async fn append(&self, message: NewMessage) -> Result<ChatMessage>;

    /// The newest `limit` messages of a room, returned oldest first.
    async fn recent(&self, room_id: RoomId, limit: u32) -> Result<MessagePage>;
}

/// User id → display information.
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    async fn identity(&self, user_id: UserId) -> Result<Option<UserIdentity>>;

    /// Look up by username or bot slug.
    async fn identity_by_name(&self, name: &str) -> Result<Option<UserIdentity>>;
}

/// Everything a room session needs from the outside world.
#[derive(Clone)]
pub struct ChatServices {
    pub tokens: Arc<dyn TokenValidator>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub messages: Arc<dyn MessageStore>,
    pub identities: Arc<dyn IdentityLookup>,
}
