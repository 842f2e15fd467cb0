//! In-memory collaborators for unit tests.
//!
//! `MemoryBackend` implements every collaborator trait. Its tokens are plain
//! usernames: a token is valid when it names an active user.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::AppState;
use crate::config::ChatConfig;
use crate::db::Database;
use crate::error::AuthError;
use crate::ids::{MessageId, RoomId, UserId};
use crate::metrics::ServerMetrics;
use crate::models::{ChatMessage, MessagePage, NewMessage, Role, Room, UserIdentity, UserKind};
use crate::services::{ChatServices, IdentityLookup, MessageStore, RoomDirectory, TokenValidator};
use crate::ws::ChatHub;

#[derive(Default)]
pub struct MemoryBackend {
    users: Mutex<HashMap<UserId, UserIdentity>>,
    rooms: Mutex<HashMap<RoomId, Room>>,
    members: Mutex<HashMap<(RoomId, UserId), Role>>,
    messages: Mutex<Vec<ChatMessage>>,
    appends: AtomicUsize,
    fail_appends: AtomicBool,
    fail_history: AtomicBool,
    fail_identities: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bundle this backend as every collaborator.
    pub fn services(self: &Arc<Self>) -> ChatServices {
        ChatServices {
            tokens: self.clone(),
            rooms: self.clone(),
            messages: self.clone(),
            identities: self.clone(),
        }
    }

    pub fn add_user(&self, username: &str, kind: UserKind) -> UserId {
        self.insert_user(UserIdentity {
            id: UserId::new(),
            username: username.to_string(),
            kind,
            display_name: None,
            slug: None,
            is_active: true,
        })
    }

    pub fn add_bot(&self, username: &str, display_name: &str, slug: &str) -> UserId {
        self.insert_user(UserIdentity {
            id: UserId::new(),
            username: username.to_string(),
            kind: UserKind::Bot,
            display_name: Some(display_name.to_string()),
            slug: Some(slug.to_string()),
            is_active: true,
        })
    }

    fn insert_user(&self, user: UserIdentity) -> UserId {
        let id = user.id;
        self.users.lock().unwrap().insert(id, user);
        id
    }

    pub fn user(&self, id: UserId) -> UserIdentity {
        self.users.lock().unwrap()[&id].clone()
    }

    pub fn deactivate(&self, id: UserId) {
        if let Some(user) = self.users.lock().unwrap().get_mut(&id) {
            user.is_active = false;
        }
    }

    pub fn add_room(&self, name: &str) -> RoomId {
        let room = Room {
            id: RoomId::new(),
            name: name.to_string(),
        };
        let id = room.id;
        self.rooms.lock().unwrap().insert(id, room);
        id
    }

    pub fn add_member(&self, room_id: RoomId, user_id: UserId, role: Role) {
        self.members
            .lock()
            .unwrap()
            .insert((room_id, user_id), role);
    }

    /// Number of `append` calls that reached the store, failed or not.
    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn fail_identity_lookups(&self, fail: bool) {
        self.fail_identities.store(fail, Ordering::SeqCst);
    }
}

/// App state over a `MemoryBackend` and an empty in-memory database.
pub async fn test_app_state() -> (AppState, Arc<MemoryBackend>) {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool");
    crate::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let backend = Arc::new(MemoryBackend::new());
    let hub = ChatHub::new(
        backend.services(),
        ChatConfig::default(),
        Arc::new(ServerMetrics::new()),
    );
    let state = AppState {
        hub: Arc::new(hub),
        db: Arc::new(Database { pool }),
    };
    (state, backend)
}

#[async_trait]
impl TokenValidator for MemoryBackend {
    async fn validate(&self, token: &str) -> Result<UserIdentity, AuthError> {
        let users = self.users.lock().unwrap();
        let user = users
            .values()
            .find(|u| u.username == token)
            .ok_or(AuthError::InvalidToken)?;
        if !user.is_active {
            return Err(AuthError::Inactive);
        }
        Ok(user.clone())
    }
}

#[async_trait]
impl RoomDirectory for MemoryBackend {
    async fn room(&self, room_id: RoomId) -> Result<Option<Room>> {
        Ok(self.rooms.lock().unwrap().get(&room_id).cloned())
    }

    async fn role(&self, room_id: RoomId, user_id: UserId) -> Result<Option<Role>> {
        Ok(self
            .members
            .lock()
            .unwrap()
            .get(&(room_id, user_id))
            .copied())
    }
}

#[async_trait]
impl MessageStore for MemoryBackend {
    async fn append(&self, message: NewMessage) -> Result<ChatMessage> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        if self.fail_appends.load(Ordering::SeqCst) {
            bail!("store unavailable");
        }
        let sender = self.user(message.sender_id);
        let stored = ChatMessage {
            id: MessageId::new(),
            room_id: message.room_id,
            sender_id: message.sender_id,
            sender_type: message.sender_kind,
            sender_username: sender.username,
            sender_display_name: sender.display_name,
            content: message.content,
            created_at: Utc::now(),
            meta: message.meta,
            reply_to_id: message.reply_to_id,
        };
        self.messages.lock().unwrap().push(stored.clone());
        Ok(stored)
    }

    async fn recent(&self, room_id: RoomId, limit: u32) -> Result<MessagePage> {
        if self.fail_history.load(Ordering::SeqCst) {
            bail!("history unavailable");
        }
        let messages = self.messages.lock().unwrap();
        let in_room: Vec<&ChatMessage> = messages.iter().filter(|m| m.room_id == room_id).collect();
        let skip = in_room.len().saturating_sub(limit as usize);
        Ok(MessagePage {
            messages: in_room[skip..].iter().map(|m| (*m).clone()).collect(),
            total: in_room.len() as i64,
            has_more: skip > 0,
        })
    }
}

#[async_trait]
impl IdentityLookup for MemoryBackend {
    async fn identity(&self, user_id: UserId) -> Result<Option<UserIdentity>> {
        if self.fail_identities.load(Ordering::SeqCst) {
            bail!("identity lookup unavailable");
        }
        Ok(self.users.lock().unwrap().get(&user_id).cloned())
    }

    async fn identity_by_name(&self, name: &str) -> Result<Option<UserIdentity>> {
        if self.fail_identities.load(Ordering::SeqCst) {
            bail!("identity lookup unavailable");
        }
        let users = self.users.lock().unwrap();
        Ok(users
            .values()
            .find(|u| u.username == name)
            .or_else(|| users.values().find(|u| u.slug.as_deref() == Some(name)))
            .cloned())
    }
}
