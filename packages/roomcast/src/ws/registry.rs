//! Connection Registry
//!
//! Tracks which user is connected to which room. Three views are kept:
//!
//! - `connections`: room → user → live connection handle
//! - `room_users`: room → users with a connection there
//! - `user_rooms`: user → rooms they are connected to
//!
//! All three change together under one write lock, through [`RegistryState::insert`]
//! and [`RegistryState::remove`] only, so they always describe the same set of
//! `(room, user)` pairs. Empty inner maps and sets are pruned immediately.
//!
//! A user holds at most one connection per room. Registering again replaces the
//! old handle and returns it so the caller can close it.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

use crate::ids::{ConnectionId, RoomId, UserId};

use super::connection::ConnectionHandle;

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<RoomId, HashMap<UserId, ConnectionHandle>>,
    room_users: HashMap<RoomId, HashSet<UserId>>,
    user_rooms: HashMap<UserId, HashSet<RoomId>>,
}

impl RegistryState {
    fn insert(
        &mut self,
        room_id: RoomId,
        user_id: UserId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let previous = self
            .connections
            .entry(room_id)
            .or_default()
            .insert(user_id, handle);
        self.room_users.entry(room_id).or_default().insert(user_id);
        self.user_rooms.entry(user_id).or_default().insert(room_id);
        previous
    }

    fn remove(&mut self, room_id: RoomId, user_id: UserId) -> Option<ConnectionHandle> {
        let removed = match self.connections.get_mut(&room_id) {
            Some(users) => {
                let removed = users.remove(&user_id);
                if users.is_empty() {
                    self.connections.remove(&room_id);
                }
                removed
            }
            None => None,
        };

        if let Some(users) = self.room_users.get_mut(&room_id) {
            users.remove(&user_id);
            if users.is_empty() {
                self.room_users.remove(&room_id);
            }
        }
        if let Some(rooms) = self.user_rooms.get_mut(&user_id) {
            rooms.remove(&room_id);
            if rooms.is_empty() {
                self.user_rooms.remove(&user_id);
            }
        }
        removed
    }

    fn handle(&self, room_id: RoomId, user_id: UserId) -> Option<&ConnectionHandle> {
        self.connections.get(&room_id)?.get(&user_id)
    }

    fn check(&self) -> Result<(), String> {
        let mut pairs_by_conn = HashSet::new();
        for (room, users) in &self.connections {
            if users.is_empty() {
                return Err(format!("empty connection map left for room {}", room));
            }
            for user in users.keys() {
                pairs_by_conn.insert((*room, *user));
            }
        }

        let mut pairs_by_room = HashSet::new();
        for (room, users) in &self.room_users {
            if users.is_empty() {
                return Err(format!("empty user set left for room {}", room));
            }
            for user in users {
                pairs_by_room.insert((*room, *user));
            }
        }

        let mut pairs_by_user = HashSet::new();
        for (user, rooms) in &self.user_rooms {
            if rooms.is_empty() {
                return Err(format!("empty room set left for user {}", user));
            }
            for room in rooms {
                pairs_by_user.insert((*room, *user));
            }
        }

        if pairs_by_conn != pairs_by_room {
            return Err("connections and room_users disagree".to_string());
        }
        if pairs_by_room != pairs_by_user {
            return Err("room_users and user_rooms disagree".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    state: RwLock<RegistryState>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `handle` as the user's connection to the room. Returns the handle it
    /// replaced, if any.
    pub async fn register(
        &self,
        room_id: RoomId,
        user_id: UserId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut state = self.state.write().await;
        let previous = state.insert(room_id, user_id, handle);
        debug!(
            room_id = %room_id,
            user_id = %user_id,
            replaced = previous.is_some(),
            "Registered connection"
        );
        previous
    }

    /// Remove the user's connection to one room. No-op if absent.
    pub async fn unregister(&self, room_id: RoomId, user_id: UserId) -> Option<ConnectionHandle> {
        self.state.write().await.remove(room_id, user_id)
    }

    /// Remove the user from every room. Returns exactly the rooms they were
    /// registered in, sorted.
    pub async fn unregister_all(&self, user_id: UserId) -> Vec<RoomId> {
        let mut state = self.state.write().await;
        let mut rooms: Vec<RoomId> = state
            .user_rooms
            .get(&user_id)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default();
        rooms.sort();
        for room_id in &rooms {
            state.remove(*room_id, user_id);
        }
        rooms
    }

    /// Remove the user's entry in one room only if it is still `connection_id`.
    /// A newer connection that replaced it is left alone.
    pub async fn unregister_connection(
        &self,
        room_id: RoomId,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> bool {
        let mut state = self.state.write().await;
        let current = state
            .handle(room_id, user_id)
            .is_some_and(|h| h.id() == connection_id);
        if current {
            state.remove(room_id, user_id);
        }
        current
    }

    /// Remove every entry of the user that still points at `connection_id`.
    /// Returns the rooms released, sorted.
    pub async fn release_connection(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Vec<RoomId> {
        let mut state = self.state.write().await;
        let mut rooms: Vec<RoomId> = state
            .user_rooms
            .get(&user_id)
            .into_iter()
            .flatten()
            .copied()
            .filter(|room_id| {
                state
                    .handle(*room_id, user_id)
                    .is_some_and(|h| h.id() == connection_id)
            })
            .collect();
        rooms.sort();
        for room_id in &rooms {
            state.remove(*room_id, user_id);
        }
        rooms
    }

    pub async fn is_registered(&self, room_id: RoomId, user_id: UserId) -> bool {
        self.state.read().await.handle(room_id, user_id).is_some()
    }

    /// Snapshot of the room's connections, safe to use after the lock is gone.
    pub async fn connections_in_room(&self, room_id: RoomId) -> Vec<(UserId, ConnectionHandle)> {
        let state = self.state.read().await;
        state
            .connections
            .get(&room_id)
            .map(|users| {
                users
                    .iter()
                    .map(|(user_id, handle)| (*user_id, handle.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Users connected to the room, sorted.
    pub async fn users_online(&self, room_id: RoomId) -> Vec<UserId> {
        let state = self.state.read().await;
        let mut users: Vec<UserId> = state
            .room_users
            .get(&room_id)
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Rooms the user is connected to, sorted.
    pub async fn rooms_for_user(&self, user_id: UserId) -> Vec<RoomId> {
        let state = self.state.read().await;
        let mut rooms: Vec<RoomId> = state
            .user_rooms
            .get(&user_id)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default();
        rooms.sort();
        rooms
    }

    /// Rooms with at least one connection.
    pub async fn room_count(&self) -> usize {
        self.state.read().await.room_users.len()
    }

    /// Registered `(room, user)` pairs.
    pub async fn connection_count(&self) -> usize {
        self.state
            .read()
            .await
            .room_users
            .values()
            .map(HashSet::len)
            .sum()
    }

    /// Verify the three views agree and hold no empty collections.
    pub async fn check_consistency(&self) -> Result<(), String> {
        self.state.read().await.check()
    }
}
