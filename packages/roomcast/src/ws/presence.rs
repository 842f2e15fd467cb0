//! Online-user lists for rooms.

use futures::future::join_all;
use std::sync::Arc;

use crate::ids::RoomId;
use crate::services::IdentityLookup;

use super::protocol::PresenceUser;
use super::registry::ConnectionRegistry;

pub struct PresenceView {
    registry: Arc<ConnectionRegistry>,
    identities: Arc<dyn IdentityLookup>,
}

impl PresenceView {
    pub fn new(registry: Arc<ConnectionRegistry>, identities: Arc<dyn IdentityLookup>) -> Self {
        Self {
            registry,
            identities,
        }
    }

    /// Users currently connected to the room, sorted by username. Users the
    /// identity lookup no longer knows are left out.
    pub async fn online_users(&self, room_id: RoomId) -> anyhow::Result<Vec<PresenceUser>> {
        let user_ids = self.registry.users_online(room_id).await;
        let lookups = user_ids.iter().map(|id| self.identities.identity(*id));

        let mut users = Vec::with_capacity(user_ids.len());
        for identity in join_all(lookups).await {
            if let Some(user) = identity? {
                users.push(PresenceUser::from(&user));
            }
        }
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }
}
