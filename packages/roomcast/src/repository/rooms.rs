use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;

use crate::ids::{RoomId, UserId};
use crate::models::{Role, Room};
use crate::services::RoomDirectory;

use super::{ChatRepository, parse_column};

impl ChatRepository {
    pub async fn create_room(&self, name: &str) -> Result<Room> {
        let id = RoomId::new();
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query("INSERT INTO chat_rooms (id, name, created_at, updated_at) VALUES (?, ?, ?, ?)")
            .bind(id.to_string())
            .bind(name)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create room {}", name))?;

        Ok(Room {
            id,
            name: name.to_string(),
        })
    }

    pub async fn get_room(&self, room_id: RoomId) -> Result<Option<Room>> {
        let row = sqlx::query("SELECT id, name FROM chat_rooms WHERE id = ?")
            .bind(room_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| {
            let id: String = r.get("id");
            Ok(Room {
                id: parse_column(&id, "chat_rooms.id")?,
                name: r.get("name"),
            })
        })
        .transpose()
    }

    /// Add a member or change their role.
    pub async fn add_member(&self, room_id: RoomId, user_id: UserId, role: Role) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_room_members (room_id, user_id, role, joined_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(room_id, user_id) DO UPDATE SET role = excluded.role
            "#,
        )
        .bind(room_id.to_string())
        .bind(user_id.to_string())
        .bind(role.as_str())
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to add room member")?;
        Ok(())
    }

    pub async fn remove_member(&self, room_id: RoomId, user_id: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM chat_room_members WHERE room_id = ? AND user_id = ?")
            .bind(room_id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn member_role(&self, room_id: RoomId, user_id: UserId) -> Result<Option<Role>> {
        let role: Option<String> = sqlx::query_scalar(
            "SELECT role FROM chat_room_members WHERE room_id = ? AND user_id = ?",
        )
        .bind(room_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        role.map(|r| Role::parse(&r).with_context(|| format!("Unknown role: {:?}", r)))
            .transpose()
    }
}

#[async_trait]
impl RoomDirectory for ChatRepository {
    async fn room(&self, room_id: RoomId) -> Result<Option<Room>> {
        self.get_room(room_id).await
    }

    async fn role(&self, room_id: RoomId, user_id: UserId) -> Result<Option<Role>> {
        self.member_role(room_id, user_id).await
    }
}
