use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::ids::{MessageId, RoomId};
use crate::models::{ChatMessage, MessagePage, NewMessage, UserKind};
use crate::services::MessageStore;

use super::{ChatRepository, millis_to_datetime, parse_column};

const MESSAGE_SELECT: &str = r#"
    SELECT m.id, m.room_id, m.sender_id, m.sender_type, m.content, m.meta_json,
           m.reply_to_id, m.created_at,
           u.username AS sender_username, u.bot_display_name AS sender_display_name
    FROM chat_messages m
    JOIN chat_users u ON u.id = m.sender_id
"#;

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage> {
    let id: String = row.get("id");
    let room_id: String = row.get("room_id");
    let sender_id: String = row.get("sender_id");
    let sender_type: String = row.get("sender_type");
    let reply_to_id: Option<String> = row.get("reply_to_id");
    let meta_json: Option<String> = row.get("meta_json");

    Ok(ChatMessage {
        id: parse_column(&id, "chat_messages.id")?,
        room_id: parse_column(&room_id, "chat_messages.room_id")?,
        sender_id: parse_column(&sender_id, "chat_messages.sender_id")?,
        sender_type: UserKind::parse(&sender_type)
            .with_context(|| format!("Unknown sender_type: {:?}", sender_type))?,
        sender_username: row.get("sender_username"),
        sender_display_name: row.get("sender_display_name"),
        content: row.get("content"),
        created_at: millis_to_datetime(row.get("created_at"))?,
        meta: meta_json
            .map(|m| serde_json::from_str(&m).context("Malformed chat_messages.meta_json"))
            .transpose()?,
        reply_to_id: reply_to_id
            .map(|r| parse_column(&r, "chat_messages.reply_to_id"))
            .transpose()?,
    })
}

impl ChatRepository {
    /// Store a message and bump the room's `updated_at`.
    pub async fn insert_message(&self, message: &NewMessage) -> Result<ChatMessage> {
        let id = MessageId::new();
        let now = chrono::Utc::now().timestamp_millis();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, room_id, sender_id, sender_type, content, meta_json, reply_to_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(message.room_id.to_string())
        .bind(message.sender_id.to_string())
        .bind(message.sender_kind.as_str())
        .bind(&message.content)
        .bind(message.meta.as_ref().map(|m| m.to_string()))
        .bind(message.reply_to_id.map(|r| r.to_string()))
        .bind(now)
        .execute(&mut *tx)
        .await
        .context("Failed to insert chat message")?;

        sqlx::query("UPDATE chat_rooms SET updated_at = ? WHERE id = ?")
            .bind(now)
            .bind(message.room_id.to_string())
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(&format!("{} WHERE m.id = ?", MESSAGE_SELECT))
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        message_from_row(&row)
    }

    /// The newest `limit` messages of a room, oldest first.
    pub async fn recent_messages(&self, room_id: RoomId, limit: u32) -> Result<MessagePage> {
        // Fetch limit+1 to detect whether there are more pages
        let fetch_limit = i64::from(limit) + 1;

        let rows = sqlx::query(&format!(
            "{} WHERE m.room_id = ? ORDER BY m.seq DESC LIMIT ?",
            MESSAGE_SELECT
        ))
        .bind(room_id.to_string())
        .bind(fetch_limit)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_messages WHERE room_id = ?")
            .bind(room_id.to_string())
            .fetch_one(&self.pool)
            .await?;

        let has_more = rows.len() as i64 > i64::from(limit);
        let mut messages = rows
            .iter()
            .take(limit as usize)
            .map(message_from_row)
            .collect::<Result<Vec<_>>>()?;

        // Reverse so oldest is first (natural reading order)
        messages.reverse();

        Ok(MessagePage {
            messages,
            total,
            has_more,
        })
    }
}

#[async_trait]
impl MessageStore for ChatRepository {
    async fn append(&self, message: NewMessage) -> Result<ChatMessage> {
        self.insert_message(&message).await
    }

    async fn recent(&self, room_id: RoomId, limit: u32) -> Result<MessagePage> {
        self.recent_messages(room_id, limit).await
    }
}
