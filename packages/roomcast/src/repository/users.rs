use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use crate::ids::UserId;
use crate::models::{UserIdentity, UserKind};
use crate::services::IdentityLookup;

use super::{ChatRepository, parse_column};

const USER_COLUMNS: &str = "id, username, user_type, bot_display_name, bot_slug, is_active";

fn user_from_row(row: &SqliteRow) -> Result<UserIdentity> {
    let id: String = row.get("id");
    let user_type: String = row.get("user_type");
    Ok(UserIdentity {
        id: parse_column(&id, "chat_users.id")?,
        username: row.get("username"),
        kind: UserKind::parse(&user_type)
            .with_context(|| format!("Unknown user_type: {:?}", user_type))?,
        display_name: row.get("bot_display_name"),
        slug: row.get("bot_slug"),
        is_active: row.get::<i64, _>("is_active") != 0,
    })
}

impl ChatRepository {
    /// Create an active user. Bots should be created with [`create_bot`](Self::create_bot).
    pub async fn create_user(&self, username: &str, kind: UserKind) -> Result<UserIdentity> {
        self.insert_user(username, kind, None, None).await
    }

    pub async fn create_bot(
        &self,
        username: &str,
        display_name: &str,
        slug: &str,
    ) -> Result<UserIdentity> {
        self.insert_user(username, UserKind::Bot, Some(display_name), Some(slug))
            .await
    }

    async fn insert_user(
        &self,
        username: &str,
        kind: UserKind,
        display_name: Option<&str>,
        slug: Option<&str>,
    ) -> Result<UserIdentity> {
        let id = UserId::new();
        sqlx::query(
            r#"
            INSERT INTO chat_users (id, username, user_type, bot_display_name, bot_slug, is_active, created_at)
            VALUES (?, ?, ?, ?, ?, 1, ?)
            "#,
        )
        .bind(id.to_string())
        .bind(username)
        .bind(kind.as_str())
        .bind(display_name)
        .bind(slug)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create user {}", username))?;

        Ok(UserIdentity {
            id,
            username: username.to_string(),
            kind,
            display_name: display_name.map(str::to_string),
            slug: slug.map(str::to_string),
            is_active: true,
        })
    }

    pub async fn set_user_active(&self, user_id: UserId, active: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE chat_users SET is_active = ? WHERE id = ?")
            .bind(active as i64)
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_user(&self, user_id: UserId) -> Result<Option<UserIdentity>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM chat_users WHERE id = ?",
            USER_COLUMNS
        ))
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    /// Find a user by username, falling back to bot slug.
    pub async fn find_user_by_name(&self, name: &str) -> Result<Option<UserIdentity>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {} FROM chat_users
            WHERE username = ? OR bot_slug = ?
            ORDER BY (username = ?) DESC
            LIMIT 1
            "#,
            USER_COLUMNS
        ))
        .bind(name)
        .bind(name)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }
}

#[async_trait]
impl IdentityLookup for ChatRepository {
    async fn identity(&self, user_id: UserId) -> Result<Option<UserIdentity>> {
        self.get_user(user_id).await
    }

    async fn identity_by_name(&self, name: &str) -> Result<Option<UserIdentity>> {
        self.find_user_by_name(name).await
    }
}

#[cfg(test)]
mod tests {
    use crate::models::UserKind;
    use crate::repository::test_helpers::test_repository;
    use crate::services::IdentityLookup;

    #[tokio::test]
    async fn test_create_and_get_user() {
        let repo = test_repository().await;
        let alice = repo.create_user("alice", UserKind::Human).await.unwrap();

        let found = repo.get_user(alice.id).await.unwrap().unwrap();
        assert_eq!(found, alice);
        assert!(found.is_active);
        assert!(found.display_name.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let repo = test_repository().await;
        repo.create_user("alice", UserKind::Human).await.unwrap();
        assert!(repo.create_user("alice", UserKind::Human).await.is_err());
    }

    #[tokio::test]
    async fn test_find_by_username_or_slug() {
        let repo = test_repository().await;
        let bot = repo
            .create_bot("sparkbot-user", "Sparkbot", "sparkbot")
            .await
            .unwrap();

        let by_name = repo.find_user_by_name("sparkbot-user").await.unwrap();
        assert_eq!(by_name.map(|u| u.id), Some(bot.id));

        let by_slug = repo.identity_by_name("sparkbot").await.unwrap().unwrap();
        assert_eq!(by_slug.id, bot.id);
        assert_eq!(by_slug.kind, UserKind::Bot);
        assert_eq!(by_slug.display_name.as_deref(), Some("Sparkbot"));

        assert!(repo.find_user_by_name("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_username_wins_over_slug() {
        let repo = test_repository().await;
        repo.create_bot("helper-bot", "Helper", "alice").await.unwrap();
        let alice = repo.create_user("alice", UserKind::Human).await.unwrap();

        let found = repo.find_user_by_name("alice").await.unwrap().unwrap();
        assert_eq!(found.id, alice.id);
    }

    #[tokio::test]
    async fn test_deactivate_user() {
        let repo = test_repository().await;
        let alice = repo.create_user("alice", UserKind::Human).await.unwrap();

        assert!(repo.set_user_active(alice.id, false).await.unwrap());
        let found = repo.identity(alice.id).await.unwrap().unwrap();
        assert!(!found.is_active);
    }
}
