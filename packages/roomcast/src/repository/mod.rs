// Repository layer: each domain lives in its own file with `impl ChatRepository`.
//
// The collaborator traits the chat core depends on (`RoomDirectory`,
// `MessageStore`, `IdentityLookup`) are implemented next to the queries they use.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use std::fmt::Display;
use std::str::FromStr;

mod messages;
mod rooms;
mod users;

#[cfg(test)]
pub(crate) mod test_helpers;

#[derive(Clone)]
pub struct ChatRepository {
    pub(crate) pool: SqlitePool,
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Parse a TEXT id column.
fn parse_column<T>(value: &str, column: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .parse()
        .map_err(|e| anyhow::anyhow!("{}", e))
        .with_context(|| format!("Corrupt {} value: {:?}", column, value))
}

/// Timestamps are stored as Unix milliseconds.
fn millis_to_datetime(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("Timestamp out of range: {}", ms))
}
