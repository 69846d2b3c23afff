// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use crate::models::message::{sort_chronologically, Message, MessageKey};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Keyed persistence for raw chat messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Inserts or overwrites the message with the same identity key.
    async fn store(&self, message: &Message) -> Result<()>;

    /// Messages with `start <= created_at <= end`, oldest first.
    async fn messages_in_range(
        &self,
        group_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Message>>;

    /// The `limit` most recent messages of a group, oldest first.
    async fn recent_messages(&self, group_id: i64, limit: usize) -> Result<Vec<Message>>;
}

#[derive(Debug, FromRow)]
struct MessageRow {
    group_id: i64,
    message_id: i64,
    author_id: i64,
    author_handle: String,
    text: String,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Message {
            group_id: row.group_id,
            message_id: row.message_id,
            author_id: row.author_id,
            author_handle: row.author_handle,
            text: row.text,
            created_at: row.created_at,
        }
    }
}

/// Postgres message store
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    /// Connects and runs the embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn store(&self, message: &Message) -> Result<()> {
        sqlx::query(
            "\
INSERT INTO messages (group_id, message_id, author_id, author_handle, text, created_at)
VALUES ($1, $2, $3, $4, $5, $6)
ON CONFLICT (group_id, message_id) DO UPDATE SET
    author_id = EXCLUDED.author_id,
    author_handle = EXCLUDED.author_handle,
    text = EXCLUDED.text,
    created_at = EXCLUDED.created_at",
        )
        .bind(message.group_id)
        .bind(message.message_id)
        .bind(message.author_id)
        .bind(&message.author_handle)
        .bind(&message.text)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to store message {}", message.key()))?;

        Ok(())
    }

    async fn messages_in_range(
        &self,
        group_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            "\
SELECT * FROM messages
WHERE group_id = $1 AND created_at >= $2 AND created_at <= $3
ORDER BY created_at ASC, message_id ASC",
        )
        .bind(group_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load messages in range")?;

        Ok(rows.into_iter().map(Message::from).collect())
    }

    async fn recent_messages(&self, group_id: i64, limit: usize) -> Result<Vec<Message>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<MessageRow> = sqlx::query_as(
            "\
SELECT * FROM (
    SELECT * FROM messages WHERE group_id = $1
    ORDER BY created_at DESC, message_id DESC
    LIMIT $2
) recent
ORDER BY created_at ASC, message_id ASC",
        )
        .bind(group_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load recent messages")?;

        Ok(rows.into_iter().map(Message::from).collect())
    }
}

/// In-process store used when no database is configured, and in tests.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<BTreeMap<MessageKey, Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }

    async fn group(&self, group_id: i64) -> Vec<Message> {
        let messages = self.messages.read().await;
        let mut group: Vec<Message> = messages
            .range(MessageKey::new(group_id, i64::MIN)..=MessageKey::new(group_id, i64::MAX))
            .map(|(_, m)| m.clone())
            .collect();
        sort_chronologically(&mut group);
        group
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn store(&self, message: &Message) -> Result<()> {
        self.messages
            .write()
            .await
            .insert(message.key(), message.clone());
        Ok(())
    }

    async fn messages_in_range(
        &self,
        group_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        Ok(self
            .group(group_id)
            .await
            .into_iter()
            .filter(|m| m.created_at >= start && m.created_at <= end)
            .collect())
    }

    async fn recent_messages(&self, group_id: i64, limit: usize) -> Result<Vec<Message>> {
        let group = self.group(group_id).await;
        let skip = group.len().saturating_sub(limit);
        Ok(group.into_iter().skip(skip).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn message(group_id: i64, id: i64, text: &str, at: i64) -> Message {
        Message {
            group_id,
            message_id: id,
            author_id: 7,
            author_handle: "ann".to_string(),
            text: text.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + at, 0).unwrap(),
        }
    }

    fn at(offset: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + offset, 0).unwrap()
    }

    #[tokio::test]
    async fn test_store_overwrites_by_key() {
        let store = MemoryMessageStore::new();
        store.store(&message(-1, 1, "first", 0)).await.unwrap();
        store.store(&message(-1, 1, "edited", 0)).await.unwrap();

        assert_eq!(store.len().await, 1);
        let stored = store.recent_messages(-1, 10).await.unwrap();
        assert_eq!(stored[0].text, "edited");
    }

    #[tokio::test]
    async fn test_range_is_inclusive_and_scoped_to_group() {
        let store = MemoryMessageStore::new();
        for (id, offset) in [(1, 0), (2, 60), (3, 120), (4, 180)] {
            store.store(&message(-1, id, "x", offset)).await.unwrap();
        }
        store.store(&message(-2, 9, "other", 60)).await.unwrap();

        let ids: Vec<i64> = store
            .messages_in_range(-1, at(60), at(120))
            .await
            .unwrap()
            .iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_recent_messages_are_the_newest_oldest_first() {
        let store = MemoryMessageStore::new();
        for (id, offset) in [(3, 30), (1, 10), (4, 40), (2, 20)] {
            store.store(&message(-1, id, "x", offset)).await.unwrap();
        }

        let ids: Vec<i64> = store
            .recent_messages(-1, 2)
            .await
            .unwrap()
            .iter()
            .map(|m| m.message_id)
            .collect();
        assert_eq!(ids, vec![3, 4]);
        assert_eq!(store.recent_messages(-1, 100).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_unknown_group_is_empty() {
        let store = MemoryMessageStore::new();
        store.store(&message(-1, 1, "x", 0)).await.unwrap();
        assert!(store.recent_messages(-2, 10).await.unwrap().is_empty());
        assert!(!store.is_empty().await);
    }

    // Requires a running Postgres at DATABASE_URL
    #[tokio::test]
    #[ignore]
    async fn test_pg_store_round_trip() {
        let url = std::env::var("DATABASE_URL").unwrap();
        let store = PgMessageStore::connect(&url).await.unwrap();
        let group_id = -(chrono::Utc::now().timestamp_micros());

        store.store(&message(group_id, 1, "hello", 0)).await.unwrap();
        store.store(&message(group_id, 1, "hello again", 0)).await.unwrap();
        store.store(&message(group_id, 2, "later", 90)).await.unwrap();

        let stored = store.recent_messages(group_id, 10).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].text, "hello again");
        assert_eq!(store.recent_messages(group_id, 1).await.unwrap()[0].message_id, 2);
        assert_eq!(
            store
                .messages_in_range(group_id, at(0), at(60))
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
