// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use crate::models::message::{Message, MessageKey};
use crate::models::search::{HitDecodeError, MessageDocument};
use crate::services::engine::EngineError;
use crate::services::index_manager::IndexManager;
use crate::services::logging::{mask_handle, preview};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Indexed,
    /// Media-only message; nothing written
    Skipped,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("stored document is unreadable: {0}")]
    Decode(#[from] HitDecodeError),
}

/// Writes incoming messages into their group's index.
pub struct Ingestor {
    indexes: Arc<IndexManager>,
}

impl Ingestor {
    pub fn new(indexes: Arc<IndexManager>) -> Self {
        Self { indexes }
    }

    /// Upserts the message document keyed by `"{group_id}-{message_id}"`.
    ///
    /// Re-delivery and edits overwrite the existing document, so the index never holds
    /// two documents for one message.
    pub async fn ingest(&self, message: &Message) -> Result<IngestOutcome, IngestError> {
        if !message.has_text() {
            debug!(
                group_id = message.group_id,
                message_id = message.message_id,
                "Skipping message without text"
            );
            return Ok(IngestOutcome::Skipped);
        }

        let handle = self.indexes.index_for(message.group_id).await?;
        let document = MessageDocument::from(message);
        let engine = self.indexes.engine();
        let index_uid = handle.uid.as_str();
        let document = &document;

        self.indexes
            .retry()
            .execute("upsert_document", move || engine.upsert(index_uid, document))
            .await?;

        info!(
            group_id = message.group_id,
            message_id = message.message_id,
            author = %mask_handle(&message.author_handle),
            text = %preview(&message.text),
            "Indexed message"
        );
        Ok(IngestOutcome::Indexed)
    }

    /// Indexed message by identity key.
    pub async fn fetch(&self, key: MessageKey) -> Result<Option<Message>, IngestError> {
        let handle = self.indexes.handle(key.group_id);
        let document_uid = key.document_uid();
        let (index_uid, uid) = (handle.uid.as_str(), document_uid.as_str());
        let engine = self.indexes.engine();

        let raw = self
            .indexes
            .retry()
            .execute("fetch_document", move || async move {
                match engine.fetch(index_uid, uid).await {
                    Err(EngineError::IndexNotFound { .. }) => Ok(None),
                    other => other,
                }
            })
            .await?;

        match raw {
            Some(value) => Ok(Some(MessageDocument::decode(value)?.into_message()?)),
            None => Ok(None),
        }
    }

    /// Number of documents in a group's index; zero when the index does not exist yet.
    pub async fn document_count(&self, group_id: i64) -> Result<usize, IngestError> {
        let handle = self.indexes.handle(group_id);
        let index_uid = handle.uid.as_str();
        let engine = self.indexes.engine();

        let count = self
            .indexes
            .retry()
            .execute("document_count", move || async move {
                match engine.document_count(index_uid).await {
                    Err(EngineError::IndexNotFound { .. }) => Ok(0),
                    other => other,
                }
            })
            .await?;
        Ok(count)
    }

    pub fn indexes(&self) -> &Arc<IndexManager> {
        &self.indexes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::engine::MemoryEngine;
    use crate::services::retry::RetryPolicy;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn ingestor(engine: Arc<MemoryEngine>) -> Ingestor {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(1),
        };
        Ingestor::new(Arc::new(IndexManager::new(engine, policy, "messages")))
    }

    fn message(id: i64, text: &str) -> Message {
        Message {
            group_id: -77,
            message_id: id,
            author_id: 3,
            author_handle: "erin".to_string(),
            text: text.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_media_only_message_is_skipped() {
        let engine = Arc::new(MemoryEngine::new());
        let ingestor = ingestor(engine.clone());

        let outcome = ingestor.ingest(&message(1, "")).await.unwrap();
        assert_eq!(outcome, IngestOutcome::Skipped);
        assert!(!engine.has_index("messages_-77").await);
    }

    #[tokio::test]
    async fn test_reingest_overwrites() {
        let ingestor = ingestor(Arc::new(MemoryEngine::new()));

        ingestor.ingest(&message(1, "original")).await.unwrap();
        ingestor.ingest(&message(1, "edited")).await.unwrap();

        assert_eq!(ingestor.document_count(-77).await.unwrap(), 1);
        let stored = ingestor
            .fetch(MessageKey::new(-77, 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.text, "edited");
    }

    #[tokio::test]
    async fn test_fetch_unknown_group_is_none() {
        let ingestor = ingestor(Arc::new(MemoryEngine::new()));
        assert!(ingestor
            .fetch(MessageKey::new(-1, 1))
            .await
            .unwrap()
            .is_none());
        assert_eq!(ingestor.document_count(-1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_reported() {
        let engine = Arc::new(MemoryEngine::new());
        let ingestor = ingestor(engine.clone());
        ingestor.ingest(&message(1, "warm up")).await.unwrap();

        engine.fail_next(3);
        let err = ingestor.ingest(&message(2, "lost")).await.unwrap_err();
        assert!(matches!(err, IngestError::Engine(EngineError::Unavailable(_))));
    }
}
