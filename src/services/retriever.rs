// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Executes a search strategy against a group's index and expands every hit with the
//! messages posted around it.
//!
//! A strategy is run as one engine query per alternative, and the hits of all of them
//! are merged, which gives the terms OR semantics while each query matches all its words.
//!
//! Supergroups also have their pre-migration index probed, and results from both are
//! merged by identity key. Hits that do not decode as message documents are dropped
//! and logged.

use crate::models::chat::legacy_group_id;
use crate::models::message::{sort_chronologically, Message, MessageKey};
use crate::models::search::MessageDocument;
use crate::models::strategy::SearchStrategy;
use crate::services::engine::{DocumentFilter, EngineError, EngineQuery, SortOrder};
use crate::services::index_manager::IndexManager;
use crate::services::retry::parse_env;
use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct RetrieverConfig {
    /// Maximum hits taken from the primary search
    pub hit_limit: usize,
    /// Half-width of the context window around each hit
    pub context_window: Duration,
    /// Maximum messages fetched per context window
    pub context_limit: usize,
    /// Context sub-searches in flight at once
    pub concurrency: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            hit_limit: 50,
            context_window: Duration::from_secs(120),
            context_limit: 10,
            concurrency: 4,
        }
    }
}

impl RetrieverConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            hit_limit: parse_env("HIT_LIMIT")?.unwrap_or(defaults.hit_limit),
            context_window: parse_env("CONTEXT_WINDOW_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.context_window),
            context_limit: parse_env("CONTEXT_LIMIT")?.unwrap_or(defaults.context_limit),
            concurrency: parse_env("CONTEXT_CONCURRENCY")?.unwrap_or(defaults.concurrency),
        })
    }
}

/// Engine queries for a strategy, one per alternative, oldest first.
pub fn strategy_queries(strategy: &SearchStrategy, limit: usize) -> Vec<EngineQuery> {
    strategy
        .alternatives()
        .into_iter()
        .map(|text| EngineQuery::text(text, limit).with_sort(SortOrder::CreatedAsc))
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("retrieval cancelled")]
    Cancelled,
}

pub struct Retriever {
    indexes: Arc<IndexManager>,
    config: RetrieverConfig,
}

impl Retriever {
    pub fn new(indexes: Arc<IndexManager>, config: RetrieverConfig) -> Self {
        Self { indexes, config }
    }

    /// Strategy hits plus their surrounding context, deduplicated and ordered as asked.
    pub async fn retrieve(
        &self,
        group_id: i64,
        strategy: &SearchStrategy,
        order: SortOrder,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, RetrieveError> {
        let queries = strategy_queries(strategy, self.config.hit_limit);
        let hits = self.hits(group_id, &queries, cancel).await?;
        if hits.is_empty() {
            info!(group_id, alternatives = queries.len(), "No hits");
            return Ok(hits);
        }

        let mut messages = self.fetch_context(&hits, cancel).await?;
        if order == SortOrder::CreatedDesc {
            messages.reverse();
        }

        info!(
            group_id,
            hits = hits.len(),
            expanded = messages.len(),
            "Retrieved messages"
        );
        Ok(messages)
    }

    /// Plain keyword search without context expansion.
    pub async fn keyword_search(
        &self,
        group_id: i64,
        text: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, RetrieveError> {
        let query = EngineQuery::text(text, limit).with_sort(SortOrder::CreatedDesc);
        let mut messages = self
            .hits(group_id, std::slice::from_ref(&query), cancel)
            .await?;
        messages.reverse();
        messages.truncate(limit);
        Ok(messages)
    }

    /// Hits of every query in the group's index and the pre-migration index, merged by
    /// identity key, oldest first.
    async fn hits(
        &self,
        group_id: i64,
        queries: &[EngineQuery],
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, RetrieveError> {
        if cancel.is_cancelled() {
            return Err(RetrieveError::Cancelled);
        }

        let handle = self.indexes.index_for(group_id).await?;
        let mut targets = vec![(group_id, handle.uid)];
        if let Some(legacy) = legacy_group_id(group_id) {
            targets.push((legacy, self.indexes.handle(legacy).uid));
        }

        let mut merged: HashMap<MessageKey, Message> = HashMap::new();
        for (target_group, index_uid) in &targets {
            for query in queries {
                if cancel.is_cancelled() {
                    return Err(RetrieveError::Cancelled);
                }
                let query = query.clone().with_filter(DocumentFilter::group(*target_group));
                let found = self.search_index(index_uid, &query).await?;
                debug!(
                    group_id,
                    index_uid = %index_uid,
                    query = %query.text,
                    hits = found.len(),
                    "Searched index"
                );
                for message in found {
                    merged.entry(message.key()).or_insert(message);
                }
            }
        }

        let mut messages: Vec<Message> = merged.into_values().collect();
        sort_chronologically(&mut messages);
        Ok(messages)
    }

    /// Context windows around every hit, merged with the hits, oldest first.
    ///
    /// Sub-searches run concurrently; only the merge is sequential. Cancelling stops
    /// further sub-searches from being issued.
    pub async fn fetch_context(
        &self,
        hits: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Vec<Message>, RetrieveError> {
        let mut merged: HashMap<MessageKey, Message> =
            hits.iter().map(|m| (m.key(), m.clone())).collect();

        let lookups: Vec<_> = hits.iter().map(|hit| self.context_for(hit)).collect();
        let mut windows = stream::iter(lookups).buffer_unordered(self.config.concurrency.max(1));

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return Err(RetrieveError::Cancelled),
                next = windows.next() => next,
            };
            let Some(window) = next else {
                break;
            };
            for message in window? {
                merged.entry(message.key()).or_insert(message);
            }
        }

        let mut messages: Vec<Message> = merged.into_values().collect();
        sort_chronologically(&mut messages);
        Ok(messages)
    }

    async fn context_for(&self, hit: &Message) -> Result<Vec<Message>, EngineError> {
        let half = i64::try_from(self.config.context_window.as_secs()).unwrap_or(i64::MAX);
        let at = hit.created_at.timestamp();
        let filter = DocumentFilter::window(
            hit.group_id,
            at.saturating_sub(half),
            at.saturating_add(half),
        );
        let query = EngineQuery::window(filter, self.config.context_limit);
        let index_uid = self.indexes.handle(hit.group_id).uid;
        self.search_index(&index_uid, &query).await
    }

    /// One search with retries; a missing index reads as empty.
    async fn search_index(
        &self,
        index_uid: &str,
        query: &EngineQuery,
    ) -> Result<Vec<Message>, EngineError> {
        let engine = self.indexes.engine();
        let raw = self
            .indexes
            .retry()
            .execute("search", move || async move {
                match engine.search(index_uid, query).await {
                    Err(EngineError::IndexNotFound { .. }) => Ok(Vec::new()),
                    other => other,
                }
            })
            .await?;
        Ok(decode_hits(index_uid, raw))
    }
}

/// Typed decode of raw hits; malformed hits are logged and skipped.
fn decode_hits(index_uid: &str, hits: Vec<Value>) -> Vec<Message> {
    hits.into_iter()
        .filter_map(|hit| {
            match MessageDocument::decode(hit).and_then(MessageDocument::into_message) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(index_uid, error = %e, "Dropping malformed hit");
                    None
                }
            }
        })
        .collect()
}
