// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! In-memory [`SearchEngine`] for tests and local runs without Meilisearch.
//!
//! Documents are kept as raw JSON so malformed hits can be planted with
//! [`MemoryEngine::insert_raw`]. A document matches when every word of the query, and
//! every quoted phrase, occurs in its text or author handle (case-insensitive substring).
//! Query text containing ` OR ` is rejected: the real engine has no such operator and
//! would search for the word "or".

use super::{EngineError, EngineQuery, IndexSettings, SearchEngine, SortOrder};
use crate::models::search::MessageDocument;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryIndex {
    settings: Option<IndexSettings>,
    documents: BTreeMap<String, Value>,
}

#[derive(Default)]
pub struct MemoryEngine {
    indexes: RwLock<HashMap<String, MemoryIndex>>,
    pending_failures: AtomicU32,
    create_calls: AtomicUsize,
    settings_calls: AtomicUsize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `n` engine calls fail with [`EngineError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        self.pending_failures.store(n, Ordering::SeqCst);
    }

    /// Stores a document verbatim, bypassing typed encoding.
    pub async fn insert_raw(&self, index_uid: &str, document_uid: &str, document: Value) {
        let mut indexes = self.indexes.write().await;
        indexes
            .entry(index_uid.to_string())
            .or_default()
            .documents
            .insert(document_uid.to_string(), document);
    }

    pub async fn has_index(&self, index_uid: &str) -> bool {
        self.indexes.read().await.contains_key(index_uid)
    }

    pub async fn settings(&self, index_uid: &str) -> Option<IndexSettings> {
        self.indexes
            .read()
            .await
            .get(index_uid)
            .and_then(|index| index.settings.clone())
    }

    /// Number of index creations that actually created something.
    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn settings_calls(&self) -> usize {
        self.settings_calls.load(Ordering::SeqCst)
    }

    fn injected_failure(&self) -> Result<(), EngineError> {
        let taken = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match taken {
            Ok(_) => Err(EngineError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }
}

fn missing(index_uid: &str) -> EngineError {
    EngineError::IndexNotFound {
        uid: index_uid.to_string(),
    }
}

fn int_field(doc: &Value, name: &str) -> Option<i64> {
    doc.get(name).and_then(Value::as_i64)
}

fn haystack(doc: &Value) -> String {
    let text = doc.get("text").and_then(Value::as_str).unwrap_or_default();
    let handle = doc
        .get("author_handle")
        .and_then(Value::as_str)
        .unwrap_or_default();
    format!("{text} {handle}").to_lowercase()
}

fn matches_text(doc: &Value, text: &str) -> bool {
    let haystack = haystack(doc);
    // Odd segments sit between quotes
    text.to_lowercase()
        .split('"')
        .enumerate()
        .all(|(i, segment)| {
            let mut words = segment.split_whitespace();
            if i % 2 == 1 {
                let phrase = words.collect::<Vec<_>>().join(" ");
                haystack.contains(phrase.as_str())
            } else {
                words.all(|w| haystack.contains(w))
            }
        })
}

fn matches_filter(doc: &Value, query: &EngineQuery) -> bool {
    let Some(filter) = query.filter else {
        return true;
    };
    let created_at = int_field(doc, "created_at");
    int_field(doc, "group_id") == Some(filter.group_id)
        && filter
            .created_from
            .is_none_or(|from| created_at.is_some_and(|t| t >= from))
        && filter
            .created_to
            .is_none_or(|to| created_at.is_some_and(|t| t <= to))
}

#[async_trait]
impl SearchEngine for MemoryEngine {
    async fn ensure_index(&self, index_uid: &str) -> Result<(), EngineError> {
        self.injected_failure()?;
        let mut indexes = self.indexes.write().await;
        if !indexes.contains_key(index_uid) {
            indexes.insert(index_uid.to_string(), MemoryIndex::default());
            self.create_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn apply_settings(
        &self,
        index_uid: &str,
        settings: &IndexSettings,
    ) -> Result<(), EngineError> {
        self.injected_failure()?;
        let mut indexes = self.indexes.write().await;
        let index = indexes.get_mut(index_uid).ok_or_else(|| missing(index_uid))?;
        index.settings = Some(settings.clone());
        self.settings_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn upsert(
        &self,
        index_uid: &str,
        document: &MessageDocument,
    ) -> Result<(), EngineError> {
        self.injected_failure()?;
        let value = serde_json::to_value(document)
            .map_err(|e| EngineError::Unavailable(format!("could not encode document: {e}")))?;
        let mut indexes = self.indexes.write().await;
        let index = indexes.get_mut(index_uid).ok_or_else(|| missing(index_uid))?;
        index.documents.insert(document.uid.clone(), value);
        Ok(())
    }

    async fn fetch(
        &self,
        index_uid: &str,
        document_uid: &str,
    ) -> Result<Option<Value>, EngineError> {
        self.injected_failure()?;
        let indexes = self.indexes.read().await;
        let index = indexes.get(index_uid).ok_or_else(|| missing(index_uid))?;
        Ok(index.documents.get(document_uid).cloned())
    }

    async fn search(
        &self,
        index_uid: &str,
        query: &EngineQuery,
    ) -> Result<Vec<Value>, EngineError> {
        self.injected_failure()?;
        if query.text.contains(" OR ") {
            return Err(EngineError::UnsupportedQuery(query.text.clone()));
        }
        let indexes = self.indexes.read().await;
        let index = indexes.get(index_uid).ok_or_else(|| missing(index_uid))?;

        let mut hits: Vec<Value> = index
            .documents
            .values()
            .filter(|doc| matches_filter(doc, query))
            .filter(|doc| matches_text(doc, &query.text))
            .cloned()
            .collect();

        match query.sort {
            Some(SortOrder::CreatedAsc) => hits.sort_by_key(|doc| int_field(doc, "created_at")),
            Some(SortOrder::CreatedDesc) => {
                hits.sort_by_key(|doc| std::cmp::Reverse(int_field(doc, "created_at")));
            }
            None => {}
        }
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn document_count(&self, index_uid: &str) -> Result<usize, EngineError> {
        self.injected_failure()?;
        let indexes = self.indexes.read().await;
        let index = indexes.get(index_uid).ok_or_else(|| missing(index_uid))?;
        Ok(index.documents.len())
    }
}
