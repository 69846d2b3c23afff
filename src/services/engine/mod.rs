// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Text-index engine boundary.
//!
//! The pipeline talks to the engine only through [`SearchEngine`]. Production uses
//! [`MeiliEngine`](crate::services::search::MeiliEngine); tests use [`MemoryEngine`].
//! Every write waits for the engine to finish the task, so a returned `Ok` means the
//! document is visible to search.

pub mod memory;

pub use memory::MemoryEngine;

use crate::models::search::MessageDocument;
use async_trait::async_trait;
use serde_json::Value;
use tokio::time::error::Elapsed;

/// Primary key of every per-group index
pub const PRIMARY_KEY: &str = "uid";

#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Creates the index, treating "already exists" as success.
    async fn ensure_index(&self, index_uid: &str) -> Result<(), EngineError>;

    /// Applies attribute and typo settings. Re-applying the same settings is a no-op.
    async fn apply_settings(
        &self,
        index_uid: &str,
        settings: &IndexSettings,
    ) -> Result<(), EngineError>;

    /// Insert or replace by document uid.
    async fn upsert(&self, index_uid: &str, document: &MessageDocument)
        -> Result<(), EngineError>;

    /// Raw document by uid, `None` when absent.
    async fn fetch(&self, index_uid: &str, document_uid: &str)
        -> Result<Option<Value>, EngineError>;

    /// Raw hits; callers decode them with [`MessageDocument::decode`].
    async fn search(&self, index_uid: &str, query: &EngineQuery)
        -> Result<Vec<Value>, EngineError>;

    async fn document_count(&self, index_uid: &str) -> Result<usize, EngineError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("index `{uid}` does not exist")]
    IndexNotFound { uid: String },
    #[error("engine task {task_uid} failed: {message}")]
    TaskFailed { task_uid: u32, message: String },
    #[error("engine call timed out")]
    Timeout(#[from] Elapsed),
    #[error("meilisearch error: {0}")]
    Meilisearch(#[from] meilisearch_sdk::errors::Error),
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("query `{0}` is not supported by this engine")]
    UnsupportedQuery(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    CreatedAsc,
    CreatedDesc,
}

impl SortOrder {
    pub fn as_rule(self) -> &'static str {
        match self {
            SortOrder::CreatedAsc => "created_at:asc",
            SortOrder::CreatedDesc => "created_at:desc",
        }
    }
}

/// Restriction to one group and an inclusive creation-time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocumentFilter {
    pub group_id: i64,
    pub created_from: Option<i64>,
    pub created_to: Option<i64>,
}

impl DocumentFilter {
    pub fn group(group_id: i64) -> Self {
        Self {
            group_id,
            created_from: None,
            created_to: None,
        }
    }

    pub fn window(group_id: i64, from: i64, to: i64) -> Self {
        Self {
            group_id,
            created_from: Some(from),
            created_to: Some(to),
        }
    }

    /// Engine filter expression, e.g. `group_id = -5 AND created_at >= 10 AND created_at <= 20`.
    pub fn to_expression(&self) -> String {
        let mut clauses = vec![format!("group_id = {}", self.group_id)];
        if let Some(from) = self.created_from {
            clauses.push(format!("created_at >= {from}"));
        }
        if let Some(to) = self.created_to {
            clauses.push(format!("created_at <= {to}"));
        }
        clauses.join(" AND ")
    }
}

/// One search request. Every word of `text` must match; quoted words match as a phrase.
/// The text carries no boolean operators, so alternatives are separate queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineQuery {
    /// Free text; empty matches every document passing the filter
    pub text: String,
    pub filter: Option<DocumentFilter>,
    pub sort: Option<SortOrder>,
    pub limit: usize,
}

impl EngineQuery {
    pub fn text(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            filter: None,
            sort: None,
            limit,
        }
    }

    /// Filter-only query over a time window.
    pub fn window(filter: DocumentFilter, limit: usize) -> Self {
        Self {
            text: String::new(),
            filter: Some(filter),
            sort: Some(SortOrder::CreatedAsc),
            limit,
        }
    }

    pub fn with_filter(mut self, filter: DocumentFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// Minimum word lengths before the engine tolerates typos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypoTolerance {
    pub one_typo: u8,
    pub two_typos: u8,
}

/// Per-group index configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    pub searchable: Vec<String>,
    pub filterable: Vec<String>,
    pub sortable: Vec<String>,
    pub ranking_rules: Vec<String>,
    pub typo_tolerance: TypoTolerance,
    pub max_total_hits: usize,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            searchable: strings(&["text", "author_handle"]),
            filterable: strings(&["group_id", "author_id", "message_id", "created_at"]),
            sortable: strings(&["created_at"]),
            ranking_rules: strings(&[
                "words",
                "typo",
                "proximity",
                "attribute",
                "sort",
                "exactness",
            ]),
            typo_tolerance: TypoTolerance {
                one_typo: 2,
                two_typos: 4,
            },
            max_total_hits: 100,
        }
    }
}
