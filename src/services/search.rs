// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use crate::models::search::MessageDocument;
use crate::services::engine::{EngineError, EngineQuery, IndexSettings, SearchEngine, PRIMARY_KEY};
use crate::services::retry::parse_env;
use anyhow::{Context, Result};
use async_trait::async_trait;
use meilisearch_sdk::client::Client;
use meilisearch_sdk::errors::{Error as MeiliError, ErrorCode, MeilisearchError};
use meilisearch_sdk::search::MatchingStrategies;
use meilisearch_sdk::settings::{
    MinWordSizeForTypos, PaginationSetting, Settings, TypoToleranceSettings,
};
use meilisearch_sdk::task_info::TaskInfo;
use serde_json::Value;
use std::env;
use std::time::Duration;
use tracing::{debug, info};

/// Request parameters sent to Meilisearch for one [`EngineQuery`].
///
/// Matching is always `all`. Meilisearch reads `OR` in `q` as a plain word, so callers
/// send one query per alternative.
#[derive(Debug, Clone, PartialEq, Eq)]
struct SearchParams {
    q: String,
    filter: Option<String>,
    sort: Option<&'static str>,
    limit: usize,
}

impl From<&EngineQuery> for SearchParams {
    fn from(query: &EngineQuery) -> Self {
        Self {
            q: query.text.clone(),
            filter: query.filter.map(|f| f.to_expression()),
            sort: query.sort.map(|s| s.as_rule()),
            limit: query.limit,
        }
    }
}

/// Meilisearch connection settings
#[derive(Debug, Clone)]
pub struct MeiliConfig {
    pub host: String,
    pub api_key: Option<String>,
    /// Per-group index uids are `"{index_prefix}_{group_id}"`
    pub index_prefix: String,
    /// Upper bound for waiting on an asynchronous engine task
    pub task_timeout: Duration,
}

impl MeiliConfig {
    pub fn from_env() -> Result<Self> {
        let host = env::var("MEILISEARCH_HOST").context("MEILISEARCH_HOST must be set")?;
        let api_key = env::var("MEILISEARCH_API_KEY")
            .ok()
            .filter(|key| !key.is_empty());
        let index_prefix = env::var("INDEX_PREFIX").unwrap_or_else(|_| "messages".to_string());
        let task_timeout = parse_env("ENGINE_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(10));

        Ok(Self {
            host,
            api_key,
            index_prefix,
            task_timeout,
        })
    }
}

/// [`SearchEngine`] backed by Meilisearch
pub struct MeiliEngine {
    client: Client,
    task_timeout: Duration,
}

impl MeiliEngine {
    pub fn new(config: &MeiliConfig) -> Result<Self> {
        // Construct the full URL if only host:port is provided
        let url = if config.host.starts_with("http://") || config.host.starts_with("https://") {
            config.host.clone()
        } else {
            format!("http://{}", config.host)
        };

        let client = Client::new(&url, config.api_key.clone())
            .with_context(|| format!("Failed to create Meilisearch client for {url}"))?;

        info!(url = %url, "Connected to Meilisearch");

        Ok(Self {
            client,
            task_timeout: config.task_timeout,
        })
    }

    /// Waits for an enqueued task and converts a failed task into an error.
    async fn wait(&self, task: TaskInfo) -> Result<(), EngineError> {
        let task_uid = task.task_uid;
        let task = task
            .wait_for_completion(&self.client, None, Some(self.task_timeout))
            .await?;

        if task.is_failure() {
            let failure = task.unwrap_failure();
            return Err(EngineError::TaskFailed {
                task_uid,
                message: failure.error_message,
            });
        }
        debug!(task_uid, "Engine task completed");
        Ok(())
    }
}

fn is_code(error: &MeiliError, code: ErrorCode) -> bool {
    matches!(
        error,
        MeiliError::Meilisearch(MeilisearchError { error_code, .. }) if *error_code == code
    )
}

fn not_found(index_uid: &str, error: MeiliError) -> EngineError {
    if is_code(&error, ErrorCode::IndexNotFound) {
        EngineError::IndexNotFound {
            uid: index_uid.to_string(),
        }
    } else {
        EngineError::Meilisearch(error)
    }
}

#[async_trait]
impl SearchEngine for MeiliEngine {
    async fn ensure_index(&self, index_uid: &str) -> Result<(), EngineError> {
        let task = self
            .client
            .create_index(index_uid, Some(PRIMARY_KEY))
            .await?;
        let task_uid = task.task_uid;
        let task = task
            .wait_for_completion(&self.client, None, Some(self.task_timeout))
            .await?;

        if task.is_failure() {
            let failure = task.unwrap_failure();
            if failure.error_code == ErrorCode::IndexAlreadyExists {
                debug!(index_uid, "Index already exists");
                return Ok(());
            }
            return Err(EngineError::TaskFailed {
                task_uid,
                message: failure.error_message,
            });
        }

        info!(index_uid, "Created index");
        Ok(())
    }

    async fn apply_settings(
        &self,
        index_uid: &str,
        settings: &IndexSettings,
    ) -> Result<(), EngineError> {
        let typo = TypoToleranceSettings {
            enabled: Some(true),
            min_word_size_for_typos: Some(MinWordSizeForTypos {
                one_typo: Some(settings.typo_tolerance.one_typo),
                two_typos: Some(settings.typo_tolerance.two_typos),
            }),
            ..Default::default()
        };

        let meili_settings = Settings::new()
            .with_searchable_attributes(&settings.searchable)
            .with_filterable_attributes(&settings.filterable)
            .with_sortable_attributes(&settings.sortable)
            .with_ranking_rules(&settings.ranking_rules)
            .with_typo_tolerance(typo)
            .with_pagination(PaginationSetting {
                max_total_hits: settings.max_total_hits,
            });

        let task = self
            .client
            .index(index_uid)
            .set_settings(&meili_settings)
            .await
            .map_err(|e| not_found(index_uid, e))?;
        self.wait(task).await?;

        info!(index_uid, "Applied index settings");
        Ok(())
    }

    async fn upsert(
        &self,
        index_uid: &str,
        document: &MessageDocument,
    ) -> Result<(), EngineError> {
        let task = self
            .client
            .index(index_uid)
            .add_or_replace(std::slice::from_ref(document), Some(PRIMARY_KEY))
            .await
            .map_err(|e| not_found(index_uid, e))?;
        self.wait(task).await
    }

    async fn fetch(
        &self,
        index_uid: &str,
        document_uid: &str,
    ) -> Result<Option<Value>, EngineError> {
        match self
            .client
            .index(index_uid)
            .get_document::<Value>(document_uid)
            .await
        {
            Ok(doc) => Ok(Some(doc)),
            Err(e) if is_code(&e, ErrorCode::DocumentNotFound) => Ok(None),
            Err(e) => Err(not_found(index_uid, e)),
        }
    }

    async fn search(
        &self,
        index_uid: &str,
        query: &EngineQuery,
    ) -> Result<Vec<Value>, EngineError> {
        let index = self.client.index(index_uid);
        let params = SearchParams::from(query);
        let sort = params.sort.map(|rule| [rule]);

        let mut request = index.search();
        request
            .with_query(&params.q)
            .with_limit(params.limit)
            .with_matching_strategy(MatchingStrategies::ALL);
        if let Some(filter) = params.filter.as_deref() {
            request.with_filter(filter);
        }
        if let Some(sort) = sort.as_ref() {
            request.with_sort(sort);
        }

        let results = request
            .execute::<Value>()
            .await
            .map_err(|e| not_found(index_uid, e))?;

        debug!(
            index_uid,
            query = %query.text,
            hits = results.hits.len(),
            "Search completed"
        );

        Ok(results.hits.into_iter().map(|hit| hit.result).collect())
    }

    async fn document_count(&self, index_uid: &str) -> Result<usize, EngineError> {
        let stats = self
            .client
            .index(index_uid)
            .get_stats()
            .await
            .map_err(|e| not_found(index_uid, e))?;
        Ok(stats.number_of_documents)
    }
}
