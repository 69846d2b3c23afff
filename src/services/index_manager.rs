// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! One index per group, created and configured on first reference.
//!
//! First touches of the same group serialize on a per-group lock; other groups never
//! wait on it. A group is remembered as configured only after both the create and the
//! settings step succeeded, so a failed attempt is retried on the next reference.

use crate::services::engine::{EngineError, IndexSettings, SearchEngine};
use crate::services::retry::RetryPolicy;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Resolved index of one group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHandle {
    pub group_id: i64,
    pub uid: String,
}

pub struct IndexManager {
    engine: Arc<dyn SearchEngine>,
    retry: RetryPolicy,
    prefix: String,
    settings: IndexSettings,
    configured: RwLock<HashSet<i64>>,
    group_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl IndexManager {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        retry: RetryPolicy,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            retry,
            prefix: prefix.into(),
            settings: IndexSettings::default(),
            configured: RwLock::new(HashSet::new()),
            group_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<dyn SearchEngine> {
        &self.engine
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Handle for a group without touching the engine.
    pub fn handle(&self, group_id: i64) -> IndexHandle {
        IndexHandle {
            group_id,
            uid: format!("{}_{}", self.prefix, group_id),
        }
    }

    /// Handle for a group whose index is guaranteed to exist and be configured.
    pub async fn index_for(&self, group_id: i64) -> Result<IndexHandle, EngineError> {
        let handle = self.handle(group_id);
        if self.configured.read().await.contains(&group_id) {
            return Ok(handle);
        }

        let lock = self.group_lock(group_id).await;
        let _guard = lock.lock().await;

        // Another caller may have finished while we waited
        if self.configured.read().await.contains(&group_id) {
            return Ok(handle);
        }

        self.configure(&handle).await?;
        self.configured.write().await.insert(group_id);
        info!(group_id, index_uid = %handle.uid, "Index ready");
        Ok(handle)
    }

    async fn configure(&self, handle: &IndexHandle) -> Result<(), EngineError> {
        let engine = &self.engine;
        let uid = handle.uid.as_str();
        let settings = &self.settings;

        self.retry
            .execute("create_index", move || engine.ensure_index(uid))
            .await?;
        self.retry
            .execute("apply_settings", move || engine.apply_settings(uid, settings))
            .await
    }

    async fn group_lock(&self, group_id: i64) -> Arc<Mutex<()>> {
        self.group_locks
            .lock()
            .await
            .entry(group_id)
            .or_default()
            .clone()
    }
}
