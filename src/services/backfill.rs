// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! History backfill as detached, cancellable tasks.
//!
//! Each task re-indexes a group's most recent stored messages, oldest first. Progress is
//! published on a `watch` channel; a finished task ends in exactly one terminal
//! [`BackfillStatus`] and, when a reply chat was given, one outbound message.

use crate::models::api::BackfillStatus;
use crate::services::db::MessageStore;
use crate::services::ingest::{IngestOutcome, Ingestor};
use crate::services::outbound::{deliver, Outbound};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Messages re-indexed when the caller does not say how many
pub const DEFAULT_BACKFILL_LIMIT: usize = 100;

/// Finished tasks kept for status polling; older finished tasks are forgotten
const RETAINED_FINISHED_TASKS: usize = 64;

const LOAD_FAILED_TEXT: &str =
    "❌ Failed to fetch chat history. Please make sure I have the correct permissions.";

fn completed_text(indexed: usize) -> String {
    format!("✅ Successfully indexed {indexed} text messages from the chat history.")
}

/// Caller side of a running or finished backfill.
#[derive(Clone)]
pub struct BackfillHandle {
    id: Uuid,
    group_id: i64,
    status: watch::Receiver<BackfillStatus>,
    cancel: CancellationToken,
}

impl BackfillHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    pub fn status(&self) -> BackfillStatus {
        *self.status.borrow()
    }

    /// Requests cancellation; the task stops before its next message.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Resolves with the terminal status.
    pub async fn wait(&self) -> BackfillStatus {
        let mut status = self.status.clone();
        loop {
            let current = *status.borrow_and_update();
            if current.is_finished() {
                return current;
            }
            if status.changed().await.is_err() {
                return *status.borrow();
            }
        }
    }
}

struct BackfillJob {
    store: Arc<dyn MessageStore>,
    ingestor: Arc<Ingestor>,
    outbound: Option<Arc<dyn Outbound>>,
    group_id: i64,
    limit: usize,
    reply_chat_id: Option<i64>,
    status: watch::Sender<BackfillStatus>,
    cancel: CancellationToken,
}

impl BackfillJob {
    async fn run(self) {
        let status = self.index_history().await;
        info!(
            group_id = self.group_id,
            indexed = status.indexed(),
            ?status,
            "Backfill finished"
        );

        if let (Some(outbound), Some(chat_id)) = (&self.outbound, self.reply_chat_id) {
            let text = match status {
                BackfillStatus::Completed { indexed } => Some(completed_text(indexed)),
                BackfillStatus::Failed { .. } => Some(LOAD_FAILED_TEXT.to_string()),
                _ => None,
            };
            if let Some(text) = text {
                if let Err(e) = deliver(outbound.as_ref(), chat_id, &text, &[]).await {
                    warn!(chat_id, error = %e, "Failed to send backfill notice");
                }
            }
        }

        self.status.send_replace(status);
    }

    async fn index_history(&self) -> BackfillStatus {
        let messages = tokio::select! {
            _ = self.cancel.cancelled() => return BackfillStatus::Cancelled { indexed: 0 },
            loaded = self.store.recent_messages(self.group_id, self.limit) => match loaded {
                Ok(messages) => messages,
                Err(e) => {
                    error!(group_id = self.group_id, error = %e, "Failed to load chat history");
                    return BackfillStatus::Failed { indexed: 0 };
                }
            },
        };

        let mut indexed = 0;
        for message in &messages {
            if self.cancel.is_cancelled() {
                return BackfillStatus::Cancelled { indexed };
            }
            match self.ingestor.ingest(message).await {
                Ok(IngestOutcome::Indexed) => {
                    indexed += 1;
                    self.status.send_replace(BackfillStatus::Running { indexed });
                }
                Ok(IngestOutcome::Skipped) => {}
                Err(e) => warn!(
                    group_id = message.group_id,
                    message_id = message.message_id,
                    error = %e,
                    "Failed to index message during backfill"
                ),
            }
        }
        BackfillStatus::Completed { indexed }
    }
}

/// Starts backfill tasks and keeps their handles for polling and cancellation.
pub struct BackfillRegistry {
    store: Arc<dyn MessageStore>,
    ingestor: Arc<Ingestor>,
    outbound: Option<Arc<dyn Outbound>>,
    /// Keyed by v7 ids, so iteration runs oldest first
    tasks: RwLock<BTreeMap<Uuid, BackfillHandle>>,
}

impl BackfillRegistry {
    pub fn new(
        store: Arc<dyn MessageStore>,
        ingestor: Arc<Ingestor>,
        outbound: Option<Arc<dyn Outbound>>,
    ) -> Self {
        Self {
            store,
            ingestor,
            outbound,
            tasks: RwLock::new(BTreeMap::new()),
        }
    }

    pub async fn start(
        &self,
        group_id: i64,
        limit: Option<usize>,
        reply_chat_id: Option<i64>,
    ) -> BackfillHandle {
        let id = Uuid::now_v7();
        let (tx, rx) = watch::channel(BackfillStatus::Running { indexed: 0 });
        let cancel = CancellationToken::new();
        let handle = BackfillHandle {
            id,
            group_id,
            status: rx,
            cancel: cancel.clone(),
        };
        {
            let mut tasks = self.tasks.write().await;
            prune_finished(&mut tasks, RETAINED_FINISHED_TASKS);
            tasks.insert(id, handle.clone());
        }

        let job = BackfillJob {
            store: self.store.clone(),
            ingestor: self.ingestor.clone(),
            outbound: self.outbound.clone(),
            group_id,
            limit: limit.unwrap_or(DEFAULT_BACKFILL_LIMIT),
            reply_chat_id,
            status: tx,
            cancel,
        };
        info!(group_id, task_id = %id, limit = job.limit, "Backfill started");
        tokio::spawn(job.run());

        handle
    }

    pub async fn get(&self, id: Uuid) -> Option<BackfillHandle> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Cancels a task; `None` when the id is unknown.
    pub async fn cancel(&self, id: Uuid) -> Option<BackfillHandle> {
        let handle = self.get(id).await?;
        handle.cancel();
        Some(handle)
    }
}

/// Drops the oldest finished tasks beyond `keep`. Running tasks always stay.
fn prune_finished(tasks: &mut BTreeMap<Uuid, BackfillHandle>, keep: usize) {
    let finished: Vec<Uuid> = tasks
        .iter()
        .filter(|(_, handle)| handle.status().is_finished())
        .map(|(id, _)| *id)
        .collect();
    let excess = finished.len().saturating_sub(keep);
    for id in finished.into_iter().take(excess) {
        tasks.remove(&id);
    }
}
