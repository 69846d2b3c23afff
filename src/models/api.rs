// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Request and response bodies for the ingestion, question and backfill routes.

use crate::models::conversation::{AnswerKind, LinkSpan};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestRequest {
    pub group_id: i64,
    pub message_id: i64,
    pub author_id: i64,
    pub author_handle: String,
    #[serde(default)]
    pub text: String,
    /// Seconds since epoch
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub success: bool,
    /// False for media-only messages, which are acknowledged but not indexed
    pub indexed: bool,
    pub document_uid: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    pub group_id: i64,
    pub question: String,
    /// Deliver the answer to this chat through the outbound transport
    #[serde(default)]
    pub reply_chat_id: Option<i64>,
    /// Whether the caller holds administrator access to the group history
    #[serde(default)]
    pub is_admin: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub kind: AnswerKind,
    pub text: String,
    pub links: Vec<LinkSpan>,
    pub delivered: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackfillRequest {
    /// Number of most recent stored messages to re-index (default: 100)
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub reply_chat_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillResponse {
    pub task_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BackfillStatus {
    Running { indexed: usize },
    Completed { indexed: usize },
    Cancelled { indexed: usize },
    Failed { indexed: usize },
}

impl BackfillStatus {
    pub fn is_finished(&self) -> bool {
        !matches!(self, BackfillStatus::Running { .. })
    }

    pub fn indexed(&self) -> usize {
        match *self {
            BackfillStatus::Running { indexed }
            | BackfillStatus::Completed { indexed }
            | BackfillStatus::Cancelled { indexed }
            | BackfillStatus::Failed { indexed } => indexed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillStatusResponse {
    pub task_id: String,
    pub group_id: i64,
    pub status: BackfillStatus,
}
