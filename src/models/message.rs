// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a message: unique within the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    pub group_id: i64,
    pub message_id: i64,
}

impl MessageKey {
    pub fn new(group_id: i64, message_id: i64) -> Self {
        Self {
            group_id,
            message_id,
        }
    }

    /// Composite primary key used by the per-group index: `"{group_id}-{message_id}"`.
    pub fn document_uid(&self) -> String {
        format!("{}-{}", self.group_id, self.message_id)
    }
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.group_id, self.message_id)
    }
}

/// One chat utterance as received from the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Chat identifier; negative for groups, below -10^12 for supergroups
    pub group_id: i64,
    /// Message identifier, unique within the group
    pub message_id: i64,
    pub author_id: i64,
    pub author_handle: String,
    /// Body text; empty for media-only messages
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.group_id, self.message_id)
    }

    /// Media-only messages carry no text and never occupy an index slot.
    pub fn has_text(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

/// Oldest first; ties broken by identity key so the order is total.
pub fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by_key(|m| (m.created_at, m.key()));
}

/// Incoming question from the transport layer.
#[derive(Debug, Clone)]
pub struct Question {
    pub group_id: i64,
    pub text: String,
    /// Chat the answer should be delivered to, if the caller wants delivery
    pub reply_chat_id: Option<i64>,
    /// Whether the transport reports administrator access to the group history
    pub is_admin: bool,
}
