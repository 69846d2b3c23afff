// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use crate::models::message::Message;
use serde::{Deserialize, Serialize};

/// Ordered run of messages considered contextually linked. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Deep link covering a byte range of the answer text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSpan {
    /// Byte offset into the answer text
    pub offset: usize,
    /// Byte length
    pub length: usize,
    pub url: String,
}

impl LinkSpan {
    /// Same span expressed in UTF-16 code units, as chat transports count entity offsets.
    pub fn to_utf16(&self, text: &str) -> Option<LinkSpan> {
        let end = self.offset.checked_add(self.length)?;
        let prefix = text.get(..self.offset)?;
        let covered = text.get(self.offset..end)?;
        Some(LinkSpan {
            offset: prefix.encode_utf16().count(),
            length: covered.encode_utf16().count(),
            url: self.url.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    Found,
    NoResults,
    MissingCapability,
}

/// Rendered reply to a question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    pub kind: AnswerKind,
    pub text: String,
    pub links: Vec<LinkSpan>,
}

pub const NO_RESULTS_TEXT: &str = "I couldn't find any relevant discussions about this topic in our chat history. You might be the first one to bring this up!";

pub const MISSING_CAPABILITY_TEXT: &str = "I need to be an administrator to access message history.\nPlease make me an administrator with these permissions:\n- Read Messages\n- Send Messages";

pub const GENERIC_FAILURE_TEXT: &str = "Sorry, an error occurred while processing your question.";

impl Answer {
    pub fn no_results() -> Self {
        Self {
            kind: AnswerKind::NoResults,
            text: NO_RESULTS_TEXT.to_string(),
            links: Vec::new(),
        }
    }

    pub fn missing_capability() -> Self {
        Self {
            kind: AnswerKind::MissingCapability,
            text: MISSING_CAPABILITY_TEXT.to_string(),
            links: Vec::new(),
        }
    }
}
