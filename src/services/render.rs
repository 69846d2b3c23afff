// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use crate::models::chat::link_suffix;
use crate::models::conversation::{Answer, AnswerKind, Conversation, LinkSpan};
use crate::models::message::Message;

pub const DEFAULT_LINK_BASE: &str = "https://t.me/c";

/// Used when the strategy carries no relevance description
pub const DEFAULT_EXPLANATION: &str = "Found some messages that might be relevant to your question.";

const DISCUSSIONS_HEADER: &str = "\n\nHere are the relevant discussions:\n\n";

const TIP: &str = "\nTip: Click on any message to jump to that part of the chat history. \
(Make sure I'm an administrator to access message history)";

/// Renders conversations as numbered threads with a deep link per message line.
pub struct ResponseAssembler {
    link_base: String,
}

impl Default for ResponseAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_LINK_BASE)
    }
}

impl ResponseAssembler {
    pub fn new(link_base: impl Into<String>) -> Self {
        Self {
            link_base: link_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{link_base}/{chat suffix}/{message_id}`
    pub fn deep_link(&self, message: &Message) -> String {
        format!(
            "{}/{}/{}",
            self.link_base,
            link_suffix(message.group_id),
            message.message_id
        )
    }

    /// Link offsets are byte offsets into the returned text; each span covers exactly
    /// the `@handle: text` part of its line.
    pub fn render(&self, conversations: &[Conversation], explanation: &str) -> Answer {
        let conversations: Vec<&Conversation> =
            conversations.iter().filter(|c| !c.is_empty()).collect();
        if conversations.is_empty() {
            return Answer::no_results();
        }

        let explanation = match explanation.trim() {
            "" => DEFAULT_EXPLANATION,
            text => text,
        };

        let mut text = String::new();
        let mut links = Vec::new();
        text.push_str(explanation);
        text.push_str(DISCUSSIONS_HEADER);

        for (i, conversation) in conversations.iter().enumerate() {
            if i > 0 {
                text.push('\n');
            }
            for (j, message) in conversation.messages.iter().enumerate() {
                if j == 0 {
                    text.push_str(&format!("{}. ", i + 1));
                }
                let line = format!("@{}: {}", message.author_handle, message.text);
                links.push(LinkSpan {
                    offset: text.len(),
                    length: line.len(),
                    url: self.deep_link(message),
                });
                text.push_str(&line);
                text.push('\n');
            }
        }
        text.push_str(TIP);

        Answer {
            kind: AnswerKind::Found,
            text,
            links,
        }
    }
}
