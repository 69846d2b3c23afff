// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Single left-to-right pass that carves a time-ordered candidate pool into
//! conversations. Adjacent messages stay together when any of these holds:
//!
//! - they were posted less than the conversation timeout apart;
//! - the earlier one asks a question and the later one is a short reply;
//! - their significant terms overlap, literally or through the lexicon's affinity groups.

use crate::models::conversation::Conversation;
use crate::models::lexicon::Lexicon;
use crate::models::message::{sort_chronologically, Message};
use std::sync::Arc;
use std::time::Duration;

/// Replies shorter than this many words count as direct answers to a question
const SHORT_REPLY_WORDS: usize = 5;

/// Significant terms are strictly longer than this
const MIN_TERM_CHARS: usize = 3;

const TERM_PUNCTUATION: &[char] = &[
    '.', ',', '!', '?', '(', ')', '[', ']', '{', '}', ':', ';', '"', '\'',
];

pub struct ConversationGrouper {
    lexicon: Arc<Lexicon>,
    timeout: Duration,
}

impl ConversationGrouper {
    pub fn new(lexicon: Arc<Lexicon>, timeout: Duration) -> Self {
        Self { lexicon, timeout }
    }

    /// Sorts internally, so input order does not matter.
    pub fn group(&self, mut messages: Vec<Message>) -> Vec<Conversation> {
        sort_chronologically(&mut messages);

        let mut conversations = Vec::new();
        let mut current: Vec<Message> = Vec::new();

        for message in messages {
            let joins = current
                .last()
                .is_none_or(|previous| self.related(previous, &message));
            if !joins {
                conversations.push(Conversation {
                    messages: std::mem::take(&mut current),
                });
            }
            current.push(message);
        }

        if !current.is_empty() {
            conversations.push(Conversation { messages: current });
        }
        conversations
    }

    fn related(&self, earlier: &Message, later: &Message) -> bool {
        self.within_timeout(earlier, later)
            || is_direct_reply(earlier, later)
            || self.terms_overlap(
                &self.significant_terms(&earlier.text),
                &self.significant_terms(&later.text),
            )
    }

    fn within_timeout(&self, earlier: &Message, later: &Message) -> bool {
        let gap = later.created_at - earlier.created_at;
        gap.to_std().is_ok_and(|gap| gap < self.timeout)
    }

    /// Lower-cased, punctuation-trimmed words longer than three characters that are not
    /// stop words.
    pub fn significant_terms(&self, text: &str) -> Vec<String> {
        text.split_whitespace()
            .map(|word| word.trim_matches(TERM_PUNCTUATION).to_lowercase())
            .filter(|word| word.chars().count() > MIN_TERM_CHARS)
            .filter(|word| !self.lexicon.is_stop_word(word))
            .collect()
    }

    /// Exact match, containment (both sides longer than three characters), or affinity.
    pub fn terms_overlap(&self, left: &[String], right: &[String]) -> bool {
        left.iter().any(|a| {
            right.iter().any(|b| {
                a == b
                    || (a.chars().count() > MIN_TERM_CHARS
                        && b.chars().count() > MIN_TERM_CHARS
                        && (a.contains(b.as_str()) || b.contains(a.as_str())))
                    || self.lexicon.related(a, b)
            })
        })
    }
}

/// The earlier message asks something and the later one is a short answer.
pub fn is_direct_reply(earlier: &Message, later: &Message) -> bool {
    earlier.text.trim_end().ends_with('?')
        && later.text.split_whitespace().count() < SHORT_REPLY_WORDS
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn grouper() -> ConversationGrouper {
        ConversationGrouper::new(
            Arc::new(Lexicon::builtin().unwrap()),
            Duration::from_secs(120),
        )
    }

    fn message(id: i64, text: &str, at: i64) -> Message {
        Message {
            group_id: -1,
            message_id: id,
            author_id: id,
            author_handle: format!("u{id}"),
            text: text.to_string(),
            created_at: Utc.timestamp_opt(1_700_000_000 + at, 0).unwrap(),
        }
    }

    fn ids(conversations: &[Conversation]) -> Vec<Vec<i64>> {
        conversations
            .iter()
            .map(|c| c.messages.iter().map(|m| m.message_id).collect())
            .collect()
    }

    #[test]
    fn test_close_messages_join_without_shared_terms() {
        let groups = grouper().group(vec![
            message(1, "pizza tonight", 0),
            message(2, "railway strike", 10),
        ]);
        assert_eq!(ids(&groups), vec![vec![1, 2]]);
    }

    #[test]
    fn test_distant_unrelated_messages_split() {
        let groups = grouper().group(vec![
            message(1, "pizza tonight", 0),
            message(2, "railway strike", 600),
        ]);
        assert_eq!(ids(&groups), vec![vec![1], vec![2]]);
    }

    #[test]
    fn test_timeout_boundary_is_exclusive() {
        let groups = grouper().group(vec![
            message(1, "pizza tonight", 0),
            message(2, "railway strike", 120),
        ]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_short_answer_to_question_joins() {
        let groups = grouper().group(vec![
            message(1, "did the deploy finish?", 0),
            message(2, "yep all good", 900),
        ]);
        assert_eq!(ids(&groups), vec![vec![1, 2]]);
    }

    #[test]
    fn test_long_answer_to_question_needs_another_link() {
        let groups = grouper().group(vec![
            message(1, "did the deploy finish?", 0),
            message(2, "honestly I have no idea what happened there", 900),
        ]);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_shared_terms_join_distant_messages() {
        let groups = grouper().group(vec![
            message(1, "Terraform plan keeps failing", 0),
            message(2, "terraform needs the lock file", 3600),
        ]);
        assert_eq!(ids(&groups), vec![vec![1, 2]]);
    }

    #[test]
    fn test_substring_terms_join() {
        let groups = grouper().group(vec![
            message(1, "the crawler is slow", 0),
            message(2, "crawlers need politeness", 3600),
        ]);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_affinity_terms_join() {
        let groups = grouper().group(vec![
            message(1, "localstack saves money", 0),
            message(2, "prefer plain docker", 3600),
        ]);
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_input_order_does_not_matter() {
        let sorted = vec![
            message(1, "pizza tonight", 0),
            message(2, "railway strike", 10),
            message(3, "kubernetes upgrade", 1000),
            message(4, "random chatter", 1000),
            message(5, "weather report", 5000),
        ];
        let mut shuffled = sorted.clone();
        shuffled.reverse();
        shuffled.swap(0, 2);

        assert_eq!(grouper().group(sorted), grouper().group(shuffled));
    }

    #[test]
    fn test_significant_terms_strip_punctuation_and_stop_words() {
        let terms =
            grouper().significant_terms("Has anyone tried (LocalStack)? Really, amazing!");
        assert_eq!(terms, vec!["tried", "localstack", "really", "amazing"]);
    }

    #[test]
    fn test_empty_input_yields_no_conversations() {
        assert!(grouper().group(Vec::new()).is_empty());
    }
}
