// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use serde::{Deserialize, Serialize};

/// Structured interpretation of a free-text question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchStrategy {
    #[serde(default)]
    pub key_terms: Vec<String>,
    #[serde(default)]
    pub relevance_criteria: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_query: Option<String>,
    /// Where the strategy came from; never part of the model's JSON
    #[serde(skip)]
    pub origin: StrategyOrigin,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StrategyOrigin {
    #[default]
    Model,
    Fallback,
}

impl SearchStrategy {
    /// Strategy built locally from question keywords.
    pub fn fallback(key_terms: Vec<String>) -> Self {
        Self {
            key_terms,
            relevance_criteria: String::new(),
            search_query: None,
            origin: StrategyOrigin::Fallback,
        }
    }

    /// True when there is nothing to search for.
    pub fn is_empty(&self) -> bool {
        self.alternatives().is_empty()
    }

    /// Key terms, or the precomposed query when the model gave no terms.
    fn terms(&self) -> impl Iterator<Item = &str> {
        let terms: Vec<&str> = if self.key_terms.iter().any(|t| !t.trim().is_empty()) {
            self.key_terms.iter().map(String::as_str).collect()
        } else {
            self.search_query.as_deref().into_iter().collect()
        };
        terms.into_iter().map(str::trim).filter(|t| !t.is_empty())
    }

    /// Search alternatives, one per term; a message matching any of them is a hit.
    ///
    /// Each alternative is a separate engine query in which every word must match.
    /// Multi-word terms are quoted so they match as an exact phrase. A term written as
    /// `a OR b` is split, since the engine would otherwise look for the word "or".
    pub fn alternatives(&self) -> Vec<String> {
        let mut alternatives: Vec<String> = Vec::new();
        for part in self.terms().flat_map(|term| term.split(" OR ")) {
            let words: Vec<&str> = part
                .split(|c: char| c == '"' || c.is_whitespace())
                .filter(|w| !w.is_empty())
                .collect();
            let alternative = match words.as_slice() {
                [] => continue,
                [word] => word.to_string(),
                phrase => format!("\"{}\"", phrase.join(" ")),
            };
            if !alternatives.iter().any(|a| a.eq_ignore_ascii_case(&alternative)) {
                alternatives.push(alternative);
            }
        }
        alternatives
    }
}

/// The completion model's output could not be turned into a strategy
#[derive(Debug, thiserror::Error)]
pub enum StrategyParseError {
    #[error("no JSON object found in model output")]
    MissingObject,
    #[error("model output is not well-formed JSON: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("model output has an unexpected shape: {0}")]
    InvalidShape(#[source] serde_json::Error),
}
