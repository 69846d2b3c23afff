// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Turns a free-text question into a [`SearchStrategy`].
//!
//! The completion model is asked for a bare JSON object, but its output is never
//! trusted. [`normalize_model_output`] applies a fixed list of rewrites before parsing:
//!
//! 1. trim surrounding whitespace;
//! 2. remove triple-backtick fences (with an optional language tag right after the
//!    opening fence), then single backticks, then `\n`, `\r` and `\t`;
//! 3. keep the span from the first `{` to the last `}`.
//!
//! The span is then parsed as a generic JSON object before typed decoding. Any failure,
//! including a model error or an empty strategy, falls back to keywords taken directly
//! from the question.

use crate::models::lexicon::Lexicon;
use crate::models::strategy::{SearchStrategy, StrategyParseError};
use crate::services::completion::CompletionModel;
use crate::services::retry::RetryPolicy;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const FENCE: &str = "```";

/// Shortest keyword kept by the fallback
const MIN_KEYWORD_CHARS: usize = 2;

pub struct QueryPlanner {
    model: Arc<dyn CompletionModel>,
    lexicon: Arc<Lexicon>,
    retry: RetryPolicy,
}

impl QueryPlanner {
    pub fn new(model: Arc<dyn CompletionModel>, lexicon: Arc<Lexicon>) -> Self {
        Self {
            model,
            lexicon,
            retry: RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::ZERO,
                attempt_timeout: Duration::from_secs(30),
            },
        }
    }

    /// Retry policy for completion calls; a single attempt by default.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Never fails: problems with the model degrade to the keyword fallback.
    pub async fn plan(&self, question: &str) -> SearchStrategy {
        let prompt = build_prompt(question);
        let model = &self.model;
        let prompt = prompt.as_str();

        let raw = match self
            .retry
            .execute("complete", move || model.complete(prompt))
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Completion failed, using keyword fallback");
                return self.fallback_strategy(question);
            }
        };

        match parse_strategy(&raw) {
            Ok(strategy) if !strategy.is_empty() => {
                info!(
                    key_terms = ?strategy.key_terms,
                    alternatives = ?strategy.alternatives(),
                    "Planned search strategy"
                );
                strategy
            }
            Ok(_) => {
                warn!("Model returned an empty strategy, using keyword fallback");
                self.fallback_strategy(question)
            }
            Err(e) => {
                warn!(
                    error = %e,
                    raw_chars = raw.len(),
                    "Unusable model output, using keyword fallback"
                );
                debug!(raw = %raw, "Raw model output");
                self.fallback_strategy(question)
            }
        }
    }

    /// Question tokens minus stop words, in order of first appearance.
    pub fn fallback_strategy(&self, question: &str) -> SearchStrategy {
        let mut terms: Vec<String> = Vec::new();
        for token in question
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
        {
            if token.chars().count() < MIN_KEYWORD_CHARS || self.lexicon.is_stop_word(&token) {
                continue;
            }
            if !terms.contains(&token) {
                terms.push(token);
            }
        }
        debug!(key_terms = ?terms, "Fallback strategy");
        SearchStrategy::fallback(terms)
    }
}

pub fn build_prompt(question: &str) -> String {
    format!(
        "You help search a group chat history. Analyze the question below and decide \
which words people would have used when discussing it.\n\
\n\
Question: {question}\n\
\n\
Respond with ONLY a single raw JSON object and nothing else. Do not use markdown, \
code fences, code blocks, backticks or any text before or after the object.\n\
The object has these fields:\n\
- \"key_terms\": array of the most important search terms, most important first; \
multi-word phrases are allowed\n\
- \"relevance_criteria\": one sentence describing what makes a message relevant\n\
- \"search_query\": optional single search string\n\
\n\
Example: {{\"key_terms\":[\"localstack\",\"aws\"],\"relevance_criteria\":\"Messages about \
testing AWS services locally\"}}"
    )
}

/// Removes fences (and a language tag right after an opening fence), backticks and
/// control whitespace, then slices from the first `{` to the last `}`.
pub fn normalize_model_output(raw: &str) -> Result<String, StrategyParseError> {
    let mut cleaned = String::with_capacity(raw.len());
    let mut rest = raw.trim();

    while let Some(pos) = rest.find(FENCE) {
        cleaned.push_str(&rest[..pos]);
        // Language tag directly after the fence, e.g. ```json
        rest = rest[pos + FENCE.len()..]
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric());
    }
    cleaned.push_str(rest);
    cleaned.retain(|c| !matches!(c, '`' | '\n' | '\r' | '\t'));

    let start = cleaned.find('{');
    let end = cleaned.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if start < end => Ok(cleaned[start..=end].to_string()),
        _ => Err(StrategyParseError::MissingObject),
    }
}

/// Normalizes, checks well-formedness as a generic object, then decodes.
pub fn parse_strategy(raw: &str) -> Result<SearchStrategy, StrategyParseError> {
    let json = normalize_model_output(raw)?;
    let object: Map<String, Value> =
        serde_json::from_str(&json).map_err(StrategyParseError::Malformed)?;
    serde_json::from_value(Value::Object(object)).map_err(StrategyParseError::InvalidShape)
}
