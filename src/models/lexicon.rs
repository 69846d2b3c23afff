// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Stop words and topic-affinity groups used by keyword extraction and conversation
//! grouping. The table is data: the built-in copy lives in `data/lexicon.toml` and a
//! deployment can point `--lexicon` at its own file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

const BUILTIN_LEXICON: &str = include_str!("../../data/lexicon.toml");

/// Members shorter than this only match exactly, never as a substring.
const MIN_SUBSTRING_LEN: usize = 4;

/// Terms that count as one topic. The `name` key in the file is informational.
#[derive(Debug, Clone, Deserialize)]
struct AffinityGroup {
    terms: Vec<String>,
}

impl AffinityGroup {
    fn matches(&self, term: &str) -> bool {
        self.terms.iter().any(|member| {
            term == member || (member.len() >= MIN_SUBSTRING_LEN && term.contains(member.as_str()))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LexiconFile {
    #[serde(default)]
    stop_words: Vec<String>,
    #[serde(default)]
    affinity: Vec<AffinityGroup>,
}

#[derive(Debug, Clone)]
pub struct Lexicon {
    stop_words: HashSet<String>,
    affinity: Vec<AffinityGroup>,
}

impl Lexicon {
    /// Lexicon compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_toml_str(BUILTIN_LEXICON).context("Built-in lexicon is invalid")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read lexicon file {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("Failed to parse lexicon file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: LexiconFile = toml::from_str(raw)?;
        Ok(Self {
            stop_words: file
                .stop_words
                .into_iter()
                .map(|w| w.to_lowercase())
                .collect(),
            affinity: file
                .affinity
                .into_iter()
                .map(|group| AffinityGroup {
                    terms: group.terms.into_iter().map(|t| t.to_lowercase()).collect(),
                })
                .collect(),
        })
    }

    pub fn is_stop_word(&self, word: &str) -> bool {
        self.stop_words.contains(&word.to_lowercase())
    }

    /// Both terms fall in the same affinity group. Terms are expected lower-cased.
    pub fn related(&self, a: &str, b: &str) -> bool {
        self.affinity
            .iter()
            .any(|group| group.matches(a) && group.matches(b))
    }
}
