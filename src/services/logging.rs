// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Tracing setup and helpers that keep chat content out of the logs.

use tracing_subscriber::EnvFilter;

/// Characters of message text kept in log previews
const PREVIEW_CHARS: usize = 24;

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_level`.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Mask an author handle for logging.
/// Shows the first character only: "a***"
pub fn mask_handle(handle: &str) -> String {
    match handle.trim_start_matches('@').chars().next() {
        Some(first) => format!("{first}***"),
        None => "***".to_string(),
    }
}

/// Short, single-line preview of message text: "localstack helps test AW…"
pub fn preview(text: &str) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if flat.chars().count() <= PREVIEW_CHARS {
        return flat;
    }
    let mut cut: String = flat.chars().take(PREVIEW_CHARS).collect();
    cut.push('…');
    cut
}
