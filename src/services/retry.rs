// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Bounded retry with linear backoff and a per-attempt timeout, wrapped around every
//! call to an external engine.

use anyhow::{Context, Result};
use std::env;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{error::Elapsed, sleep, timeout};
use tracing::{debug, warn};

/// Default number of attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before attempt `n + 1` is `base_delay * n`
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(500),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Reads `RETRY_ATTEMPTS`, `RETRY_BASE_DELAY_MS` and `ENGINE_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            max_attempts: parse_env("RETRY_ATTEMPTS")?.unwrap_or(defaults.max_attempts),
            base_delay: parse_env("RETRY_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            attempt_timeout: parse_env("ENGINE_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.attempt_timeout),
        })
    }

    /// Runs `f` until it succeeds or `max_attempts` is exhausted, returning the last error.
    ///
    /// Each attempt is bounded by `attempt_timeout`; a timed-out attempt counts as a failure.
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        E: Display + From<Elapsed>,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let outcome = match timeout(self.attempt_timeout, f()).await {
                Ok(result) => result,
                Err(elapsed) => Err(E::from(elapsed)),
            };

            match outcome {
                Ok(value) => {
                    debug!(operation, attempt, "Operation succeeded");
                    return Ok(value);
                }
                Err(e) if attempt >= attempts => {
                    warn!(operation, attempt, error = %e, "Operation failed, giving up");
                    return Err(e);
                }
                Err(e) => {
                    warn!(operation, attempt, error = %e, "Operation failed, retrying");
                    sleep(self.base_delay * attempt).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Parses an optional numeric environment variable.
pub(crate) fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .with_context(|| format!("{name} must be a valid number, got '{raw}'")),
        Err(_) => Ok(None),
    }
}
