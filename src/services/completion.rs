// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Completion-model boundary: prompt in, text out. No structure is trusted from the
//! model; callers validate whatever comes back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::time::Duration;
use tokio::time::error::Elapsed;
use tracing::debug;

use crate::services::retry::parse_env;

#[async_trait]
pub trait CompletionModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("completion service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("completion response has no message content")]
    EmptyResponse,
    #[error("completion request timed out")]
    Timeout(#[from] Elapsed),
}

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub temperature: f32,
}

impl CompletionConfig {
    /// Reads `LLM_BASE_URL`, `LLM_MODEL`, `LLM_API_KEY` and `LLM_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let base_url =
            env::var("LLM_BASE_URL").unwrap_or_else(|_| "http://localhost:1234/v1".to_string());
        let model = env::var("LLM_MODEL").unwrap_or_else(|_| "gemini-1.5-flash".to_string());
        let api_key = env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty());
        let timeout = parse_env("LLM_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Ok(Self {
            base_url,
            model,
            api_key,
            timeout,
            temperature: 0.2,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Client for an OpenAI-compatible `/v1/chat/completions` endpoint
pub struct ChatCompletionClient {
    client: reqwest::Client,
    config: CompletionConfig,
}

impl ChatCompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Resolve the chat completions endpoint from the base URL.
    fn endpoint(&self) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }
}

/// `choices[0].message.content`, if present and non-null.
fn extract_content(response: &Value) -> Option<String> {
    response["choices"]
        .get(0)
        .and_then(|c| c["message"]["content"].as_str())
        .map(str::to_string)
}

#[async_trait]
impl CompletionModel for ChatCompletionClient {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError> {
        let body = serde_json::json!({
            "model": self.config.model,
            "messages": [ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            "temperature": self.config.temperature,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let json: Value = resp.json().await?;
        let content = extract_content(&json).ok_or(CompletionError::EmptyResponse)?;
        debug!(chars = content.len(), "Completion received");
        Ok(content)
    }
}
