// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use crate::models::conversation::{Answer, LinkSpan};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum OutboundError {
    #[error("outbound request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("outbound transport rejected the message with status {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("link span {offset}+{length} does not fit the message text")]
    InvalidSpan { offset: usize, length: usize },
}

/// Sends rendered text back to a chat.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// `links` carry byte offsets into `text`; implementations convert them to whatever
    /// unit their transport counts in.
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        links: &[LinkSpan],
    ) -> Result<(), OutboundError>;
}

/// Sends with clickable links first and retries as plain text if that fails.
pub async fn deliver(
    outbound: &dyn Outbound,
    chat_id: i64,
    text: &str,
    links: &[LinkSpan],
) -> Result<(), OutboundError> {
    if links.is_empty() {
        return outbound.send(chat_id, text, &[]).await;
    }

    match outbound.send(chat_id, text, links).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(chat_id, error = %e, "Send with links failed, retrying as plain text");
            outbound.send(chat_id, text, &[]).await
        }
    }
}

pub async fn deliver_answer(
    outbound: &dyn Outbound,
    chat_id: i64,
    answer: &Answer,
) -> Result<(), OutboundError> {
    deliver(outbound, chat_id, &answer.text, &answer.links).await
}

#[derive(Debug, Serialize)]
struct TextLinkEntity<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    offset: usize,
    length: usize,
    url: &'a str,
}

#[derive(Debug, Serialize)]
struct OutboundMessage<'a> {
    chat_id: i64,
    text: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    entities: Vec<TextLinkEntity<'a>>,
}

/// Posts messages as JSON to a webhook, with link offsets in UTF-16 code units.
pub struct WebhookOutbound {
    client: reqwest::Client,
    url: Url,
}

impl WebhookOutbound {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let url =
            Url::parse(url).with_context(|| format!("Invalid outbound webhook URL: {url}"))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, url })
    }

    /// `OUTBOUND_WEBHOOK_URL`, or `None` when delivery is not configured.
    pub fn from_env() -> Result<Option<Self>> {
        match std::env::var("OUTBOUND_WEBHOOK_URL") {
            Ok(url) if !url.trim().is_empty() => {
                Ok(Some(Self::new(url.trim(), Duration::from_secs(10))?))
            }
            _ => Ok(None),
        }
    }
}

fn entities<'a>(
    text: &str,
    links: &'a [LinkSpan],
) -> Result<Vec<TextLinkEntity<'a>>, OutboundError> {
    links
        .iter()
        .map(|link| {
            let span = link.to_utf16(text).ok_or(OutboundError::InvalidSpan {
                offset: link.offset,
                length: link.length,
            })?;
            Ok(TextLinkEntity {
                kind: "text_link",
                offset: span.offset,
                length: span.length,
                url: &link.url,
            })
        })
        .collect()
}

#[async_trait]
impl Outbound for WebhookOutbound {
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        links: &[LinkSpan],
    ) -> Result<(), OutboundError> {
        let body = OutboundMessage {
            chat_id,
            text,
            entities: entities(text, links)?,
        };

        let resp = self.client.post(self.url.clone()).json(&body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(OutboundError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        info!(chat_id, links = links.len(), "Message delivered");
        Ok(())
    }
}
