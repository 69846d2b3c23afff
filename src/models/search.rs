// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use crate::models::message::{Message, MessageKey};
use chrono::DateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Document stored in a per-group Meilisearch index
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDocument {
    /// Primary key, `"{group_id}-{message_id}"`
    pub uid: String,
    pub message_id: i64,
    pub group_id: i64,
    pub author_id: i64,
    /// Searchable
    pub author_handle: String,
    /// Searchable
    pub text: String,
    /// Seconds since epoch; filterable and sortable
    pub created_at: i64,
}

impl From<&Message> for MessageDocument {
    fn from(message: &Message) -> Self {
        Self {
            uid: message.key().document_uid(),
            message_id: message.message_id,
            group_id: message.group_id,
            author_id: message.author_id,
            author_handle: message.author_handle.clone(),
            text: message.text.clone(),
            created_at: message.created_at.timestamp(),
        }
    }
}

impl MessageDocument {
    pub fn key(&self) -> MessageKey {
        MessageKey::new(self.group_id, self.message_id)
    }

    /// Decode a raw engine hit field by field so that a bad hit reports which field failed.
    pub fn decode(hit: Value) -> Result<Self, HitDecodeError> {
        let Value::Object(fields) = hit else {
            return Err(HitDecodeError::NotAnObject);
        };

        Ok(Self {
            uid: field(&fields, "uid")?,
            message_id: field(&fields, "message_id")?,
            group_id: field(&fields, "group_id")?,
            author_id: field(&fields, "author_id")?,
            author_handle: field(&fields, "author_handle")?,
            text: field(&fields, "text")?,
            created_at: field(&fields, "created_at")?,
        })
    }

    pub fn into_message(self) -> Result<Message, HitDecodeError> {
        let created_at = DateTime::from_timestamp(self.created_at, 0).ok_or(
            HitDecodeError::InvalidTimestamp {
                value: self.created_at,
            },
        )?;

        Ok(Message {
            group_id: self.group_id,
            message_id: self.message_id,
            author_id: self.author_id,
            author_handle: self.author_handle,
            text: self.text,
            created_at,
        })
    }
}

fn field<T: DeserializeOwned>(
    fields: &Map<String, Value>,
    name: &'static str,
) -> Result<T, HitDecodeError> {
    let value = fields
        .get(name)
        .ok_or(HitDecodeError::MissingField { field: name })?;

    serde_json::from_value(value.clone())
        .map_err(|source| HitDecodeError::InvalidField { field: name, source })
}

/// A search hit whose fields do not type-check as a [`MessageDocument`]
#[derive(Debug, thiserror::Error)]
pub enum HitDecodeError {
    #[error("hit is not a JSON object")]
    NotAnObject,
    #[error("hit is missing field `{field}`")]
    MissingField { field: &'static str },
    #[error("hit field `{field}` has the wrong type: {source}")]
    InvalidField {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("hit timestamp {value} is out of range")]
    InvalidTimestamp { value: i64 },
}

/// Request for a direct keyword search over one group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub group_id: i64,
    /// Search query string
    pub query: String,
    /// Maximum number of results to return (default: 20)
    pub limit: Option<u32>,
}

/// Message as returned over the HTTP API
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageView {
    pub group_id: i64,
    pub message_id: i64,
    pub author_id: i64,
    pub author_handle: String,
    pub text: String,
    /// Seconds since epoch
    pub created_at: i64,
}

impl From<&Message> for MessageView {
    fn from(message: &Message) -> Self {
        Self {
            group_id: message.group_id,
            message_id: message.message_id,
            author_id: message.author_id,
            author_handle: message.author_handle.clone(),
            text: message.text.clone(),
            created_at: message.created_at.timestamp(),
        }
    }
}

/// Search response, newest message first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<MessageView>,
    pub total: usize,
}

/// Number of documents indexed for a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStatsResponse {
    pub group_id: i64,
    pub index_uid: String,
    pub documents: usize,
}
