// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Application state, route handlers, and router construction.
//!
//! This module is `pub` so that integration tests can build a test router directly
//! without starting the full binary.

use crate::models::api::{
    AskRequest, AskResponse, BackfillRequest, BackfillResponse, BackfillStatusResponse,
    IngestRequest, IngestResponse,
};
use crate::models::conversation::GENERIC_FAILURE_TEXT;
use crate::models::message::{Message, MessageKey, Question};
use crate::models::search::{IndexStatsResponse, MessageView, SearchRequest, SearchResponse};
use crate::models::version::VersionResponse;
use crate::services::backfill::{BackfillHandle, BackfillRegistry};
use crate::services::db::MessageStore;
use crate::services::ingest::{IngestOutcome, Ingestor};
use crate::services::outbound::{deliver, deliver_answer, Outbound};
use crate::services::pipeline::{AnswerPipeline, PipelineError};
use crate::services::retriever::RetrieveError;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use uuid::Uuid;

/// Application version extracted from `Cargo.toml` at compile time.
/// The patch segment can be overridden via `RECALL_PATCH_VERSION` (see `build.rs`).
pub const VERSION: &str = env!("RECALL_VERSION");

pub const AGENT_NAME: &str = "recall-agent";

/// Results returned by `/search` when the request does not set a limit
const DEFAULT_SEARCH_LIMIT: u32 = 20;

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// Shared application state injected into every route handler via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MessageStore>,
    pub ingestor: Arc<Ingestor>,
    pub pipeline: Arc<AnswerPipeline>,
    pub backfills: Arc<BackfillRegistry>,
    /// Delivery back to chats; answers are only returned over HTTP when absent
    pub outbound: Option<Arc<dyn Outbound>>,
}

/// Logs the error and maps it to a 500 response.
fn internal<E: std::fmt::Display>(
    context: &'static str,
) -> impl FnOnce(E) -> (StatusCode, String) {
    move |e| {
        error!(error = %e, "{context}");
        (StatusCode::INTERNAL_SERVER_ERROR, format!("{context}: {e}"))
    }
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

pub async fn version_handler() -> Json<VersionResponse> {
    Json(VersionResponse {
        agent: AGENT_NAME.to_string(),
        version: VERSION.to_string(),
    })
}

pub async fn ingest_handler(
    State(state): State<AppState>,
    Json(payload): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, String)> {
    let created_at = Utc
        .timestamp_opt(payload.created_at, 0)
        .single()
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                format!("Invalid created_at: {}", payload.created_at),
            )
        })?;

    let message = Message {
        group_id: payload.group_id,
        message_id: payload.message_id,
        author_id: payload.author_id,
        author_handle: payload.author_handle,
        text: payload.text,
        created_at,
    };

    state
        .store
        .store(&message)
        .await
        .map_err(internal("Failed to store message"))?;

    let outcome = state
        .ingestor
        .ingest(&message)
        .await
        .map_err(internal("Failed to index message"))?;

    Ok(Json(IngestResponse {
        success: true,
        indexed: outcome == IngestOutcome::Indexed,
        document_uid: message.key().document_uid(),
    }))
}

pub async fn get_message_handler(
    State(state): State<AppState>,
    Path((group_id, message_id)): Path<(i64, i64)>,
) -> Result<Json<MessageView>, (StatusCode, String)> {
    let key = MessageKey::new(group_id, message_id);
    let message = state
        .ingestor
        .fetch(key)
        .await
        .map_err(internal("Failed to fetch message"))?
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Message {key} is not indexed")))?;

    Ok(Json(MessageView::from(&message)))
}

pub async fn stats_handler(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
) -> Result<Json<IndexStatsResponse>, (StatusCode, String)> {
    let documents = state
        .ingestor
        .document_count(group_id)
        .await
        .map_err(internal("Failed to read index stats"))?;

    Ok(Json(IndexStatsResponse {
        group_id,
        index_uid: state.ingestor.indexes().handle(group_id).uid,
        documents,
    }))
}

pub async fn search_handler(
    State(state): State<AppState>,
    Json(payload): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, (StatusCode, String)> {
    if payload.query.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "Search query cannot be empty".to_string(),
        ));
    }

    let limit = payload.limit.unwrap_or(DEFAULT_SEARCH_LIMIT) as usize;
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let messages = state
        .pipeline
        .retriever()
        .keyword_search(payload.group_id, payload.query.trim(), limit, &cancel)
        .await
        .map_err(|e| match e {
            RetrieveError::Cancelled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Search cancelled".to_string(),
            ),
            other => internal("Search error")(other),
        })?;

    let results: Vec<MessageView> = messages.iter().map(MessageView::from).collect();
    let total = results.len();
    Ok(Json(SearchResponse { results, total }))
}

fn failure_status(e: &PipelineError) -> StatusCode {
    match e {
        PipelineError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
        PipelineError::Engine(_) | PipelineError::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

pub async fn ask_handler(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, String)> {
    let question = Question {
        group_id: payload.group_id,
        text: payload.question,
        reply_chat_id: payload.reply_chat_id,
        is_admin: payload.is_admin,
    };
    // Dropping the request future cancels the run
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outbound = state.outbound.as_deref().zip(question.reply_chat_id);

    let answer = match state.pipeline.answer(&question, &cancel).await {
        Ok(answer) => answer,
        Err(e) => {
            error!(group_id = question.group_id, error = %e, "Failed to answer question");
            if let Some((outbound, chat_id)) = outbound {
                if let Err(send_err) = deliver(outbound, chat_id, e.user_message(), &[]).await {
                    warn!(chat_id, error = %send_err, "Failed to deliver failure notice");
                }
            }
            return Err((failure_status(&e), GENERIC_FAILURE_TEXT.to_string()));
        }
    };

    let mut delivered = false;
    if let Some((outbound, chat_id)) = outbound {
        match deliver_answer(outbound, chat_id, &answer).await {
            Ok(()) => delivered = true,
            Err(e) => warn!(chat_id, error = %e, "Failed to deliver answer"),
        }
    }

    Ok(Json(AskResponse {
        kind: answer.kind,
        text: answer.text,
        links: answer.links,
        delivered,
    }))
}

fn status_response(handle: &BackfillHandle) -> BackfillStatusResponse {
    BackfillStatusResponse {
        task_id: handle.id().to_string(),
        group_id: handle.group_id(),
        status: handle.status(),
    }
}

fn parse_task_id(raw: &str) -> Result<Uuid, (StatusCode, String)> {
    Uuid::parse_str(raw).map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid task id: {e}")))
}

pub async fn start_backfill_handler(
    State(state): State<AppState>,
    Path(group_id): Path<i64>,
    Json(payload): Json<BackfillRequest>,
) -> Json<BackfillResponse> {
    let handle = state
        .backfills
        .start(group_id, payload.limit, payload.reply_chat_id)
        .await;

    Json(BackfillResponse {
        task_id: handle.id().to_string(),
    })
}

pub async fn backfill_status_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<BackfillStatusResponse>, (StatusCode, String)> {
    let id = parse_task_id(&task_id)?;
    let handle = state
        .backfills
        .get(id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown backfill task {id}")))?;

    Ok(Json(status_response(&handle)))
}

pub async fn cancel_backfill_handler(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<BackfillStatusResponse>, (StatusCode, String)> {
    let id = parse_task_id(&task_id)?;
    let handle = state
        .backfills
        .cancel(id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("Unknown backfill task {id}")))?;

    Ok(Json(status_response(&handle)))
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the Axum application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/version", get(version_handler))
        .route("/messages", post(ingest_handler))
        .route(
            "/groups/{group_id}/messages/{message_id}",
            get(get_message_handler),
        )
        .route("/groups/{group_id}/stats", get(stats_handler))
        .route("/groups/{group_id}/backfill", post(start_backfill_handler))
        .route(
            "/backfill/{task_id}",
            get(backfill_status_handler).delete(cancel_backfill_handler),
        )
        .route("/search", post(search_handler))
        .route("/ask", post(ask_handler))
        .with_state(state)
}
