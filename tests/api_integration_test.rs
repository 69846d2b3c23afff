// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use recall_agent::app::{create_router, AppState};
use recall_agent::models::api::{
    AskResponse, BackfillResponse, BackfillStatus, BackfillStatusResponse, IngestResponse,
};
use recall_agent::models::conversation::{AnswerKind, LinkSpan, MISSING_CAPABILITY_TEXT};
use recall_agent::models::lexicon::Lexicon;
use recall_agent::models::search::{IndexStatsResponse, MessageView, SearchResponse};
use recall_agent::services::backfill::BackfillRegistry;
use recall_agent::services::completion::{CompletionError, CompletionModel};
use recall_agent::services::db::{MemoryMessageStore, MessageStore};
use recall_agent::services::engine::MemoryEngine;
use recall_agent::services::grouper::ConversationGrouper;
use recall_agent::services::index_manager::IndexManager;
use recall_agent::services::ingest::Ingestor;
use recall_agent::services::outbound::{Outbound, OutboundError};
use recall_agent::services::pipeline::{AnswerPipeline, PipelineConfig};
use recall_agent::services::planner::QueryPlanner;
use recall_agent::services::render::ResponseAssembler;
use recall_agent::services::retriever::{Retriever, RetrieverConfig};
use recall_agent::services::retry::RetryPolicy;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

// HTTP surface over in-memory engine, store and outbound transport.
// Run with: cargo test --test api_integration_test

const GROUP: i64 = -4_200_555;

struct Scripted;

#[async_trait]
impl CompletionModel for Scripted {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        Ok(r#"```json
{"key_terms": ["kubernetes"], "relevance_criteria": "Talk about Kubernetes upgrades"}
```"#
            .to_string())
    }
}

#[derive(Default)]
struct Inbox {
    sent: Mutex<Vec<(i64, String, Vec<LinkSpan>)>>,
}

#[async_trait]
impl Outbound for Inbox {
    async fn send(
        &self,
        chat_id: i64,
        text: &str,
        links: &[LinkSpan],
    ) -> Result<(), OutboundError> {
        self.sent
            .lock()
            .unwrap()
            .push((chat_id, text.to_string(), links.to_vec()));
        Ok(())
    }
}

fn create_test_app(inbox: Arc<Inbox>) -> Router {
    let lexicon = Arc::new(Lexicon::builtin().unwrap());
    let indexes = Arc::new(IndexManager::new(
        Arc::new(MemoryEngine::new()),
        RetryPolicy::default(),
        "messages",
    ));
    let store: Arc<dyn MessageStore> = Arc::new(MemoryMessageStore::new());
    let ingestor = Arc::new(Ingestor::new(indexes.clone()));
    let outbound: Option<Arc<dyn Outbound>> = Some(inbox);

    let pipeline = AnswerPipeline::new(
        QueryPlanner::new(Arc::new(Scripted), lexicon.clone()),
        Retriever::new(indexes, RetrieverConfig::default()),
        ConversationGrouper::new(lexicon, Duration::from_secs(120)),
        ResponseAssembler::default(),
        PipelineConfig::default(),
    );
    let backfills = BackfillRegistry::new(store.clone(), ingestor.clone(), outbound.clone());

    create_router(AppState {
        store,
        ingestor,
        pipeline: Arc::new(pipeline),
        backfills: Arc::new(backfills),
        outbound,
    })
}

async fn call(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

async fn call_json<T: DeserializeOwned>(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> T {
    let (status, bytes) = call(app, method, uri, body).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&bytes));
    serde_json::from_slice(&bytes).unwrap()
}

async fn post_message(
    app: &Router,
    id: i64,
    handle: &str,
    text: &str,
    at: i64,
) -> IngestResponse {
    call_json(
        app,
        "POST",
        "/messages",
        Some(json!({
            "group_id": GROUP,
            "message_id": id,
            "author_id": id,
            "author_handle": handle,
            "text": text,
            "created_at": 1_700_000_000 + at,
        })),
    )
    .await
}

#[tokio::test]
async fn test_ingest_fetch_and_stats() {
    let app = create_test_app(Arc::new(Inbox::default()));

    let indexed = post_message(&app, 1, "ann", "kubernetes upgrade tonight", 0).await;
    assert!(indexed.success && indexed.indexed);
    assert_eq!(indexed.document_uid, format!("{GROUP}-1"));

    let media = post_message(&app, 2, "ben", "", 10).await;
    assert!(media.success);
    assert!(!media.indexed);

    let view: MessageView =
        call_json(&app, "GET", &format!("/groups/{GROUP}/messages/1"), None).await;
    assert_eq!(view.text, "kubernetes upgrade tonight");

    let (status, _) = call(&app, "GET", &format!("/groups/{GROUP}/messages/2"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let stats: IndexStatsResponse =
        call_json(&app, "GET", &format!("/groups/{GROUP}/stats"), None).await;
    assert_eq!(stats.documents, 1);
    assert_eq!(stats.index_uid, format!("messages_{GROUP}"));
}

#[tokio::test]
async fn test_search_is_newest_first() {
    let app = create_test_app(Arc::new(Inbox::default()));
    post_message(&app, 1, "ann", "kubernetes 1.29 is out", 0).await;
    post_message(&app, 2, "ben", "kubernetes upgrade broke ingress", 500).await;
    post_message(&app, 3, "cat", "pizza", 600).await;

    let response: SearchResponse = call_json(
        &app,
        "POST",
        "/search",
        Some(json!({"group_id": GROUP, "query": "kubernetes"})),
    )
    .await;
    let ids: Vec<i64> = response.results.iter().map(|m| m.message_id).collect();
    assert_eq!(ids, vec![2, 1]);
    assert_eq!(response.total, 2);
}

#[tokio::test]
async fn test_ask_answers_and_delivers() {
    let inbox = Arc::new(Inbox::default());
    let app = create_test_app(inbox.clone());
    post_message(&app, 1, "ann", "kubernetes upgrade went fine", 0).await;
    post_message(&app, 2, "ben", "nice", 20).await;

    let answer: AskResponse = call_json(
        &app,
        "POST",
        "/ask",
        Some(json!({
            "group_id": GROUP,
            "question": "how did the kubernetes upgrade go?",
            "reply_chat_id": GROUP,
            "is_admin": true,
        })),
    )
    .await;

    assert_eq!(answer.kind, AnswerKind::Found);
    assert!(answer.delivered);
    assert!(answer.text.starts_with("Talk about Kubernetes upgrades"));
    assert_eq!(answer.links.len(), 2);
    assert_eq!(answer.links[0].url, "https://t.me/c/4200555/1");

    let sent = inbox.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, GROUP);
    assert_eq!(sent[0].1, answer.text);
    assert_eq!(sent[0].2, answer.links);
}

#[tokio::test]
async fn test_ask_without_admin_access() {
    let app = create_test_app(Arc::new(Inbox::default()));
    let answer: AskResponse = call_json(
        &app,
        "POST",
        "/ask",
        Some(json!({"group_id": GROUP, "question": "kubernetes?"})),
    )
    .await;

    assert_eq!(answer.kind, AnswerKind::MissingCapability);
    assert_eq!(answer.text, MISSING_CAPABILITY_TEXT);
    assert!(!answer.delivered);
}

#[tokio::test]
async fn test_backfill_lifecycle() {
    let inbox = Arc::new(Inbox::default());
    let app = create_test_app(inbox.clone());
    post_message(&app, 1, "ann", "first", 0).await;
    post_message(&app, 2, "ben", "second", 10).await;

    let started: BackfillResponse = call_json(
        &app,
        "POST",
        &format!("/groups/{GROUP}/backfill"),
        Some(json!({"reply_chat_id": GROUP})),
    )
    .await;

    let mut status = BackfillStatus::Running { indexed: 0 };
    for _ in 0..100 {
        let polled: BackfillStatusResponse =
            call_json(&app, "GET", &format!("/backfill/{}", started.task_id), None).await;
        assert_eq!(polled.group_id, GROUP);
        status = polled.status;
        if status.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, BackfillStatus::Completed { indexed: 2 });

    let sent = inbox.sent.lock().unwrap();
    assert_eq!(
        sent.last().map(|s| s.1.as_str()),
        Some("✅ Successfully indexed 2 text messages from the chat history.")
    );
}

#[tokio::test]
async fn test_unknown_backfill_task() {
    let app = create_test_app(Arc::new(Inbox::default()));
    let unknown = uuid::Uuid::now_v7();
    let (status, _) = call(&app, "GET", &format!("/backfill/{unknown}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "DELETE", &format!("/backfill/{unknown}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
