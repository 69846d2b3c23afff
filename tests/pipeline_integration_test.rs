// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use recall_agent::models::conversation::{AnswerKind, GENERIC_FAILURE_TEXT, NO_RESULTS_TEXT};
use recall_agent::models::lexicon::Lexicon;
use recall_agent::models::message::{Message, MessageKey, Question};
use recall_agent::services::completion::{CompletionError, CompletionModel};
use recall_agent::services::engine::MemoryEngine;
use recall_agent::services::grouper::ConversationGrouper;
use recall_agent::services::index_manager::IndexManager;
use recall_agent::services::ingest::{IngestOutcome, Ingestor};
use recall_agent::services::pipeline::{AnswerPipeline, PipelineConfig, PipelineError};
use recall_agent::services::planner::QueryPlanner;
use recall_agent::services::render::ResponseAssembler;
use recall_agent::services::retriever::{Retriever, RetrieverConfig};
use recall_agent::services::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

// End-to-end runs of the question pipeline over the in-memory engine.
// Run with: cargo test --test pipeline_integration_test

const SUPERGROUP: i64 = -1_001_234_567_890;
const LEGACY_GROUP: i64 = -1_234_567_890;

/// Completion model that always answers with the same text.
struct Scripted(&'static str);

#[async_trait]
impl CompletionModel for Scripted {
    async fn complete(&self, _prompt: &str) -> Result<String, CompletionError> {
        Ok(self.0.to_string())
    }
}

struct Harness {
    engine: Arc<MemoryEngine>,
    ingestor: Ingestor,
    pipeline: AnswerPipeline,
}

fn harness(model_output: &'static str) -> Harness {
    let engine = Arc::new(MemoryEngine::new());
    let retry = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        attempt_timeout: Duration::from_secs(1),
    };
    let indexes = Arc::new(IndexManager::new(engine.clone(), retry, "messages"));
    let lexicon = Arc::new(Lexicon::builtin().unwrap());

    let pipeline = AnswerPipeline::new(
        QueryPlanner::new(Arc::new(Scripted(model_output)), lexicon.clone()),
        Retriever::new(indexes.clone(), RetrieverConfig::default()),
        ConversationGrouper::new(lexicon, Duration::from_secs(120)),
        ResponseAssembler::default(),
        PipelineConfig::default(),
    );

    Harness {
        engine,
        ingestor: Ingestor::new(indexes),
        pipeline,
    }
}

fn message(group_id: i64, id: i64, handle: &str, text: &str, at: i64) -> Message {
    Message {
        group_id,
        message_id: id,
        author_id: id,
        author_handle: handle.to_string(),
        text: text.to_string(),
        created_at: Utc.timestamp_opt(1_700_000_000 + at, 0).unwrap(),
    }
}

fn question(group_id: i64, text: &str) -> Question {
    Question {
        group_id,
        text: text.to_string(),
        reply_chat_id: None,
        is_admin: true,
    }
}

const AWS_STRATEGY: &str = r#"{"key_terms":["localstack","aws"],
"relevance_criteria":"Messages about testing AWS services locally"}"#;

#[tokio::test]
async fn test_ingest_is_idempotent() {
    let h = harness(AWS_STRATEGY);
    let original = message(-10, 1, "ann", "first draft", 0);
    let edited = message(-10, 1, "ann", "edited text", 0);

    h.ingestor.ingest(&original).await.unwrap();
    h.ingestor.ingest(&original).await.unwrap();
    h.ingestor.ingest(&edited).await.unwrap();

    assert_eq!(h.ingestor.document_count(-10).await.unwrap(), 1);
    let stored = h
        .ingestor
        .fetch(MessageKey::new(-10, 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, edited);
}

#[tokio::test]
async fn test_media_only_message_is_not_indexed() {
    let h = harness(AWS_STRATEGY);
    let outcome = h
        .ingestor
        .ingest(&message(-10, 1, "ann", "", 0))
        .await
        .unwrap();
    assert_eq!(outcome, IngestOutcome::Skipped);
    assert_eq!(h.ingestor.document_count(-10).await.unwrap(), 0);
}

#[tokio::test]
async fn test_question_about_aws_returns_one_linked_conversation() {
    let h = harness(AWS_STRATEGY);
    let history = [
        message(SUPERGROUP, 101, "ann", "has anyone tested AWS locally?", 0),
        message(SUPERGROUP, 102, "ben", "localstack works great for that", 15),
        message(SUPERGROUP, 103, "cat", "I use it for S3 and SQS", 30),
        message(SUPERGROUP, 104, "dan", "lunch at noon", 3600),
    ];
    for m in &history {
        h.ingestor.ingest(m).await.unwrap();
    }

    let answer = h
        .pipeline
        .answer(
            &question(SUPERGROUP, "has anyone tested AWS locally"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(answer.kind, AnswerKind::Found);
    assert!(answer
        .text
        .starts_with("Messages about testing AWS services locally"));
    assert!(answer.text.contains("1. @ann: has anyone tested AWS locally?\n"));
    assert!(answer.text.contains("\n@ben: localstack works great for that\n"));
    assert!(answer.text.contains("\n@cat: I use it for S3 and SQS\n"));
    assert!(!answer.text.contains("2. "));
    assert!(!answer.text.contains("lunch"));

    let urls: Vec<&str> = answer.links.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://t.me/c/1234567890/101",
            "https://t.me/c/1234567890/102",
            "https://t.me/c/1234567890/103",
        ]
    );
    for link in &answer.links {
        let covered = &answer.text[link.offset..link.offset + link.length];
        assert!(covered.starts_with('@'), "span covers {covered:?}");
        assert!(!covered.contains('\n'));
    }
}

#[tokio::test]
async fn test_localstack_thread_without_model_help() {
    let h = harness("model is offline");
    h.ingestor
        .ingest(&message(-77, 1, "ann", "localstack helps test AWS locally", 0))
        .await
        .unwrap();
    h.ingestor
        .ingest(&message(-77, 2, "ben", "yes I used it for S3 mocking", 15))
        .await
        .unwrap();

    let answer = h
        .pipeline
        .answer(
            &question(-77, "has anyone tested AWS locally"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(answer.kind, AnswerKind::Found);
    assert!(answer.text.contains(
        "1. @ann: localstack helps test AWS locally\n@ben: yes I used it for S3 mocking\n"
    ));
    assert_eq!(answer.links.len(), 2);
    assert_eq!(answer.links[0].url, "https://t.me/c/77/1");
    assert_eq!(answer.links[1].url, "https://t.me/c/77/2");
    assert_eq!(
        &answer.text[answer.links[1].offset..answer.links[1].offset + answer.links[1].length],
        "@ben: yes I used it for S3 mocking"
    );
}

#[tokio::test]
async fn test_pre_migration_history_is_merged() {
    let h = harness(AWS_STRATEGY);
    h.ingestor
        .ingest(&message(LEGACY_GROUP, 5, "old", "we mocked aws with localstack", 0))
        .await
        .unwrap();
    h.ingestor
        .ingest(&message(SUPERGROUP, 6, "new", "localstack again", 86_400))
        .await
        .unwrap();

    let answer = h
        .pipeline
        .answer(&question(SUPERGROUP, "aws locally"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(answer.kind, AnswerKind::Found);
    let urls: Vec<&str> = answer.links.iter().map(|l| l.url.as_str()).collect();
    assert_eq!(
        urls,
        vec![
            "https://t.me/c/1234567890/5",
            "https://t.me/c/1234567890/6"
        ]
    );
}

#[tokio::test]
async fn test_malformed_model_output_falls_back_to_keywords() {
    let h = harness("Sure! I would search for localstack.");
    h.ingestor
        .ingest(&message(-20, 1, "ann", "terraform state got corrupted", 0))
        .await
        .unwrap();

    let answer = h
        .pipeline
        .answer(
            &question(-20, "what happened to terraform?"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(answer.kind, AnswerKind::Found);
    assert!(answer
        .text
        .starts_with("Found some messages that might be relevant to your question."));
    assert!(answer.text.contains("1. @ann: terraform state got corrupted"));
}

#[tokio::test]
async fn test_unknown_group_has_no_results() {
    let h = harness(AWS_STRATEGY);
    let answer = h
        .pipeline
        .answer(&question(-999, "aws"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer.kind, AnswerKind::NoResults);
    assert_eq!(answer.text, NO_RESULTS_TEXT);
    assert!(answer.links.is_empty());
}

#[tokio::test]
async fn test_engine_outage_is_a_generic_failure() {
    let h = harness(AWS_STRATEGY);
    h.ingestor
        .ingest(&message(-30, 1, "ann", "aws bill", 0))
        .await
        .unwrap();
    h.engine.fail_next(100);

    let err = h
        .pipeline
        .answer(&question(-30, "aws"), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Engine(_)));
    assert_eq!(err.user_message(), GENERIC_FAILURE_TEXT);
}

#[tokio::test]
async fn test_transient_engine_failure_is_retried() {
    let h = harness(AWS_STRATEGY);
    h.ingestor
        .ingest(&message(-40, 1, "ann", "aws bill", 0))
        .await
        .unwrap();
    h.engine.fail_next(1);

    let answer = h
        .pipeline
        .answer(&question(-40, "aws"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(answer.kind, AnswerKind::Found);
}
