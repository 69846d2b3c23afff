// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Question in, rendered answer out: plan, retrieve, group, render.
//!
//! The whole run is bounded by one deadline and one cancellation token. When either
//! fires, in-flight engine calls are dropped and no partial answer is produced.

use crate::models::conversation::{Answer, GENERIC_FAILURE_TEXT};
use crate::models::message::Question;
use crate::services::engine::{EngineError, SortOrder};
use crate::services::grouper::ConversationGrouper;
use crate::services::planner::QueryPlanner;
use crate::services::render::ResponseAssembler;
use crate::services::retriever::{RetrieveError, Retriever};
use crate::services::retry::parse_env;
use anyhow::Result;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Deadline for answering one question
    pub ask_timeout: Duration,
    /// Largest gap between adjacent messages of one conversation, exclusive
    pub conversation_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ask_timeout: Duration::from_secs(30),
            conversation_timeout: Duration::from_secs(120),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            ask_timeout: parse_env("ASK_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.ask_timeout),
            conversation_timeout: parse_env("CONVERSATION_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.conversation_timeout),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("search engine unavailable: {0}")]
    Engine(#[source] EngineError),
    #[error("question timed out after {0:?}")]
    TimedOut(Duration),
    #[error("question cancelled")]
    Cancelled,
}

impl From<RetrieveError> for PipelineError {
    fn from(e: RetrieveError) -> Self {
        match e {
            RetrieveError::Engine(e) => PipelineError::Engine(e),
            RetrieveError::Cancelled => PipelineError::Cancelled,
        }
    }
}

impl PipelineError {
    /// Text shown to the person who asked.
    pub fn user_message(&self) -> &'static str {
        GENERIC_FAILURE_TEXT
    }
}

pub struct AnswerPipeline {
    planner: QueryPlanner,
    retriever: Retriever,
    grouper: ConversationGrouper,
    assembler: ResponseAssembler,
    config: PipelineConfig,
}

impl AnswerPipeline {
    pub fn new(
        planner: QueryPlanner,
        retriever: Retriever,
        grouper: ConversationGrouper,
        assembler: ResponseAssembler,
        config: PipelineConfig,
    ) -> Self {
        Self {
            planner,
            retriever,
            grouper,
            assembler,
            config,
        }
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answers a question, or explains why it cannot.
    ///
    /// Callers without history access get the missing-capability answer before any
    /// engine or model call is made.
    pub async fn answer(
        &self,
        question: &Question,
        cancel: &CancellationToken,
    ) -> Result<Answer, PipelineError> {
        if !question.is_admin {
            info!(group_id = question.group_id, "History access missing");
            return Ok(Answer::missing_capability());
        }

        let run = cancel.child_token();
        match timeout(self.config.ask_timeout, self.run(question, &run)).await {
            Ok(result) => result,
            Err(_) => {
                run.cancel();
                warn!(group_id = question.group_id, "Question timed out");
                Err(PipelineError::TimedOut(self.config.ask_timeout))
            }
        }
    }

    async fn run(
        &self,
        question: &Question,
        cancel: &CancellationToken,
    ) -> Result<Answer, PipelineError> {
        let strategy = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            strategy = self.planner.plan(&question.text) => strategy,
        };
        if strategy.is_empty() {
            info!(group_id = question.group_id, "Nothing to search for");
            return Ok(Answer::no_results());
        }

        let messages = self
            .retriever
            .retrieve(question.group_id, &strategy, SortOrder::CreatedAsc, cancel)
            .await?;
        if messages.is_empty() {
            return Ok(Answer::no_results());
        }

        let conversations = self.grouper.group(messages);
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        info!(
            group_id = question.group_id,
            conversations = conversations.len(),
            origin = ?strategy.origin,
            "Answer ready"
        );
        Ok(self
            .assembler
            .render(&conversations, &strategy.relevance_criteria))
    }
}
