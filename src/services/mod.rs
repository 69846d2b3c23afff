// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

pub mod backfill;
pub mod completion;
pub mod db;
pub mod engine;
pub mod grouper;
pub mod index_manager;
pub mod ingest;
pub mod logging;
pub mod outbound;
pub mod pipeline;
pub mod planner;
pub mod render;
pub mod retriever;
pub mod retry;
pub mod search;
