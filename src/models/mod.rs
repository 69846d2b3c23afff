// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

pub mod api;
pub mod chat;
pub mod conversation;
pub mod lexicon;
pub mod message;
pub mod search;
pub mod strategy;
pub mod version;
