// SPDX-License-Identifier: BSD-3-Clause
// Copyright (c) 2026 Aleksandr Ptakhin

//! Chat identifier arithmetic.
//!
//! Supergroup ids carry a `-100` prefix (`-100<N>`). When a basic group is migrated to a
//! supergroup its history may still be indexed under the pre-migration id `-<N>`, which is
//! `supergroup_id + 10^12`. Deep links use the bare `<N>` suffix.

/// Offset between a supergroup id and its legacy basic-group id.
pub const SUPERGROUP_OFFSET: i64 = 1_000_000_000_000;

/// Supergroup ids are strictly below `-10^12`.
pub fn is_supergroup(group_id: i64) -> bool {
    group_id < -SUPERGROUP_OFFSET
}

/// Pre-migration id for a supergroup, `None` for any other chat.
pub fn legacy_group_id(group_id: i64) -> Option<i64> {
    is_supergroup(group_id).then(|| group_id + SUPERGROUP_OFFSET)
}

/// Numeric chat suffix used in deep links: strips a leading `-100`, otherwise a single `-`.
pub fn link_suffix(group_id: i64) -> String {
    let id = group_id.to_string();
    if let Some(rest) = id.strip_prefix("-100") {
        rest.to_string()
    } else if let Some(rest) = id.strip_prefix('-') {
        rest.to_string()
    } else {
        id
    }
}
