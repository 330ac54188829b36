// SPDX-License-Identifier: MIT
// Copyright (c) 2026 Alfred Jean LLC

//! Conflict resolution between locally and remotely mutated records.
//!
//! Resolution rules:
//! - [`resolve_lww`]: strictly newer `updated_at` wins, ties keep local
//! - [`resolve_field_lww`]: per-field last-write-wins; untimestamped fields are frozen
//! - [`merge_arrays`]: union by identity key, local entries take precedence
//! - [`merge_queues`]: dedupe by id, then priority desc / created_at asc
//! - [`detect_conflict`]: heuristic flag for racing edits
//! - [`three_way_merge`]: reconcile divergent versions against a common base
//!
//! All functions are pure and synchronous. Malformed input is a caller bug,
//! not a runtime error to recover from: nothing here returns `Result`.

use std::collections::BTreeMap;
use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Two edits closer together than this are assumed to be racing.
pub const CONCURRENT_EDIT_WINDOW_MS: u64 = 5_000;

/// A record that carries a last-modified timestamp and an optional
/// monotonic version counter.
pub trait Versioned {
    /// Last modification time, epoch-ms.
    fn updated_at_ms(&self) -> u64;

    /// Monotonic version counter, if the record tracks one.
    fn version(&self) -> Option<u64> {
        None
    }
}

/// JSON documents are `Versioned` through their `updated_at` / `version`
/// top-level fields (missing or non-numeric `updated_at` reads as 0).
impl Versioned for Map<String, Value> {
    fn updated_at_ms(&self) -> u64 {
        self.get("updated_at").and_then(Value::as_u64).unwrap_or(0)
    }

    fn version(&self) -> Option<u64> {
        self.get("version").and_then(Value::as_u64)
    }
}

/// Why a comparison was flagged as conflicting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    /// Version counters diverged alongside the timestamps.
    VersionMismatch,
    /// Two edits landed within [`CONCURRENT_EDIT_WINDOW_MS`] of each other.
    ConcurrentEdit,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::VersionMismatch => write!(f, "version mismatch"),
            ConflictReason::ConcurrentEdit => write!(f, "concurrent edit"),
        }
    }
}

/// The verdict of comparing a local and remote version of a record.
///
/// Computed on demand, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub has_conflict: bool,
    pub reason: Option<ConflictReason>,
}

impl ConflictInfo {
    /// No conflict detected.
    pub fn none() -> Self {
        ConflictInfo { has_conflict: false, reason: None }
    }

    /// Conflict detected for the given reason.
    pub fn conflict(reason: ConflictReason) -> Self {
        ConflictInfo { has_conflict: true, reason: Some(reason) }
    }
}

/// Result of a [`three_way_merge`].
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The merged document.
    pub merged: Map<String, Value>,
    /// Keys that changed differently on both sides. The merged value for
    /// these keys defaults to remote; callers are expected to surface the
    /// list to the user rather than treat it as resolved.
    pub conflicts: Vec<String>,
}

/// Last-write-wins between two whole records.
///
/// Returns whichever side has the strictly greater `updated_at`. Ties keep
/// local -- a caller-supplied precedence policy, not a law of physics.
pub fn resolve_lww<T: Versioned>(local: T, remote: T) -> T {
    if remote.updated_at_ms() > local.updated_at_ms() {
        remote
    } else {
        local
    }
}

/// Per-field timestamps, keyed by field name, epoch-ms.
pub type FieldTimestamps = BTreeMap<String, u64>;

/// Field-by-field last-write-wins merge.
///
/// For each key present in `remote`, the remote value overwrites local only
/// if `remote_ts[key]` is strictly greater than `local_ts[key]`. A field
/// absent from a timestamp map is treated as written at time 0, so a field
/// with no remote timestamp is never overwritten: callers must supply a
/// timestamp for every mutable field or the field is frozen.
pub fn resolve_field_lww(
    local: &Map<String, Value>,
    remote: &Map<String, Value>,
    local_ts: &FieldTimestamps,
    remote_ts: &FieldTimestamps,
) -> Map<String, Value> {
    let mut merged = local.clone();
    for (key, value) in remote {
        let remote_at = remote_ts.get(key).copied().unwrap_or(0);
        let local_at = local_ts.get(key).copied().unwrap_or(0);
        if remote_at > local_at {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

/// Union of two arrays by a caller-supplied identity key.
///
/// Local entries take precedence on key collision; remote-only entries are
/// appended. Output order is local order followed by first-seen remote
/// order -- the result is not re-sorted.
pub fn merge_arrays<T, K, F>(local: &[T], remote: &[T], key_fn: F) -> Vec<T>
where
    T: Clone,
    K: std::hash::Hash + Eq,
    F: Fn(&T) -> K,
{
    let mut seen: HashSet<K> = HashSet::new();
    let mut merged = Vec::with_capacity(local.len() + remote.len());

    for item in local {
        if seen.insert(key_fn(item)) {
            merged.push(item.clone());
        }
    }
    for item in remote {
        if seen.insert(key_fn(item)) {
            merged.push(item.clone());
        }
    }
    merged
}

/// [`merge_arrays`] over JSON values, keyed by their serialized form.
pub fn merge_json_arrays(local: &[Value], remote: &[Value]) -> Vec<Value> {
    merge_arrays(local, remote, |v| v.to_string())
}

/// An item that can participate in a [`merge_queues`] ordering.
pub trait QueueOrd {
    /// Identity used for deduplication.
    fn queue_id(&self) -> &str;

    /// Creation time, epoch-ms.
    fn created_at_ms(&self) -> u64;

    /// Scheduling priority; higher runs first. Items without one sort at 0.
    fn priority(&self) -> i64 {
        0
    }
}

/// Merge two pending queues into one deterministic total order.
///
/// Dedupes by id (local wins, as in [`merge_arrays`]), then sorts by
/// priority descending with `created_at` ascending as the tiebreak, so the
/// result is directly usable as a queue.
pub fn merge_queues<T: QueueOrd + Clone>(local: &[T], remote: &[T]) -> Vec<T> {
    let mut merged = merge_arrays(local, remote, |item| item.queue_id().to_string());
    merged.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| a.created_at_ms().cmp(&b.created_at_ms()))
    });
    merged
}

/// Heuristic conflict check between a local and remote record.
///
/// Equal timestamps report no conflict and return before the version
/// counters are ever compared -- version divergence alone, without any
/// timestamp divergence, is deliberately not flagged. Existing sync
/// behavior depends on this ordering; do not reorder the checks.
///
/// When both sides carry a version and both the versions and timestamps
/// differ, the divergence is definite. Otherwise two edits within
/// [`CONCURRENT_EDIT_WINDOW_MS`] of each other are assumed to be racing
/// even with no version field to prove it.
pub fn detect_conflict<T: Versioned>(local: &T, remote: &T) -> ConflictInfo {
    let local_at = local.updated_at_ms();
    let remote_at = remote.updated_at_ms();

    if local_at == remote_at {
        return ConflictInfo::none();
    }

    if let (Some(local_version), Some(remote_version)) = (local.version(), remote.version()) {
        if local_version != remote_version {
            return ConflictInfo::conflict(ConflictReason::VersionMismatch);
        }
    }

    if local_at.abs_diff(remote_at) < CONCURRENT_EDIT_WINDOW_MS {
        return ConflictInfo::conflict(ConflictReason::ConcurrentEdit);
    }

    ConflictInfo::none()
}

/// Three-way merge of two divergent documents against their common base.
///
/// For every key present in `local`:
/// - unchanged on both sides: keep the base value
/// - changed only locally: take local
/// - changed only remotely: take remote
/// - changed identically on both sides: take that value
/// - changed differently on both sides: record the key in `conflicts` and
///   default the merged value to remote (a documented tie-break, not
///   auto-resolution)
pub fn three_way_merge(
    local: &Map<String, Value>,
    remote: &Map<String, Value>,
    base: &Map<String, Value>,
) -> MergeOutcome {
    let mut merged = Map::new();
    let mut conflicts = Vec::new();

    for (key, local_value) in local {
        let base_value = base.get(key);
        let remote_value = remote.get(key);

        let local_changed = base_value != Some(local_value);
        let remote_changed = remote_value != base_value;

        let winner = match (local_changed, remote_changed) {
            (false, false) => Some(local_value),
            (true, false) => Some(local_value),
            (false, true) => remote_value,
            (true, true) => {
                if remote_value == Some(local_value) {
                    Some(local_value)
                } else {
                    conflicts.push(key.clone());
                    remote_value
                }
            }
        };

        if let Some(value) = winner {
            merged.insert(key.clone(), value.clone());
        }
    }

    MergeOutcome { merged, conflicts }
}

#[cfg(test)]
#[path = "conflict_tests.rs"]
mod tests;
