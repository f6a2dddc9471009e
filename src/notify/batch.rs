// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-session accumulation of outgoing updates.
//!
//! A [`PendingBatch`] holds three independent parts: changed/added payloads
//! keyed by path, removed paths, and index tokens keyed by the path of the
//! indexed node. Payloads and removals count toward the flush ceiling;
//! index tokens never trigger a flush on their own.
//!
//! # Example
//!
//! ```
//! use reflect_engine::{FlushReason, Payload, UpdateBatcher};
//! use serde_json::json;
//!
//! let mut batcher = UpdateBatcher::new(2);
//! assert!(batcher.add_change("/h/s/a", Payload::new(json!({"v": 1})), false).is_none());
//! assert_eq!(
//!     batcher.add_change("/h/s/b", Payload::new(json!({"v": 2})), false),
//!     Some(FlushReason::Count)
//! );
//! let flushed = batcher.take(FlushReason::Count).unwrap();
//! assert_eq!(flushed.items, 2);
//! assert!(batcher.is_empty());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::payload::Payload;
use crate::tree::IndexOp;

/// Why a pending batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// Item-count ceiling reached
    Count,
    /// An add met a pending removal of the same path (or the reverse)
    Ordering,
    /// End of a client request
    Request,
    /// Session detached
    Detach,
}

impl FlushReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Ordering => "ordering",
            Self::Request => "request",
            Self::Detach => "detach",
        }
    }
}

/// One flushed batch, as delivered to a session.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UpdateMessage {
    /// path → payloads, oldest first
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub changed: BTreeMap<String, Vec<Payload>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<String>,
    /// path of indexed node → tokens, in order
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub index_updates: BTreeMap<String, Vec<IndexOp>>,
}

impl UpdateMessage {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty() && self.index_updates.is_empty()
    }

    /// Changed payloads plus removed paths.
    pub fn item_count(&self) -> usize {
        self.changed.values().map(Vec::len).sum::<usize>() + self.removed.len()
    }

    /// Latest payload queued for `path`.
    pub fn latest(&self, path: &str) -> Option<&Payload> {
        self.changed.get(path).and_then(|v| v.last())
    }

    /// Drop every change queued for `path`. Returns how many were dropped.
    pub(crate) fn erase_changes(&mut self, path: &str) -> usize {
        self.changed.remove(path).map_or(0, |v| v.len())
    }

    /// Drop the changed payloads and removed paths `selected` picks (it is
    /// passed `None` for removals). Index tokens stay. Returns how many
    /// items were dropped.
    pub(crate) fn jettison(&mut self, selected: &mut dyn FnMut(&str, Option<&Payload>) -> bool) -> usize {
        let mut dropped = 0;
        self.changed.retain(|path, payloads| {
            let before = payloads.len();
            payloads.retain(|p| !selected(path.as_str(), Some(p)));
            dropped += before - payloads.len();
            !payloads.is_empty()
        });
        let before = self.removed.len();
        self.removed.retain(|path| !selected(path.as_str(), None));
        dropped + before - self.removed.len()
    }
}

/// Updates accumulated since the last flush.
#[derive(Debug, Default)]
pub struct PendingBatch {
    message: UpdateMessage,
    items: usize,
}

impl PendingBatch {
    pub fn is_empty(&self) -> bool {
        self.message.is_empty()
    }

    /// Items counted toward the flush ceiling.
    pub fn item_count(&self) -> usize {
        self.items
    }

    pub fn has_pending_change(&self, path: &str) -> bool {
        self.message.changed.contains_key(path)
    }

    pub fn has_pending_removal(&self, path: &str) -> bool {
        self.message.removed.iter().any(|p| p == path)
    }

    pub fn message(&self) -> &UpdateMessage {
        &self.message
    }

    fn push_change(&mut self, path: &str, payload: Payload, supersede: bool) {
        let entries = self.message.changed.entry(path.to_string()).or_default();
        if supersede {
            self.items -= entries.len();
            entries.clear();
        }
        entries.push(payload);
        self.items += 1;
    }

    fn push_removal(&mut self, path: &str) {
        if !self.has_pending_removal(path) {
            self.message.removed.push(path.to_string());
            self.items += 1;
        }
    }

    fn push_index_op(&mut self, path: &str, op: IndexOp) {
        self.message.index_updates.entry(path.to_string()).or_default().push(op);
    }

    fn jettison(&mut self, selected: &mut dyn FnMut(&str, Option<&Payload>) -> bool) -> usize {
        let dropped = self.message.jettison(selected);
        self.items -= dropped;
        dropped
    }

    fn take(&mut self) -> UpdateMessage {
        self.items = 0;
        std::mem::take(&mut self.message)
    }
}

/// A batch taken for delivery.
#[derive(Debug)]
pub struct FlushBatch {
    pub message: UpdateMessage,
    pub items: usize,
    pub reason: FlushReason,
}

/// Ceiling-driven batcher for one session's updates.
///
/// The `add_*` methods report when the caller must flush: `Ordering` means
/// flush *before* adding (the item has not been added yet), `Count` means
/// flush now that the item is in.
#[derive(Debug)]
pub struct UpdateBatcher {
    ceiling: usize,
    pending: PendingBatch,
}

impl UpdateBatcher {
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling: ceiling.max(1),
            pending: PendingBatch::default(),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn set_ceiling(&mut self, ceiling: usize) {
        self.ceiling = ceiling.max(1);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> &PendingBatch {
        &self.pending
    }

    /// True if adding a change for `path` must wait for a flush.
    pub fn change_conflicts(&self, path: &str) -> bool {
        self.pending.has_pending_removal(path)
    }

    /// True if removing `path` must wait for a flush.
    pub fn removal_conflicts(&self, path: &str) -> bool {
        self.pending.has_pending_change(path)
    }

    /// Queue an added/changed payload. A superseding change replaces
    /// whatever is still pending for the same path.
    pub fn add_change(&mut self, path: &str, payload: Payload, supersede: bool) -> Option<FlushReason> {
        if self.change_conflicts(path) {
            return Some(FlushReason::Ordering);
        }
        self.pending.push_change(path, payload, supersede);
        self.check_ceiling()
    }

    pub fn add_removal(&mut self, path: &str) -> Option<FlushReason> {
        if self.removal_conflicts(path) {
            return Some(FlushReason::Ordering);
        }
        self.pending.push_removal(path);
        self.check_ceiling()
    }

    pub fn add_index_op(&mut self, path: &str, op: IndexOp) {
        self.pending.push_index_op(path, op);
    }

    /// Drop pending items `selected` picks; see [`UpdateMessage::jettison`].
    pub(crate) fn jettison(&mut self, selected: &mut dyn FnMut(&str, Option<&Payload>) -> bool) -> usize {
        self.pending.jettison(selected)
    }

    fn check_ceiling(&self) -> Option<FlushReason> {
        (self.pending.item_count() >= self.ceiling).then_some(FlushReason::Count)
    }

    /// Snapshot and reset the pending batch.
    pub fn take(&mut self, reason: FlushReason) -> Option<FlushBatch> {
        if self.pending.is_empty() {
            return None;
        }
        let items = self.pending.item_count();
        let message = self.pending.take();
        debug!(items, reason = reason.as_str(), "Update batch taken for flush");
        Some(FlushBatch { message, items, reason })
    }
}
