// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Immutable subscriber-count records.
//!
//! A [`SubscriberSet`] maps session ids to the number of that session's
//! patterns matching the owning node. Sets are never mutated once built;
//! every change goes through [`super::SubscriberSetPool::resolve`], which
//! hands back a (possibly shared) replacement.
//!
//! The content hash is the wrapping sum of per-entry hashes, so the hash of
//! "this set with one count adjusted" can be computed without building it.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::{ReflectError, Result};
use crate::session_id::SessionId;

/// Shared handle to a pooled set.
pub type SubscriberSetRef = Arc<SubscriberSet>;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriberSet {
    /// Sorted by session id, counts always non-zero
    entries: Vec<(SessionId, u32)>,
    /// Sum of entry hashes
    hash: u64,
}

fn hash_one<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = DefaultHasher::new();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Hash of a single (session, count) entry. Zero factors are bumped to 1 so
/// that no entry contributes nothing to the sum.
fn entry_hash(id: &SessionId, count: u32) -> u64 {
    let kh = hash_one(id.as_str()).max(1);
    let vh = hash_one(&count).max(1);
    kh.wrapping_mul(vh)
}

impl SubscriberSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn content_hash(&self) -> u64 {
        self.hash
    }

    /// Reference count for `id` (0 if absent).
    pub fn count(&self, id: &str) -> u32 {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(id))
            .map_or(0, |i| self.entries[i].1)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.count(id) > 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SessionId, u32)> {
        self.entries.iter().map(|(k, v)| (k, *v))
    }

    pub fn sessions(&self) -> impl Iterator<Item = &SessionId> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// Entry count of this set after `id`'s count becomes `new_count`.
    pub(crate) fn len_with(&self, id: &str, new_count: u32) -> usize {
        let old = self.count(id);
        match (old > 0, new_count > 0) {
            (false, true) => self.len() + 1,
            (true, false) => self.len() - 1,
            _ => self.len(),
        }
    }

    /// Content hash of this set after `id`'s count becomes `new_count`,
    /// computed without materializing the set.
    pub(crate) fn hash_with(&self, id: &SessionId, new_count: u32) -> u64 {
        let old = self.count(id.as_str());
        let mut hash = self.hash;
        if old > 0 {
            hash = hash.wrapping_sub(entry_hash(id, old));
        }
        if new_count > 0 {
            hash = hash.wrapping_add(entry_hash(id, new_count));
        }
        hash
    }

    /// Exact equality between `candidate` and this set with `id`'s count
    /// replaced by `new_count`, without materializing the latter.
    pub(crate) fn equals_with(&self, candidate: &SubscriberSet, id: &SessionId, new_count: u32) -> bool {
        if candidate.len() != self.len_with(id.as_str(), new_count) {
            return false;
        }
        candidate.entries.iter().all(|(k, v)| {
            let expected = if k == id { new_count } else { self.count(k.as_str()) };
            expected == *v
        })
    }

    /// Build the adjusted set. Allocation failure is reported, not aborted on.
    pub(crate) fn with_count(&self, id: &SessionId, new_count: u32) -> Result<SubscriberSet> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(self.len_with(id.as_str(), new_count))
            .map_err(|e| ReflectError::OutOfMemory(format!("subscriber set: {e}")))?;
        entries.extend(self.entries.iter().filter(|(k, _)| k != id).cloned());
        if new_count > 0 {
            let pos = entries
                .binary_search_by(|(k, _)| k.as_str().cmp(id.as_str()))
                .unwrap_or_else(|p| p);
            entries.insert(pos, (id.clone(), new_count));
        }
        Ok(SubscriberSet {
            entries,
            hash: self.hash_with(id, new_count),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::new(s)
    }

    #[test]
    fn test_with_count_adds_and_sorts() {
        let a = SubscriberSet::new().with_count(&sid("b"), 1).unwrap();
        let ab = a.with_count(&sid("a"), 2).unwrap();
        let ids: Vec<_> = ab.sessions().map(SessionId::as_str).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(ab.count("a"), 2);
        assert_eq!(ab.count("b"), 1);
        assert_eq!(ab.count("c"), 0);
    }

    #[test]
    fn test_with_count_zero_removes() {
        let s = SubscriberSet::new()
            .with_count(&sid("a"), 1)
            .unwrap()
            .with_count(&sid("b"), 1)
            .unwrap();
        let only_b = s.with_count(&sid("a"), 0).unwrap();
        assert_eq!(only_b.len(), 1);
        assert!(!only_b.contains("a"));
    }

    #[test]
    fn test_hash_is_order_independent() {
        let x = SubscriberSet::new()
            .with_count(&sid("a"), 1)
            .unwrap()
            .with_count(&sid("b"), 3)
            .unwrap();
        let y = SubscriberSet::new()
            .with_count(&sid("b"), 3)
            .unwrap()
            .with_count(&sid("a"), 1)
            .unwrap();
        assert_eq!(x, y);
        assert_eq!(x.content_hash(), y.content_hash());
    }

    #[test]
    fn test_hash_with_matches_materialized() {
        let base = SubscriberSet::new().with_count(&sid("a"), 2).unwrap();
        let predicted = base.hash_with(&sid("a"), 5);
        let built = base.with_count(&sid("a"), 5).unwrap();
        assert_eq!(predicted, built.content_hash());
    }

    #[test]
    fn test_equals_with() {
        let base = SubscriberSet::new().with_count(&sid("a"), 1).unwrap();
        let target = base.with_count(&sid("b"), 1).unwrap();
        assert!(base.equals_with(&target, &sid("b"), 1));
        assert!(!base.equals_with(&target, &sid("b"), 2));
        assert!(!base.equals_with(&target, &sid("c"), 1));
    }

    #[test]
    fn test_empty_hash_is_zero() {
        let s = SubscriberSet::new().with_count(&sid("a"), 1).unwrap();
        let back = s.with_count(&sid("a"), 0).unwrap();
        assert_eq!(back.content_hash(), 0);
        assert!(back.is_empty());
    }
}
