// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! A keyed collection of path patterns, each with an optional payload filter.
//!
//! Used as a session's subscription registry and, transiently, for one-off
//! queries (find, remove).

use std::collections::BTreeMap;
use std::sync::Arc;

use super::clause::ClauseMatcher;
use super::pattern::PathPattern;
use crate::error::Result;
use crate::filter::QueryFilter;
use crate::payload::Payload;
use crate::tree::{NodeId, NodeTree};

#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub(crate) pattern: PathPattern,
    pub(crate) filter: Option<Arc<QueryFilter>>,
}

impl PatternEntry {
    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn filter(&self) -> Option<&QueryFilter> {
        self.filter.as_deref()
    }

    /// Filter verdict for a payload; an absent filter accepts everything.
    /// On success `payload` holds whatever the filter retargeted it to.
    fn accepts(&self, payload: &mut Payload, child_count: usize) -> bool {
        let Some(filter) = &self.filter else {
            return true;
        };
        let mut scratch = payload.clone();
        if filter.matches(&mut scratch, child_count) {
            *payload = scratch;
            true
        } else {
            false
        }
    }
}

/// Result of [`PathMatcher::put`].
#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    /// The pattern was not registered before
    Added,
    /// Already registered; only its filter was swapped
    FilterChanged { previous: Option<Arc<QueryFilter>> },
    /// Already registered with an equal filter
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct PathMatcher {
    entries: BTreeMap<String, PatternEntry>,
}

/// A session's subscriptions.
pub type SubscriptionRegistry = PathMatcher;

impl PathMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `raw` (normalized to an absolute pattern) with `filter`.
    pub fn put(&mut self, raw: &str, filter: Option<QueryFilter>) -> Result<PutOutcome> {
        let pattern = PathPattern::parse(raw)?;
        Ok(self.put_pattern(pattern, filter))
    }

    /// Register an already-parsed pattern.
    pub fn put_pattern(&mut self, pattern: PathPattern, filter: Option<QueryFilter>) -> PutOutcome {
        let filter = filter.map(Arc::new);
        match self.entries.get_mut(pattern.as_str()) {
            Some(existing) if existing.filter == filter => PutOutcome::Unchanged,
            Some(existing) => {
                let previous = std::mem::replace(&mut existing.filter, filter);
                PutOutcome::FilterChanged { previous }
            }
            None => {
                self.entries
                    .insert(pattern.as_str().to_string(), PatternEntry { pattern, filter });
                PutOutcome::Added
            }
        }
    }

    /// Unregister by raw or normalized text. Unknown patterns are ignored.
    pub fn remove(&mut self, raw: &str) -> Result<Option<PatternEntry>> {
        let key = PathPattern::normalize(raw)?;
        Ok(self.entries.remove(&key))
    }

    /// Unregister every entry whose key `raw` selects.
    ///
    /// `raw` is normalized like any pattern. The entry stored under exactly
    /// that key goes, and if the text has wildcards it is also matched as one
    /// glob against every registered key, slashes included: `room*` takes
    /// `room1/*` and `room2/msg` with it.
    pub fn remove_matching(&mut self, raw: &str) -> Result<Vec<PatternEntry>> {
        let key = PathPattern::normalize(raw)?;
        let mut removed: Vec<PatternEntry> = self.entries.remove(&key).into_iter().collect();

        let selector = ClauseMatcher::parse(&key)?;
        if selector.literals().is_none() {
            let keys: Vec<String> = self.entries.keys().filter(|k| selector.matches(k)).cloned().collect();
            removed.extend(keys.iter().filter_map(|k| self.entries.remove(k)));
        }
        Ok(removed)
    }

    pub fn get(&self, raw: &str) -> Option<&PatternEntry> {
        let key = PathPattern::normalize(raw).ok()?;
        self.entries.get(&key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &PatternEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// True if any entry carries a filter.
    pub fn uses_filters(&self) -> bool {
        self.entries.values().any(|e| e.filter.is_some())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Per-node checks
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether `node`'s path (below `root_depth`) satisfies every clause of
    /// `pattern`. Filters are not consulted.
    pub fn path_matches(tree: &NodeTree, node: NodeId, root_depth: usize, pattern: &PathPattern) -> bool {
        let Some(n) = tree.get(node) else {
            return false;
        };
        if n.depth() < root_depth || n.depth() - root_depth != pattern.len() {
            return false;
        }
        // Walk up the parent chain, last clause first
        let mut cur = node;
        for clause in pattern.clauses().iter().rev() {
            let Some(n) = tree.get(cur) else {
                return false;
            };
            if !clause.matches(n.name()) {
                return false;
            }
            match n.parent() {
                Some(p) => cur = p,
                None => return false,
            }
        }
        true
    }

    /// How many entries match `node` by path alone.
    pub fn match_count(&self, tree: &NodeTree, node: NodeId, root_depth: usize) -> usize {
        self.entries
            .values()
            .filter(|e| Self::path_matches(tree, node, root_depth, &e.pattern))
            .count()
    }

    /// Whether any entry matches `node` by path and accepts `payload`.
    ///
    /// `payload` is normally the node's own payload but can be any candidate
    /// (e.g. the value before a change). When the accepting filter retargets,
    /// `payload` is replaced with the retargeted value.
    pub fn matches_node(&self, tree: &NodeTree, node: NodeId, root_depth: usize, payload: &mut Payload) -> bool {
        self.matches_node_with(tree, node, root_depth, payload, true)
    }

    pub(crate) fn matches_node_with(
        &self,
        tree: &NodeTree,
        node: NodeId,
        root_depth: usize,
        payload: &mut Payload,
        use_filters: bool,
    ) -> bool {
        let child_count = tree.get(node).map_or(0, |n| n.child_count());
        self.entries.values().any(|e| {
            Self::path_matches(tree, node, root_depth, &e.pattern)
                && (!use_filters || e.accepts(payload, child_count))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::SubscriberSet;
    use crate::tree::{ChangeFlags, NodeQuota};
    use serde_json::json;

    fn tree_with(paths: &[&str]) -> NodeTree {
        let mut t = NodeTree::new(Arc::new(SubscriberSet::new()));
        let mut q = NodeQuota::unlimited();
        for path in paths {
            let mut cur = t.root();
            for name in path.split('/').filter(|s| !s.is_empty()) {
                cur = match t.node(cur).unwrap().child(name) {
                    Some(c) => c,
                    None => t
                        .put_child(cur, name, Payload::new(json!({"name": name})), &mut q, &mut (), ChangeFlags::default())
                        .unwrap(),
                };
            }
        }
        t
    }

    #[test]
    fn test_put_outcomes() {
        let mut m = PathMatcher::new();
        assert_eq!(m.put("room1/*", None).unwrap(), PutOutcome::Added);
        assert_eq!(m.put("/*/*/room1/*", None).unwrap(), PutOutcome::Unchanged);
        let f = QueryFilter::field_eq("a", 1i64);
        assert!(matches!(
            m.put("room1/*", Some(f.clone())).unwrap(),
            PutOutcome::FilterChanged { previous: None }
        ));
        assert_eq!(m.put("room1/*", Some(f)).unwrap(), PutOutcome::Unchanged);
        assert_eq!(m.len(), 1);
        assert!(m.uses_filters());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut m = PathMatcher::new();
        m.put("/a/b", None).unwrap();
        assert!(m.remove("/x").unwrap().is_none());
        assert!(m.remove("/a/b").unwrap().is_some());
        assert!(m.is_empty());
    }

    #[test]
    fn test_remove_matching_by_wildcard_key() {
        let mut m = PathMatcher::new();
        m.put("room1/*", None).unwrap();
        m.put("room2/msg", None).unwrap();
        m.put("lobby", None).unwrap();
        m.put("/h/s/lounge9", None).unwrap();

        let gone = m.remove_matching("room*").unwrap();
        let mut keys: Vec<_> = gone.iter().map(|e| e.pattern().as_str().to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec!["/*/*/room1/*", "/*/*/room2/msg"]);
        assert_eq!(m.len(), 2);

        // Literal text removes only its own entry
        assert_eq!(m.remove_matching("/h/s/lounge9").unwrap().len(), 1);
        assert!(m.remove_matching("nothing").unwrap().is_empty());
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn test_remove_matching_exact_key_with_metacharacters() {
        let mut m = PathMatcher::new();
        m.put("a,b/*", None).unwrap();
        m.put("a/x", None).unwrap();
        // Registered text is removed even when its own glob reading wouldn't select it
        let gone = m.remove_matching("a,b/*").unwrap();
        assert_eq!(gone.len(), 1);
        assert!(m.get("a/x").is_some());
    }

    #[test]
    fn test_match_count_is_path_only() {
        let t = tree_with(&["/h/s/room1/msg1"]);
        let node = t.find("/h/s/room1/msg1").unwrap();
        let mut m = PathMatcher::new();
        m.put("room1/*", None).unwrap();
        m.put("/h/*/room1/msg*", Some(QueryFilter::field_eq("name", "nope"))).unwrap();
        m.put("room2/*", None).unwrap();
        assert_eq!(m.match_count(&t, node, 0), 2);
    }

    #[test]
    fn test_depth_must_equal_clause_count() {
        let t = tree_with(&["/h/s/room1/msg1"]);
        let room = t.find("/h/s/room1").unwrap();
        let mut m = PathMatcher::new();
        m.put("room1/*", None).unwrap();
        assert_eq!(m.match_count(&t, room, 0), 0);
        // Same node, rooted one level down
        let p = PathPattern::parse_relative("s/room1").unwrap();
        assert!(PathMatcher::path_matches(&t, room, 1, &p));
    }

    #[test]
    fn test_matches_node_uses_filter_and_candidate_payload() {
        let t = tree_with(&["/h/s/item"]);
        let node = t.find("/h/s/item").unwrap();
        let mut m = PathMatcher::new();
        m.put("item", Some(QueryFilter::field_eq("status", "ready"))).unwrap();

        let mut pending = Payload::new(json!({"status": "pending"}));
        let mut ready = Payload::new(json!({"status": "ready"}));
        assert!(!m.matches_node(&t, node, 0, &mut pending));
        assert!(m.matches_node(&t, node, 0, &mut ready));
        assert!(m.matches_node_with(&t, node, 0, &mut pending, false));
    }

    #[test]
    fn test_matches_node_reports_retargeted_payload() {
        let t = tree_with(&["/h/s/item"]);
        let node = t.find("/h/s/item").unwrap();
        let mut m = PathMatcher::new();
        m.put("item", Some(QueryFilter::within("inner", None))).unwrap();

        let mut p = Payload::new(json!({"inner": {"x": 1}}));
        assert!(m.matches_node(&t, node, 0, &mut p));
        assert_eq!(p.value(), &json!({"x": 1}));
    }
}
