// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pattern-driven tree walk.
//!
//! ```text
//!  level k under the traversal root
//!  ┌──────────────────────────────────────────────────────────────┐
//!  │ clause k of every pattern long enough to reach this level    │
//!  │                                                              │
//!  │  all literal / comma lists ──► look each distinct name up    │
//!  │  any glob / range / negation ─► scan every child             │
//!  └──────────────────────────────────────────────────────────────┘
//!           │ child passes some pattern's clause k
//!           ├─ clause k is that pattern's last ─► (re-verify) ─► visitor
//!           └─ otherwise ─────────────────────► descend to level k+1
//! ```
//!
//! Each child is handed to the visitor at most once and descended into at
//! most once, however many patterns accept it. With more than one pattern
//! (or with filters), candidates are re-checked against the whole path,
//! because clauses of different patterns can combine to accept a path none
//! of them describes (`/j*/k*` and `/k*/j*` both pass `/jeremy/jenny` level
//! by level).

use std::collections::BTreeSet;

use tracing::trace;

use super::clause::ClauseMatcher;
use super::path_matcher::PathMatcher;
use crate::error::{ReflectError, Result};
use crate::payload::Payload;
use crate::tree::{NodeId, NodeTree};

/// What the traversal should do after a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    /// Skip the rest of the subtree rooted at the visited node's ancestor
    /// at this absolute depth (the node's own depth skips its children).
    SkipSubtree(usize),
    /// Stop the traversal now
    Abort,
}

/// How to pick children at each level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraversalMode {
    /// Direct lookup where every active clause is literal, scan elsewhere
    #[default]
    Auto,
    /// Always scan
    ForceScan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TraversalOutcome {
    /// Number of visitor calls
    pub visited: usize,
    pub aborted: bool,
}

enum Flow {
    Continue,
    /// Unwind until the subtree at this depth is left behind
    Unwind(usize),
    Abort,
}

struct Walk<'m, F> {
    matcher: &'m PathMatcher,
    root_depth: usize,
    use_filters: bool,
    mode: TraversalMode,
    visitor: F,
    visited: usize,
}

impl PathMatcher {
    /// Visit every node under `root` matched by any entry.
    ///
    /// With `use_filters`, entries' filters are applied and the visitor sees
    /// the retargeted payload (also swapped into the node for the duration of
    /// the call).
    pub fn traverse<F>(
        &self,
        tree: &mut NodeTree,
        root: NodeId,
        use_filters: bool,
        mode: TraversalMode,
        visitor: F,
    ) -> Result<TraversalOutcome>
    where
        F: FnMut(&mut NodeTree, NodeId, &Payload) -> Visit,
    {
        let root_depth = tree
            .get(root)
            .map(|n| n.depth())
            .ok_or_else(|| ReflectError::NotFound("traversal root".to_string()))?;

        let mut walk = Walk {
            matcher: self,
            root_depth,
            use_filters,
            mode,
            visitor,
            visited: 0,
        };
        let flow = walk.children_of(tree, root);
        let outcome = TraversalOutcome {
            visited: walk.visited,
            aborted: matches!(flow, Flow::Abort),
        };
        crate::metrics::record_traversal(mode, outcome.visited);
        Ok(outcome)
    }
}

impl<F> Walk<'_, F>
where
    F: FnMut(&mut NodeTree, NodeId, &Payload) -> Visit,
{
    fn children_of(&mut self, tree: &mut NodeTree, node: NodeId) -> Flow {
        let Some(depth) = tree.get(node).map(|n| n.depth()) else {
            return Flow::Continue;
        };
        let level = depth - self.root_depth;
        let matcher = self.matcher;
        let active: Vec<_> = matcher.entries().filter(|e| e.pattern.len() > level).collect();
        if active.is_empty() {
            return Flow::Continue;
        }

        let literal_only = self.mode == TraversalMode::Auto
            && active.iter().all(|e| e.pattern.clauses()[level].literals().is_some());

        if literal_only {
            let names: BTreeSet<&str> = active
                .iter()
                .filter_map(|e| e.pattern.clauses()[level].literals())
                .flatten()
                .map(String::as_str)
                .collect();
            crate::metrics::record_traversal_level(true);
            for name in names {
                let Some(child) = tree.get(node).and_then(|n| n.child(name)) else {
                    continue;
                };
                match self.check_child(tree, child, level) {
                    Flow::Continue => {}
                    other => return other,
                }
            }
        } else {
            crate::metrics::record_traversal_level(false);
            for child in tree.child_ids(node) {
                match self.check_child(tree, child, level) {
                    Flow::Continue => {}
                    other => return other,
                }
            }
        }
        Flow::Continue
    }

    /// Visit `child` if some pattern ends at this level, then descend if
    /// some pattern goes deeper. The visit always comes first, so whether a
    /// node is seen never depends on which pattern sorts first.
    fn check_child(&mut self, tree: &mut NodeTree, child: NodeId, level: usize) -> Flow {
        let Some((name, child_depth)) = tree.get(child).map(|n| (n.name().to_string(), n.depth())) else {
            return Flow::Continue;
        };
        let matcher = self.matcher;
        let accepts = |clauses: &[ClauseMatcher]| clauses.len() > level && clauses[level].matches(&name);

        let ending = matcher
            .entries()
            .find(|e| e.pattern.len() == level + 1 && accepts(e.pattern.clauses()));
        if let Some(entry) = ending {
            let Some(mut payload) = tree.get(child).map(|n| n.payload().clone()) else {
                return Flow::Continue;
            };
            let trusted = matcher.len() == 1 && (!self.use_filters || entry.filter.is_none());
            if trusted || matcher.matches_node_with(tree, child, self.root_depth, &mut payload, self.use_filters) {
                match self.visit(tree, child, payload) {
                    Visit::Continue => {}
                    Visit::Abort => return Flow::Abort,
                    Visit::SkipSubtree(d) if d < child_depth => return Flow::Unwind(d),
                    // Children skipped
                    Visit::SkipSubtree(d) if d == child_depth => return Flow::Continue,
                    Visit::SkipSubtree(_) => {}
                }
            } else {
                trace!(node = %name, "Candidate rejected on re-verification");
            }
        }

        let deeper = matcher
            .entries()
            .any(|e| e.pattern.len() > level + 1 && accepts(e.pattern.clauses()));
        if !deeper {
            return Flow::Continue;
        }
        match self.children_of(tree, child) {
            Flow::Continue => Flow::Continue,
            Flow::Abort => Flow::Abort,
            Flow::Unwind(d) if d < child_depth => Flow::Unwind(d),
            // The child's own subtree was skipped; move on to its siblings
            Flow::Unwind(_) => Flow::Continue,
        }
    }

    fn visit(&mut self, tree: &mut NodeTree, node: NodeId, payload: Payload) -> Visit {
        self.visited += 1;
        let retargeted = tree.get(node).is_some_and(|n| !n.payload().ptr_eq(&payload));
        if !retargeted {
            return (self.visitor)(tree, node, &payload);
        }

        let original = tree.swap_payload(node, payload.clone());
        let result = (self.visitor)(tree, node, &payload);
        if let Some(original) = original {
            tree.swap_payload(node, original);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::QueryFilter;
    use crate::pool::SubscriberSet;
    use crate::tree::{ChangeFlags, NodeQuota};
    use serde_json::json;
    use std::sync::Arc;

    fn tree_with(paths: &[&str]) -> NodeTree {
        let mut t = NodeTree::new(Arc::new(SubscriberSet::new()));
        let mut q = NodeQuota::unlimited();
        for path in paths {
            let mut cur = t.root();
            for name in path.split('/').filter(|s| !s.is_empty()) {
                cur = match t.node(cur).unwrap().child(name) {
                    Some(c) => c,
                    None => t
                        .put_child(cur, name, Payload::new(json!({"name": name, "inner": {"n": name}})), &mut q, &mut (), ChangeFlags::default())
                        .unwrap(),
                };
            }
        }
        t
    }

    fn collect(m: &PathMatcher, t: &mut NodeTree, mode: TraversalMode) -> Vec<String> {
        let root = t.root();
        let mut out = Vec::new();
        m.traverse(t, root, true, mode, |tree, id, _| {
            out.push(tree.path(id));
            Visit::Continue
        })
        .unwrap();
        out
    }

    fn matcher(patterns: &[&str]) -> PathMatcher {
        let mut m = PathMatcher::new();
        for p in patterns {
            m.put(p, None).unwrap();
        }
        m
    }

    const PATHS: &[&str] = &[
        "/h1/s1/room1/msg1",
        "/h1/s1/room1/msg2",
        "/h1/s1/room2/msg1",
        "/h2/s2/room1/note",
        "/jeremy/jenny",
        "/kate/jim",
    ];

    #[test]
    fn test_literal_and_glob_levels() {
        let mut t = tree_with(PATHS);
        let m = matcher(&["room1/*"]);
        assert_eq!(
            collect(&m, &mut t, TraversalMode::Auto),
            vec!["/h1/s1/room1/msg1", "/h1/s1/room1/msg2", "/h2/s2/room1/note"]
        );
    }

    #[test]
    fn test_modes_agree() {
        let mut t = tree_with(PATHS);
        for patterns in [
            vec!["room1/*"],
            vec!["/h1/s1/room1,room2/msg1"],
            vec!["/h1/s1/room2/msg1", "/h2/s2/room1/note"],
            vec!["/j*/k*", "/k*/j*"],
            vec!["/*/*/~room1/*"],
        ] {
            let m = matcher(&patterns);
            assert_eq!(
                collect(&m, &mut t, TraversalMode::Auto),
                collect(&m, &mut t, TraversalMode::ForceScan),
                "patterns {patterns:?}"
            );
        }
    }

    #[test]
    fn test_clause_conspiracy_is_rejected() {
        let mut t = tree_with(PATHS);
        let m = matcher(&["/j*/k*", "/k*/j*"]);
        // /jeremy/jenny only passes level by level, /kate/jim is a real match
        assert_eq!(collect(&m, &mut t, TraversalMode::Auto), vec!["/kate/jim"]);

        let mut t = tree_with(&["/jeremy/kevin", "/jeremy/jim"]);
        let m = matcher(&["/j*/k*", "/k*/j*"]);
        // /jeremy/jim passes clause 0 of the first and clause 1 of the second
        assert_eq!(collect(&m, &mut t, TraversalMode::Auto), vec!["/jeremy/kevin"]);
    }

    #[test]
    fn test_each_node_visited_once() {
        let mut t = tree_with(PATHS);
        let m = matcher(&["room1/*", "/h1/*/room1/msg*", "/*/s1/*/msg1"]);
        let got = collect(&m, &mut t, TraversalMode::Auto);
        assert_eq!(got, vec!["/h1/s1/room1/msg1", "/h1/s1/room1/msg2", "/h1/s1/room2/msg1", "/h2/s2/room1/note"]);
    }

    #[test]
    fn test_abort_stops_immediately() {
        let mut t = tree_with(PATHS);
        let m = matcher(&["room1/*"]);
        let root = t.root();
        let mut seen = 0;
        let outcome = m
            .traverse(&mut t, root, true, TraversalMode::Auto, |_, _, _| {
                seen += 1;
                Visit::Abort
            })
            .unwrap();
        assert_eq!(seen, 1);
        assert!(outcome.aborted);
        assert_eq!(outcome.visited, 1);
    }

    #[test]
    fn test_skip_subtree_moves_to_next_session() {
        let mut t = tree_with(PATHS);
        let m = matcher(&["*/*"]);
        let root = t.root();
        let mut seen = Vec::new();
        m.traverse(&mut t, root, false, TraversalMode::Auto, |tree, id, _| {
            seen.push(tree.path(id));
            Visit::SkipSubtree(2)
        })
        .unwrap();
        // One visit per session anchor instead of one per room
        assert_eq!(seen, vec!["/h1/s1/room1/msg1", "/h2/s2/room1/note"]);
    }

    #[test]
    fn test_visit_precedes_descent_regardless_of_key_order() {
        // "/*/b" sorts before "/a", so the descent pattern is seen first
        let mut t = tree_with(&["/a/b"]);
        let m = matcher(&["/*/b", "/a"]);
        let root = t.root();
        let mut seen = Vec::new();
        m.traverse(&mut t, root, false, TraversalMode::Auto, |tree, id, _| {
            let path = tree.path(id);
            let skip_parent = path == "/a/b";
            seen.push(path);
            if skip_parent {
                Visit::SkipSubtree(1)
            } else {
                Visit::Continue
            }
        })
        .unwrap();
        assert_eq!(seen, vec!["/a", "/a/b"]);
    }

    #[test]
    fn test_filter_retargets_payload_during_visit() {
        let mut t = tree_with(&["/h/s/item"]);
        let mut m = PathMatcher::new();
        m.put("item", Some(QueryFilter::within("inner", None))).unwrap();
        let root = t.root();
        let item = t.find("/h/s/item").unwrap();

        let mut seen_in_tree = None;
        m.traverse(&mut t, root, true, TraversalMode::Auto, |tree, id, payload| {
            seen_in_tree = Some(tree.node(id).unwrap().payload().value().clone());
            assert_eq!(payload.value(), &json!({"n": "item"}));
            Visit::Continue
        })
        .unwrap();

        assert_eq!(seen_in_tree, Some(json!({"n": "item"})));
        assert_eq!(t.node(item).unwrap().payload().get("name"), Some(&json!("item")));
    }

    #[test]
    fn test_filters_ignored_when_not_requested() {
        let mut t = tree_with(&["/h/s/item"]);
        let mut m = PathMatcher::new();
        m.put("item", Some(QueryFilter::field_eq("name", "other"))).unwrap();
        let root = t.root();
        let with = m.traverse(&mut t, root, true, TraversalMode::Auto, |_, _, _| Visit::Continue).unwrap();
        let without = m.traverse(&mut t, root, false, TraversalMode::Auto, |_, _, _| Visit::Continue).unwrap();
        assert_eq!(with.visited, 0);
        assert_eq!(without.visited, 1);
    }

    #[test]
    fn test_missing_root_is_error() {
        let mut t = tree_with(&["/a"]);
        let a = t.find("/a").unwrap();
        let root = t.root();
        t.remove_child(root, "a", &mut NodeQuota::unlimited(), &mut (), ChangeFlags::default()).unwrap();
        let m = matcher(&["/x"]);
        assert!(m.traverse(&mut t, a, true, TraversalMode::Auto, |_, _, _| Visit::Continue).is_err());
    }
}
