// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Namespace writes: set, remove, ordered insert and reorder.
//!
//! Every path and pattern here is relative to the calling session's anchor
//! (`/host/session`), so a session can only ever touch its own subtree.

use tracing::{debug, instrument, warn};

use super::pipeline::Notifier;
use super::Reflector;
use crate::error::{ReflectError, Result};
use crate::filter::QueryFilter;
use crate::matcher::{PathMatcher, PathPattern, Visit};
use crate::metrics::{record_result, LatencyTimer};
use crate::payload::Payload;
use crate::session_id::SessionId;
use crate::set_options::SetNodeFlags;
use crate::tree::{ChangeFlags, NodeId, NodeQuota, NodeTree};

impl Reflector {
    // ═══════════════════════════════════════════════════════════════════════
    // API: Node writes
    // ═══════════════════════════════════════════════════════════════════════

    /// Write `payload` at `path` below the session's anchor.
    ///
    /// Missing intermediate nodes are created with an empty payload and
    /// count against the session's quota.
    ///
    /// # Errors
    /// - `BadObject` for an empty path, a leading `/` or an empty segment
    /// - `NotFound` if something is missing and `dont_create` is set
    /// - `AccessDenied` when the quota is exhausted, or the leaf exists and
    ///   `dont_overwrite` is set
    #[instrument(skip(self, payload), fields(session = %session, path = %path))]
    pub fn set_node(&mut self, session: &str, path: &str, payload: Payload, flags: SetNodeFlags) -> Result<NodeId> {
        let _timer = LatencyTimer::new("set_node");
        let result = split_node_path(path).and_then(|segments| {
            self.mutate(session, |tree, anchor, quota, notifier| {
                write_path(tree, anchor, &segments, payload, flags, quota, notifier)
            })
        });
        if let Err(ReflectError::AccessDenied(reason)) = &result {
            warn!(%reason, "Node write rejected");
        }
        record_result("set_node", &result);
        result
    }

    /// Remove every node below the session's anchor matching `pattern`
    /// (and `filter`, if given), along with their subtrees.
    ///
    /// Returns the total number of nodes removed.
    #[instrument(skip(self, filter), fields(session = %session, pattern = %pattern))]
    pub fn remove_nodes(
        &mut self,
        session: &str,
        pattern: &str,
        filter: Option<QueryFilter>,
        quiet: bool,
    ) -> Result<usize> {
        let _timer = LatencyTimer::new("remove_nodes");
        let result = self.remove_nodes_inner(session, pattern, filter, quiet);
        record_result("remove_nodes", &result);
        result
    }

    fn remove_nodes_inner(
        &mut self,
        session: &str,
        pattern: &str,
        filter: Option<QueryFilter>,
        quiet: bool,
    ) -> Result<usize> {
        let mut matcher = PathMatcher::new();
        matcher.put_pattern(PathPattern::parse_relative(pattern)?, filter);
        let mode = self.traversal_mode;
        let flags = if quiet { ChangeFlags::quiet() } else { ChangeFlags::default() };

        self.mutate(session, |tree, anchor, quota, notifier| {
            let mut targets = Vec::new();
            matcher.traverse(tree, anchor, true, mode, |_, node, _| {
                targets.push(node);
                Visit::Continue
            })?;

            let mut removed = 0;
            // Deepest-first keeps every remaining id valid
            for node in targets.into_iter().rev() {
                let Some((parent, name)) = tree
                    .get(node)
                    .and_then(|n| n.parent().map(|p| (p, n.name().to_string())))
                else {
                    continue;
                };
                removed += tree.remove_child(parent, &name, quota, notifier, flags)?;
            }
            debug!(removed, "Removed matching nodes");
            Ok(removed)
        })
    }

    /// Insert a new child carrying `payload` into the ordered index of every
    /// node matching `pattern` below the session's anchor. An empty pattern
    /// means the anchor itself.
    ///
    /// The new child goes just before the indexed child named `before`, or
    /// at the end. Stops at the first failure.
    #[instrument(skip(self, payload), fields(session = %session, pattern = %pattern))]
    pub fn insert_ordered_node(
        &mut self,
        session: &str,
        pattern: &str,
        payload: Payload,
        before: Option<&str>,
    ) -> Result<Vec<NodeId>> {
        let _timer = LatencyTimer::new("insert_ordered");
        let result = self.matching_targets(session, pattern).and_then(|parents| {
            self.mutate(session, |tree, _, quota, notifier| {
                parents
                    .into_iter()
                    .map(|parent| {
                        tree.insert_ordered_child(
                            parent,
                            payload.clone(),
                            before,
                            None,
                            quota,
                            notifier,
                            ChangeFlags::default(),
                        )
                    })
                    .collect::<Result<Vec<_>>>()
            })
        });
        record_result("insert_ordered", &result);
        result
    }

    /// Move every indexed node matching `pattern` to just before its
    /// sibling `before` (or to the end of its parent's index).
    ///
    /// Matches that aren't part of an ordered index are skipped. Returns the
    /// number of nodes moved.
    #[instrument(skip(self), fields(session = %session, pattern = %pattern))]
    pub fn reorder_node(&mut self, session: &str, pattern: &str, before: Option<&str>) -> Result<usize> {
        let _timer = LatencyTimer::new("reorder");
        let result = self.matching_targets(session, pattern).and_then(|targets| {
            self.mutate(session, |tree, _, _, notifier| {
                let mut moved = 0;
                for node in targets {
                    let Some((parent, name)) = tree
                        .get(node)
                        .and_then(|n| n.parent().map(|p| (p, n.name().to_string())))
                    else {
                        continue;
                    };
                    let indexed = tree
                        .get(parent)
                        .and_then(|p| p.index())
                        .is_some_and(|ix| ix.contains(&node));
                    if indexed {
                        tree.reorder_child(parent, &name, before, notifier)?;
                        moved += 1;
                    }
                }
                Ok(moved)
            })
        });
        record_result("reorder", &result);
        result
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Helpers
    // ═══════════════════════════════════════════════════════════════════════

    /// Id, anchor and a copy of the quota of an attached session.
    pub(super) fn session_context(&self, id: &str) -> Result<(SessionId, NodeId, NodeQuota)> {
        let state = self
            .sessions
            .get(id)
            .ok_or_else(|| ReflectError::NotFound(format!("session {id}")))?;
        Ok((state.id.clone(), state.anchor, state.quota))
    }

    /// Nodes below the session's anchor matching a relative pattern.
    fn matching_targets(&mut self, session: &str, pattern: &str) -> Result<Vec<NodeId>> {
        let (_, anchor, _) = self.session_context(session)?;
        if pattern.is_empty() {
            return Ok(vec![anchor]);
        }
        let mut matcher = PathMatcher::new();
        matcher.put_pattern(PathPattern::parse_relative(pattern)?, None);
        let mut targets = Vec::new();
        matcher.traverse(&mut self.tree, anchor, false, self.traversal_mode, |_, node, _| {
            targets.push(node);
            Visit::Continue
        })?;
        Ok(targets)
    }

    /// Run a tree mutation on behalf of `session`, with notifications
    /// routed through the pipeline. The session's quota is written back
    /// whether or not the mutation succeeded.
    fn mutate<T>(
        &mut self,
        session: &str,
        op: impl FnOnce(&mut NodeTree, NodeId, &mut NodeQuota, &mut Notifier<'_>) -> Result<T>,
    ) -> Result<T> {
        let (sid, anchor, mut quota) = self.session_context(session)?;
        let Self { tree, pool, sessions, hooks, .. } = self;
        let mut notifier = Notifier::new(pool, sessions, hooks, Some(sid));
        let result = op(tree, anchor, &mut quota, &mut notifier);

        if let Some(state) = self.sessions.get_mut(session) {
            state.quota = quota;
        }
        crate::metrics::set_node_count(self.tree.len());
        result
    }
}

/// Split a session-relative node path into its segments.
fn split_node_path(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() || path.starts_with('/') {
        return Err(ReflectError::BadObject(format!("node path '{path}' must be relative")));
    }
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(ReflectError::BadObject(format!("node path '{path}' has an empty segment")));
    }
    Ok(segments)
}

fn write_path(
    tree: &mut NodeTree,
    anchor: NodeId,
    segments: &[&str],
    payload: Payload,
    flags: SetNodeFlags,
    quota: &mut NodeQuota,
    notifier: &mut Notifier<'_>,
) -> Result<NodeId> {
    let change = ChangeFlags {
        quiet: !flags.notifies(),
        supersede: flags.supersede,
    };
    let Some((&leaf, intermediates)) = segments.split_last() else {
        return Err(ReflectError::BadObject("empty node path".to_string()));
    };

    let mut parent = anchor;
    for segment in intermediates {
        parent = match tree.node(parent)?.child(segment) {
            Some(child) => child,
            None if !flags.creates() => {
                return Err(ReflectError::NotFound(format!("{}/{segment}", tree.path(parent))));
            }
            None => tree.put_child(parent, segment, Payload::empty(), quota, notifier, change)?,
        };
    }

    match tree.node(parent)?.child(leaf) {
        Some(existing) => {
            if flags.dont_overwrite {
                return Err(ReflectError::AccessDenied(format!(
                    "{} exists and may not be overwritten",
                    tree.path(existing)
                )));
            }
            tree.set_data(existing, payload, false, notifier, change)?;
            Ok(existing)
        }
        None if !flags.creates() => Err(ReflectError::NotFound(format!("{}/{leaf}", tree.path(parent)))),
        None if flags.add_to_index => {
            tree.insert_ordered_child(parent, payload, None, Some(leaf), quota, notifier, change)
        }
        None => tree.put_child(parent, leaf, payload, quota, notifier, change),
    }
}
