// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Subscriptions and namespace queries.
//!
//! Subscribing adds one to the session's count on every node the pattern
//! matches by path; unsubscribing takes it away again. Filters never touch
//! counts. They are evaluated when a notification is about to go out.

use std::collections::BTreeMap;

use tracing::{debug, instrument};

use super::Reflector;
use crate::error::{ReflectError, Result};
use crate::filter::QueryFilter;
use crate::matcher::{PathMatcher, PathPattern, PutOutcome, Visit};
use crate::metrics::{record_result, LatencyTimer};
use crate::notify::{FlushReason, Outbound, UpdateMessage};
use crate::payload::Payload;
use crate::session_id::SessionId;
use crate::tree::{index, NodeId};

/// Subscriptions are matched from the namespace root.
const ROOT_DEPTH: usize = 0;

/// Depth of the session anchors (`/host/session`).
const SESSION_DEPTH: usize = 2;

/// What a newly visible node looks like to one subscriber.
struct Snapshot {
    path: String,
    payload: Payload,
    index: Option<Vec<String>>,
}

impl Reflector {
    // ═══════════════════════════════════════════════════════════════════════
    // API: Subscriptions
    // ═══════════════════════════════════════════════════════════════════════

    /// Register `pattern` (with an optional `filter`) for `session`.
    ///
    /// Relative patterns are taken from session level: `room1/*` is
    /// `/*/*/room1/*`. Unless `quiet`, the nodes currently matching are
    /// delivered as added entries, followed by their ordered indexes.
    ///
    /// Subscribing an already registered pattern only swaps its filter,
    /// and reports the nodes that became visible or invisible because of it.
    #[instrument(skip(self, filter), fields(session = %session, pattern = %pattern))]
    pub fn subscribe(
        &mut self,
        session: &str,
        pattern: &str,
        filter: Option<QueryFilter>,
        quiet: bool,
    ) -> Result<PutOutcome> {
        let _timer = LatencyTimer::new("subscribe");
        let result = self.subscribe_inner(session, pattern, filter, quiet);
        record_result("subscribe", &result);
        result
    }

    fn subscribe_inner(
        &mut self,
        session: &str,
        pattern: &str,
        filter: Option<QueryFilter>,
        quiet: bool,
    ) -> Result<PutOutcome> {
        let (sid, _, _) = self.session_context(session)?;
        let parsed = PathPattern::parse(pattern)?;
        let outcome = self
            .session_mut(session)?
            .subscriptions
            .put_pattern(parsed.clone(), filter.clone());

        match &outcome {
            PutOutcome::Added => {
                let touched = self.adjust_counts(&sid, &parsed, 1)?;
                debug!(touched, "Subscription added");
                if !quiet {
                    self.send_initial_values(session, &parsed, filter)?;
                }
            }
            PutOutcome::FilterChanged { previous } => {
                if !quiet {
                    let previous = previous.as_deref().cloned();
                    self.send_filter_diff(session, &parsed, previous)?;
                }
            }
            PutOutcome::Unchanged => {}
        }
        Ok(outcome)
    }

    /// Forget the subscriptions `pattern` selects for `session` and return
    /// how many went. The registration stored under exactly this pattern
    /// goes; a pattern with wildcards also takes every registered pattern
    /// whose text it matches (`room*` drops `room1/*` and `room2/msg`).
    /// Selecting nothing changes nothing.
    #[instrument(skip(self), fields(session = %session, pattern = %pattern))]
    pub fn unsubscribe(&mut self, session: &str, pattern: &str) -> Result<usize> {
        let result = self.unsubscribe_inner(session, pattern);
        record_result("unsubscribe", &result);
        result
    }

    fn unsubscribe_inner(&mut self, session: &str, pattern: &str) -> Result<usize> {
        let (sid, _, _) = self.session_context(session)?;
        let removed = self.session_mut(session)?.subscriptions.remove_matching(pattern)?;
        for entry in &removed {
            let touched = self.adjust_counts(&sid, entry.pattern(), -1)?;
            debug!(pattern = %entry.pattern(), touched, "Subscription removed");
        }
        Ok(removed.len())
    }

    /// Add `delta` to `sid`'s count on every node `pattern` matches by path.
    fn adjust_counts(&mut self, sid: &SessionId, pattern: &PathPattern, delta: i64) -> Result<usize> {
        let mut matcher = PathMatcher::new();
        matcher.put_pattern(pattern.clone(), None);
        let root = self.tree.root();
        let pool = &mut self.pool;
        let mut first_error = None;
        let outcome = matcher.traverse(&mut self.tree, root, false, self.traversal_mode, |tree, node, _| {
            let Some(current) = tree.get(node).map(|n| n.subscribers().clone()) else {
                return Visit::Continue;
            };
            match pool.resolve(&current, sid, delta) {
                Ok(set) => {
                    tree.set_subscribers(node, set);
                    Visit::Continue
                }
                Err(e) => {
                    first_error = Some(e);
                    Visit::Abort
                }
            }
        })?;
        match first_error {
            Some(e) => Err(e),
            None => Ok(outcome.visited),
        }
    }

    /// Every node `pattern` and `filter` currently select, with the payload
    /// the filter hands out and a copy of the node's ordered index.
    fn snapshot_matches(&mut self, pattern: &PathPattern, filter: Option<QueryFilter>) -> Result<Vec<Snapshot>> {
        let mut matcher = PathMatcher::new();
        matcher.put_pattern(pattern.clone(), filter);
        let root = self.tree.root();
        let mut snapshots = Vec::new();
        matcher.traverse(&mut self.tree, root, true, self.traversal_mode, |tree, node, payload| {
            snapshots.push(Snapshot {
                path: tree.path(node),
                payload: payload.clone(),
                index: tree.index_names(node),
            });
            Visit::Continue
        })?;
        Ok(snapshots)
    }

    /// Queue every node now visible through `pattern` as an added entry,
    /// plus a fresh copy of its ordered index.
    fn send_initial_values(&mut self, session: &str, pattern: &PathPattern, filter: Option<QueryFilter>) -> Result<()> {
        let snapshots = self.snapshot_matches(pattern, filter)?;
        let state = self.session_mut(session)?;
        if !state.subscriptions_enabled {
            return Ok(());
        }
        for snap in snapshots {
            state.queue_change(&snap.path, snap.payload, false);
            if let Some(names) = snap.index {
                for op in index::replay(names) {
                    state.queue_index_op(&snap.path, op);
                }
            }
        }
        Ok(())
    }

    /// After a filter swap on `pattern`, report the nodes whose visibility
    /// to `session` changed.
    fn send_filter_diff(
        &mut self,
        session: &str,
        pattern: &PathPattern,
        previous: Option<QueryFilter>,
    ) -> Result<()> {
        let state = self
            .sessions
            .get(session)
            .ok_or_else(|| ReflectError::NotFound(format!("session {session}")))?;
        let registry = &state.subscriptions;
        let mut before_registry = registry.clone();
        before_registry.put_pattern(pattern.clone(), previous);

        let mut matcher = PathMatcher::new();
        matcher.put_pattern(pattern.clone(), None);
        let root = self.tree.root();
        let mut added = Vec::new();
        let mut removed = Vec::new();
        matcher.traverse(&mut self.tree, root, false, self.traversal_mode, |tree, node, current| {
            let before = before_registry.matches_node(tree, node, ROOT_DEPTH, &mut current.clone());
            let mut now = current.clone();
            let after = registry.matches_node(tree, node, ROOT_DEPTH, &mut now);
            match (before, after) {
                (false, true) => added.push((tree.path(node), now)),
                (true, false) => removed.push(tree.path(node)),
                _ => {}
            }
            Visit::Continue
        })?;

        let state = self.session_mut(session)?;
        if !state.subscriptions_enabled {
            return Ok(());
        }
        debug!(added = added.len(), removed = removed.len(), "Filter replaced");
        for (path, payload) in added {
            state.queue_change(&path, payload, false);
        }
        for path in removed {
            state.queue_removal(&path);
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // API: Queries
    // ═══════════════════════════════════════════════════════════════════════

    /// Absolute paths and (retargeted) payloads of nodes matching `pattern`
    /// and `filter`, in traversal order, at most `max_results` of them.
    pub fn find_matching_nodes(
        &mut self,
        pattern: &str,
        filter: Option<QueryFilter>,
        max_results: Option<usize>,
    ) -> Result<Vec<(String, Payload)>> {
        let parsed = PathPattern::parse(pattern)?;
        let mut matcher = PathMatcher::new();
        matcher.put_pattern(parsed, filter);
        let max = max_results.unwrap_or(usize::MAX);
        let root = self.tree.root();

        let mut found = Vec::new();
        if max == 0 {
            return Ok(found);
        }
        matcher.traverse(&mut self.tree, root, true, self.traversal_mode, |tree, node, payload| {
            found.push((tree.path(node), payload.clone()));
            if found.len() >= max {
                Visit::Abort
            } else {
                Visit::Continue
            }
        })?;
        Ok(found)
    }

    /// Send the nodes matching `pattern` and `filter` straight to
    /// `session`: added entries in messages of at most the session's
    /// ceiling, then one message with the matched nodes' ordered indexes.
    ///
    /// This is a reply, not a subscription, so it ignores the session's
    /// notification settings. Whatever was pending for the session is
    /// flushed first. Returns the number of nodes sent.
    #[instrument(skip(self, filter), fields(session = %session, pattern = %pattern))]
    pub fn get_data(&mut self, session: &str, pattern: &str, filter: Option<QueryFilter>) -> Result<usize> {
        let _timer = LatencyTimer::new("get_data");
        let result = self.get_data_inner(session, pattern, filter);
        record_result("get_data", &result);
        result
    }

    fn get_data_inner(&mut self, session: &str, pattern: &str, filter: Option<QueryFilter>) -> Result<usize> {
        self.session_context(session)?;
        let parsed = PathPattern::parse(pattern)?;
        let snapshots = self.snapshot_matches(&parsed, filter)?;
        let sent = snapshots.len();

        let state = self.session_mut(session)?;
        state.flush(FlushReason::Request);
        let ceiling = state.batcher.ceiling();
        let mut data = UpdateMessage::default();
        let mut indexes = UpdateMessage::default();
        for snap in snapshots {
            if let Some(names) = snap.index {
                indexes.index_updates.insert(snap.path.clone(), index::replay(names));
            }
            data.changed.insert(snap.path, vec![snap.payload]);
            if data.changed.len() >= ceiling {
                state.outbox.enqueue(Outbound::Update(std::mem::take(&mut data)))?;
            }
        }
        for message in [data, indexes] {
            if !message.is_empty() {
                state.outbox.enqueue(Outbound::Update(message))?;
            }
        }
        debug!(sent, "Query results sent");
        Ok(sent)
    }

    /// Sessions owning at least one node that matches `pattern` and
    /// `filter`, at most `max_results` of them. An empty pattern selects
    /// every attached session.
    pub fn find_matching_sessions(
        &mut self,
        pattern: &str,
        filter: Option<QueryFilter>,
        max_results: Option<usize>,
    ) -> Result<Vec<SessionId>> {
        let max = max_results.unwrap_or(usize::MAX);
        if pattern.is_empty() {
            return Ok(self.sessions.keys().take(max).cloned().collect());
        }
        let parsed = PathPattern::parse(pattern)?;
        let mut matcher = PathMatcher::new();
        matcher.put_pattern(parsed, filter);
        let root = self.tree.root();

        let mut found = Vec::new();
        if max == 0 {
            return Ok(found);
        }
        let owners: BTreeMap<NodeId, SessionId> =
            self.sessions.values().map(|s| (s.anchor, s.id.clone())).collect();
        matcher.traverse(&mut self.tree, root, true, self.traversal_mode, |tree, node, _| {
            let owner = tree
                .ancestor_at_depth(node, SESSION_DEPTH)
                .and_then(|anchor| owners.get(&anchor));
            let Some(owner) = owner else {
                return Visit::Continue;
            };
            if !found.contains(owner) {
                found.push(owner.clone());
            }
            if found.len() >= max {
                Visit::Abort
            } else {
                // Nothing else under this session can add to the result
                Visit::SkipSubtree(SESSION_DEPTH)
            }
        })?;
        debug!(pattern, found = found.len(), "Matched sessions");
        Ok(found)
    }
}
