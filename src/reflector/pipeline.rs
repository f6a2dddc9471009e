// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Turns tree mutations into per-session updates.
//!
//! ```text
//!  NodeTree mutation
//!        │  (TreeObserver)
//!        ▼
//!  ┌────────────┐  created ──► recount every session's matches on the node
//!  │  Notifier  │  changed ──► per subscriber: filter(old) vs filter(new)
//!  └────────────┘  removing ─► per subscriber: removed, if filter(old) held
//!        │         index ────► per subscriber: one token
//!        ▼
//!  SessionState::queue_* ──► UpdateBatcher ──► Outbox
//! ```
//!
//! | before | now   | sent      |
//! |--------|-------|-----------|
//! | false  | false | nothing   |
//! | false  | true  | added     |
//! | true   | true  | changed   |
//! | true   | false | removed   |
//!
//! "Added" and "changed" are both a payload entry for the path; they only
//! differ from the receiver's point of view.

use std::collections::BTreeMap;

use tracing::warn;

use super::session::SessionState;
use super::types::ReflectorHooks;
use crate::payload::Payload;
use crate::pool::SubscriberSetPool;
use crate::session_id::SessionId;
use crate::tree::{IndexOp, NodeId, NodeTree, TreeObserver};

/// Subscriptions are anchored at the namespace root.
const ROOT_DEPTH: usize = 0;

pub(crate) struct Notifier<'a> {
    pool: &'a mut SubscriberSetPool,
    sessions: &'a mut BTreeMap<SessionId, SessionState>,
    hooks: &'a mut Option<Box<dyn ReflectorHooks>>,
    /// Session whose request caused the mutation
    origin: Option<SessionId>,
}

impl<'a> Notifier<'a> {
    pub(crate) fn new(
        pool: &'a mut SubscriberSetPool,
        sessions: &'a mut BTreeMap<SessionId, SessionState>,
        hooks: &'a mut Option<Box<dyn ReflectorHooks>>,
        origin: Option<SessionId>,
    ) -> Self {
        Self { pool, sessions, hooks, origin }
    }

    /// Sessions that take data notifications for `node`, with their ids.
    fn data_subscribers(&self, tree: &NodeTree, node: NodeId) -> Vec<SessionId> {
        let Some(n) = tree.get(node) else {
            return Vec::new();
        };
        n.subscribers()
            .sessions()
            .filter(|sid| {
                self.sessions.get(sid.as_str()).is_some_and(|s| {
                    s.subscriptions_enabled && (s.reflect_to_self || self.origin.as_ref() != Some(*sid))
                })
            })
            .cloned()
            .collect()
    }
}

impl TreeObserver for Notifier<'_> {
    fn node_created(&mut self, tree: &mut NodeTree, node: NodeId) {
        let Some(mut set) = tree.get(node).map(|n| n.subscribers().clone()) else {
            return;
        };
        for (sid, session) in self.sessions.iter() {
            let count = session.subscriptions.match_count(tree, node, ROOT_DEPTH);
            if count == 0 {
                continue;
            }
            let delta = i64::try_from(count).unwrap_or(i64::MAX);
            match self.pool.resolve(&set, sid, delta) {
                Ok(next) => set = next,
                Err(e) => warn!(session = %sid, error = %e, "Subscriber count not recorded"),
            }
        }
        tree.set_subscribers(node, set);

        if let Some(hooks) = self.hooks.as_mut() {
            if let Some(n) = tree.get(node) {
                hooks.on_node_created(&tree.path(node), n.payload());
            }
        }
    }

    fn node_changed(&mut self, tree: &mut NodeTree, node: NodeId, old: Option<&Payload>, supersede: bool) {
        let Some(new) = tree.get(node).map(|n| n.payload().clone()) else {
            return;
        };
        let path = tree.path(node);
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.on_node_changed(&path, old, &new);
        }

        for sid in self.data_subscribers(tree, node) {
            let Some(session) = self.sessions.get_mut(sid.as_str()) else {
                continue;
            };
            let registry = &session.subscriptions;
            let before = old.is_some_and(|old| registry.matches_node(tree, node, ROOT_DEPTH, &mut old.clone()));
            let mut now = new.clone();
            let after = registry.matches_node(tree, node, ROOT_DEPTH, &mut now);

            match (before, after) {
                (_, true) => session.queue_change(&path, now, supersede),
                (true, false) => session.queue_removal(&path),
                (false, false) => {}
            }
        }
    }

    fn node_removing(&mut self, tree: &mut NodeTree, node: NodeId) {
        let Some(current) = tree.get(node).map(|n| n.payload().clone()) else {
            return;
        };
        let path = tree.path(node);
        for sid in self.data_subscribers(tree, node) {
            let Some(session) = self.sessions.get_mut(sid.as_str()) else {
                continue;
            };
            // Nobody hears about the removal of something they never saw
            if session.subscriptions.matches_node(tree, node, ROOT_DEPTH, &mut current.clone()) {
                session.queue_removal(&path);
            }
        }
    }

    fn index_changed(&mut self, tree: &mut NodeTree, node: NodeId, op: &IndexOp) {
        let path = tree.path(node);
        if let Some(hooks) = self.hooks.as_mut() {
            hooks.on_node_index_changed(&path, op);
        }
        let Some(subscribers) = tree.get(node).map(|n| n.subscribers().clone()) else {
            return;
        };
        for sid in subscribers.sessions() {
            if let Some(session) = self.sessions.get_mut(sid.as_str()) {
                if session.subscriptions_enabled {
                    session.queue_index_op(&path, op.clone());
                }
            }
        }
    }
}
