// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Session attach/detach and per-session state.

use tracing::{debug, info, instrument, warn};

use super::pipeline::Notifier;
use super::types::SessionInfo;
use super::Reflector;
use crate::config::ReflectorConfig;
use crate::error::{ReflectError, Result};
use crate::filter::QueryFilter;
use crate::matcher::{PathPattern, SubscriptionRegistry, Visit};
use crate::notify::{erase_queued_changes, jettison_queued, FlushReason, Outbound, Outbox, UpdateBatcher};
use crate::payload::Payload;
use crate::session_id::SessionId;
use crate::tree::{validate_name, ChangeFlags, IndexOp, NodeId, NodeQuota};

/// Everything the reflector tracks for one attached session.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub(crate) id: SessionId,
    pub(crate) host: String,
    /// `/host/id`
    pub(crate) anchor: NodeId,
    pub(crate) subscriptions: SubscriptionRegistry,
    pub(crate) quota: NodeQuota,
    pub(crate) batcher: UpdateBatcher,
    /// Per-session ceiling, overriding the configured one
    pub(crate) max_items_override: Option<usize>,
    pub(crate) outbox: Box<dyn Outbox>,
    pub(crate) reflect_to_self: bool,
    pub(crate) subscriptions_enabled: bool,
}

impl SessionState {
    fn new(id: SessionId, host: String, anchor: NodeId, outbox: Box<dyn Outbox>, config: &ReflectorConfig) -> Self {
        Self {
            id,
            host,
            anchor,
            subscriptions: SubscriptionRegistry::new(),
            quota: NodeQuota::new(config.max_nodes_per_session),
            batcher: UpdateBatcher::new(config.max_update_message_items),
            max_items_override: None,
            outbox,
            reflect_to_self: config.reflect_to_self,
            subscriptions_enabled: true,
        }
    }

    /// Queue an added/changed payload, flushing as ordering and the
    /// ceiling require.
    pub(crate) fn queue_change(&mut self, path: &str, payload: Payload, supersede: bool) {
        if supersede {
            let erased = erase_queued_changes(self.outbox.as_mut(), path);
            if erased > 0 {
                crate::metrics::record_superseded(erased);
            }
        }
        let mut reason = self.batcher.add_change(path, payload.clone(), supersede);
        if reason == Some(FlushReason::Ordering) {
            self.flush(FlushReason::Ordering);
            reason = self.batcher.add_change(path, payload, supersede);
        }
        if let Some(reason) = reason {
            self.flush(reason);
        }
    }

    pub(crate) fn queue_removal(&mut self, path: &str) {
        let mut reason = self.batcher.add_removal(path);
        if reason == Some(FlushReason::Ordering) {
            self.flush(FlushReason::Ordering);
            reason = self.batcher.add_removal(path);
        }
        if let Some(reason) = reason {
            self.flush(reason);
        }
    }

    pub(crate) fn queue_index_op(&mut self, path: &str, op: IndexOp) {
        self.batcher.add_index_op(path, op);
    }

    /// Deliver whatever is pending. Returns the number of items delivered.
    pub(crate) fn flush(&mut self, reason: FlushReason) -> usize {
        let Some(batch) = self.batcher.take(reason) else {
            return 0;
        };
        crate::metrics::record_flush(reason, batch.items);
        if let Err(e) = self.outbox.enqueue(Outbound::Update(batch.message)) {
            warn!(session = %self.id, error = %e, "Dropping update batch");
            crate::metrics::record_delivery_failure();
        }
        batch.items
    }

    pub(crate) fn apply_ceiling(&mut self, config: &ReflectorConfig) {
        self.batcher
            .set_ceiling(self.max_items_override.unwrap_or(config.max_update_message_items));
    }
}

impl Reflector {
    // ═══════════════════════════════════════════════════════════════════════
    // Session lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Attach a session under `/host/id`, creating the host anchor if needed.
    ///
    /// `host` defaults to the configured host name. Fails with `LogicError`
    /// if a session with this id is already attached.
    #[instrument(skip(self, outbox), fields(session = %id))]
    pub fn attach(&mut self, id: SessionId, host: Option<&str>, outbox: Box<dyn Outbox>) -> Result<NodeId> {
        if self.sessions.contains_key(&id) {
            return Err(ReflectError::LogicError(format!("session {id} already attached")));
        }
        let host = host.unwrap_or(&self.config.host_name).to_string();
        // Both anchors must be valid before either is created
        validate_name(&host)?;
        validate_name(id.as_str())?;

        let Self { tree, pool, sessions, hooks, .. } = self;
        let mut notifier = Notifier::new(pool, sessions, hooks, Some(id.clone()));
        // Anchors don't count against anyone's quota
        let mut anchors = NodeQuota::unlimited();
        let root = tree.root();
        let host_node = match tree.node(root)?.child(&host) {
            Some(h) => h,
            None => tree.put_child(root, &host, Payload::empty(), &mut anchors, &mut notifier, ChangeFlags::default())?,
        };
        let anchor = tree.put_child(host_node, id.as_str(), Payload::empty(), &mut anchors, &mut notifier, ChangeFlags::default())?;

        let state = SessionState::new(id.clone(), host.clone(), anchor, outbox, &self.config);
        self.sessions.insert(id, state);

        info!(host = %host, "Session attached");
        crate::metrics::set_session_count(self.sessions.len());
        crate::metrics::set_node_count(self.tree.len());
        Ok(anchor)
    }

    /// Detach a session: forget its subscriptions, remove its subtree (and
    /// the host anchor if that leaves it empty), purge it from the pool and
    /// deliver its last pending batch.
    #[instrument(skip(self), fields(session = %id))]
    pub fn detach(&mut self, id: &str) -> Result<()> {
        let mut state = self
            .sessions
            .remove(id)
            .ok_or_else(|| ReflectError::NotFound(format!("session {id}")))?;

        // Zero this session's counts wherever its patterns matched
        let root = self.tree.root();
        let mode = self.traversal_mode;
        let pool = &mut self.pool;
        let sid = state.id.clone();
        let mut failures = 0;
        state
            .subscriptions
            .traverse(&mut self.tree, root, false, mode, |tree, node, _| {
                let Some(current) = tree.get(node).map(|n| n.subscribers().clone()) else {
                    return Visit::Continue;
                };
                let count = i64::from(current.count(sid.as_str()));
                match pool.resolve(&current, &sid, -count) {
                    Ok(set) => tree.set_subscribers(node, set),
                    Err(_) => failures += 1,
                }
                Visit::Continue
            })?;
        if failures > 0 {
            warn!(failures, "Could not release some subscriber counts");
        }
        state.subscriptions.clear();

        let Self { tree, pool, sessions, hooks, .. } = self;
        let mut notifier = Notifier::new(pool, sessions, hooks, Some(state.id.clone()));
        let mut anchors = NodeQuota::unlimited();
        if let Some(host_node) = tree.get(state.anchor).and_then(|n| n.parent()) {
            tree.remove_child(host_node, state.id.as_str(), &mut anchors, &mut notifier, ChangeFlags::default())?;
            let host_empty = tree.get(host_node).is_some_and(|h| h.child_count() == 0);
            if host_empty {
                tree.remove_child(root, &state.host, &mut anchors, &mut notifier, ChangeFlags::default())?;
            }
        }

        let dropped = self.pool.drop_entries_containing(&state.id);
        state.flush(FlushReason::Detach);

        info!(dropped_sets = dropped, "Session detached");
        crate::metrics::set_session_count(self.sessions.len());
        crate::metrics::set_node_count(self.tree.len());
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Per-session settings
    // ═══════════════════════════════════════════════════════════════════════

    pub(crate) fn session_mut(&mut self, id: &str) -> Result<&mut SessionState> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| ReflectError::NotFound(format!("session {id}")))
    }

    /// Whether `id` sees its own changes through its wildcard subscriptions.
    pub fn set_reflect_to_self(&mut self, id: &str, enabled: bool) -> Result<()> {
        self.session_mut(id)?.reflect_to_self = enabled;
        Ok(())
    }

    /// Stop (or resume) accumulating notifications for `id`.
    pub fn set_subscriptions_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        self.session_mut(id)?.subscriptions_enabled = enabled;
        Ok(())
    }

    /// Override the flush ceiling for one session (`None` restores the
    /// configured value).
    pub fn set_max_update_items(&mut self, id: &str, max_items: Option<usize>) -> Result<()> {
        let config = self.config.clone();
        let session = self.session_mut(id)?;
        session.max_items_override = max_items;
        session.apply_ceiling(&config);
        Ok(())
    }

    /// Change the node quota of one session. Nodes already owned are kept
    /// even if they exceed the new limit.
    pub fn set_node_quota(&mut self, id: &str, max_nodes: u32) -> Result<()> {
        self.session_mut(id)?.quota.max = max_nodes;
        Ok(())
    }

    pub fn session_info(&self, id: &str) -> Option<SessionInfo> {
        let s = self.sessions.get(id)?;
        Some(SessionInfo {
            id: s.id.clone(),
            host: s.host.clone(),
            path: self.tree.path(s.anchor),
            node_count: s.quota.used,
            max_nodes: s.quota.max,
            subscription_count: s.subscriptions.len(),
            reflect_to_self: s.reflect_to_self,
            subscriptions_enabled: s.subscriptions_enabled,
        })
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &SessionId> {
        self.sessions.keys()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// The session's subscription registry.
    pub fn subscriptions(&self, id: &str) -> Option<&SubscriptionRegistry> {
        self.sessions.get(id).map(|s| &s.subscriptions)
    }

    /// Drain whatever the session's outbox still holds, if it exposes its
    /// queue.
    pub fn take_outgoing(&mut self, id: &str) -> Vec<Outbound> {
        self.sessions
            .get_mut(id)
            .and_then(|s| s.outbox.queued_mut())
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    /// Flush one session's pending batch.
    pub fn flush(&mut self, id: &str) -> Result<usize> {
        Ok(self.session_mut(id)?.flush(FlushReason::Request))
    }

    /// Flush every session's pending batch. Returns total items delivered.
    pub fn flush_all(&mut self) -> usize {
        self.sessions
            .values_mut()
            .map(|s| s.flush(FlushReason::Request))
            .sum()
    }

    /// Send `message` to `id` after whatever is already pending for it.
    pub(crate) fn reply(&mut self, id: &str, message: Outbound) -> Result<()> {
        let state = self.session_mut(id)?;
        // Pending items were caused by earlier requests; keep them first
        state.flush(FlushReason::Request);
        state.outbox.enqueue(message)
    }

    /// Drop results not yet delivered to `id`, both the pending batch and
    /// whatever its outbox still queues. `pattern` selects by absolute path
    /// (`None` selects everything) and `filter` by payload. Removals are
    /// selected by path alone. Index updates are kept.
    ///
    /// Returns the number of payloads and removals dropped.
    #[instrument(skip(self, filter), fields(session = %id))]
    pub fn jettison_results(&mut self, id: &str, pattern: Option<&str>, filter: Option<QueryFilter>) -> Result<usize> {
        let pattern = pattern.map(PathPattern::parse).transpose()?;
        let Self { tree, sessions, .. } = self;
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| ReflectError::NotFound(format!("session {id}")))?;

        let mut selected = |path: &str, payload: Option<&Payload>| {
            if pattern.as_ref().is_some_and(|p| !p.matches_path(path)) {
                return false;
            }
            match (&filter, payload) {
                (Some(filter), Some(payload)) => {
                    let children = tree
                        .find(path)
                        .and_then(|node| tree.get(node))
                        .map_or(0, |node| node.child_count());
                    filter.test(payload, children)
                }
                _ => true,
            }
        };
        let dropped = state.batcher.jettison(&mut selected) + jettison_queued(state.outbox.as_mut(), &mut selected);

        debug!(dropped, "Jettisoned undelivered results");
        crate::metrics::record_jettisoned(dropped);
        Ok(dropped)
    }
}
