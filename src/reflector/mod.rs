// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The reflection core.
//!
//! The [`Reflector`] ties together the namespace, the subscriber-set pool
//! and the attached sessions. One instance per server; it is never global.
//!
//! # Request flow
//!
//! ```text
//! client request ─► Reflector::execute ─► NodeTree mutation
//!                                             │ TreeObserver
//!                                             ▼
//!                                         Notifier ─► per-session UpdateBatcher
//!                                                          │ ceiling / ordering
//!                                                          ▼
//!                          end of request ─► flush ─► Outbox (per session)
//! ```
//!
//! # Example
//!
//! ```rust
//! use reflect_engine::{Payload, QueueOutbox, Reflector, ReflectorConfig, SessionId, SetNodeFlags};
//! use serde_json::json;
//!
//! let mut reflector = Reflector::new(ReflectorConfig::default());
//! reflector.attach(SessionId::from("alice"), Some("hostA"), Box::new(QueueOutbox::new())).unwrap();
//! reflector.attach(SessionId::from("bob"), Some("hostB"), Box::new(QueueOutbox::new())).unwrap();
//!
//! reflector.subscribe("bob", "room1/*", None, true).unwrap();
//! reflector
//!     .set_node("alice", "room1/msg1", Payload::new(json!({"text": "hi"})), SetNodeFlags::default())
//!     .unwrap();
//! reflector.flush_all();
//!
//! let outgoing = reflector.take_outgoing("bob");
//! let update = outgoing[0].as_update().unwrap();
//! assert!(update.changed.contains_key("/hostA/alice/room1/msg1"));
//! ```

mod data_api;
mod dispatch;
mod pipeline;
mod session;
mod subscribe_api;
mod types;

pub use types::{Command, CommandOutcome, ReflectorHooks, SessionInfo};

use std::collections::BTreeMap;

use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ReflectorConfig;
use crate::error::{ReflectError, Result};
use crate::matcher::TraversalMode;
use crate::pool::{PoolStats, SubscriberSetPool};
use crate::session_id::SessionId;
use crate::tree::NodeTree;

use session::SessionState;

/// Shared state of one reflection server.
///
/// Single-threaded: every operation runs to completion on `&mut self`.
pub struct Reflector {
    /// Active configuration
    pub(super) config: ReflectorConfig,

    /// Runtime config updates, applied at request boundaries
    pub(super) config_rx: Option<watch::Receiver<ReflectorConfig>>,

    pub(super) tree: NodeTree,

    pub(super) pool: SubscriberSetPool,

    pub(super) sessions: BTreeMap<SessionId, SessionState>,

    pub(super) hooks: Option<Box<dyn ReflectorHooks>>,

    /// Child-selection strategy for every traversal
    pub(super) traversal_mode: TraversalMode,
}

impl Reflector {
    pub fn new(config: ReflectorConfig) -> Self {
        let pool = SubscriberSetPool::new(config.pool_max_cached_sets, config.pool_max_cacheable_set_size);
        let tree = NodeTree::new(pool.empty_set());
        Self {
            config,
            config_rx: None,
            tree,
            pool,
            sessions: BTreeMap::new(),
            hooks: None,
            traversal_mode: TraversalMode::Auto,
        }
    }

    /// Like [`Self::new`], picking up later configs from `config_rx` at
    /// each [`Self::apply_config_updates`].
    pub fn with_config_updates(config: ReflectorConfig, config_rx: watch::Receiver<ReflectorConfig>) -> Self {
        let mut reflector = Self::new(config);
        reflector.config_rx = Some(config_rx);
        reflector
    }

    #[must_use]
    pub fn config(&self) -> &ReflectorConfig {
        &self.config
    }

    /// Apply a config pushed through the watch channel, if any.
    /// Returns true if a new config was applied.
    pub fn apply_config_updates(&mut self) -> bool {
        let Some(rx) = self.config_rx.as_mut() else {
            return false;
        };
        if !rx.has_changed().unwrap_or(false) {
            return false;
        }
        let new_config = rx.borrow_and_update().clone();
        self.apply_config(new_config);
        true
    }

    /// Replace the active configuration. Existing sessions keep their
    /// quotas and reflect-to-self flags; ceilings without a per-session
    /// override follow the new value.
    pub fn apply_config(&mut self, config: ReflectorConfig) {
        if config == self.config {
            return;
        }
        self.pool
            .resize(config.pool_max_cached_sets, config.pool_max_cacheable_set_size);
        for session in self.sessions.values_mut() {
            session.apply_ceiling(&config);
        }
        info!(
            max_update_message_items = config.max_update_message_items,
            pool_max_cached_sets = config.pool_max_cached_sets,
            "Reflector config updated"
        );
        self.config = config;
    }

    /// Install the server-side observer hooks.
    pub fn set_hooks(&mut self, hooks: Box<dyn ReflectorHooks>) {
        self.hooks = Some(hooks);
    }

    pub fn clear_hooks(&mut self) {
        self.hooks = None;
    }

    /// Force full scans instead of direct child lookups. Results are the
    /// same either way.
    pub fn set_traversal_mode(&mut self, mode: TraversalMode) {
        debug!(?mode, "Traversal mode set");
        self.traversal_mode = mode;
    }

    #[must_use]
    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    /// Live nodes, root included.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.tree.len()
    }

    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Hex SHA-256 of the subtree at absolute `path`, at most `max_depth`
    /// levels deep.
    pub fn checksum(&self, path: &str, max_depth: usize) -> Result<String> {
        self.tree
            .find(path)
            .and_then(|id| self.tree.subtree_checksum(id, max_depth))
            .ok_or_else(|| ReflectError::NotFound(path.to_string()))
    }
}
