// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Hierarchical namespace.
//!
//! Nodes live in an arena owned by [`NodeTree`]; parents own their children
//! by id and children point back at their parent by id, so there is never a
//! pair of mutually owning references.
//!
//! ```text
//! /                                   depth 0  (root)
//! └── hostA                           depth 1  (host anchor)
//!     └── sess-Z                      depth 2  (session anchor)
//!         └── room1                   depth 3
//!             ├── msg1                depth 4
//!             └── msg2
//! ```
//!
//! Every mutating call reports to a [`TreeObserver`] once the change is
//! committed. Removals are reported just before the node is detached, so the
//! observer can still walk the node's path.

mod arena;
mod checksum;
pub mod index;
mod node;

pub use arena::NodeTree;
pub(crate) use arena::validate_name;
pub use index::IndexOp;
pub use node::{Node, NodeId};

use crate::error::{ReflectError, Result};
use crate::payload::Payload;

/// Notification-related flags for a single mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    /// Skip data-change notifications (subscriber counts are still kept)
    pub quiet: bool,
    /// Later update may overwrite earlier still-pending ones
    pub supersede: bool,
}

impl ChangeFlags {
    pub fn quiet() -> Self {
        Self { quiet: true, supersede: false }
    }
}

/// Receives mutation events from a [`NodeTree`].
///
/// Every method gets the tree back mutably, so an observer can recompute
/// subscriber sets on the node it is told about.
pub trait TreeObserver {
    /// A node was attached to its parent (always reported, even when quiet).
    fn node_created(&mut self, _tree: &mut NodeTree, _node: NodeId) {}

    /// A node's payload was set. `old` is `None` for freshly created nodes.
    fn node_changed(&mut self, _tree: &mut NodeTree, _node: NodeId, _old: Option<&Payload>, _supersede: bool) {}

    /// A node is about to be detached and dropped.
    fn node_removing(&mut self, _tree: &mut NodeTree, _node: NodeId) {}

    /// The ordered index of `node` changed.
    fn index_changed(&mut self, _tree: &mut NodeTree, _node: NodeId, _op: &IndexOp) {}
}

/// Observer that ignores everything.
impl TreeObserver for () {}

/// Caller-supplied node counter, checked on every node creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeQuota {
    pub used: u32,
    pub max: u32,
}

impl NodeQuota {
    pub fn new(max: u32) -> Self {
        Self { used: 0, max }
    }

    pub fn unlimited() -> Self {
        Self::new(u32::MAX)
    }

    pub fn remaining(&self) -> u32 {
        self.max.saturating_sub(self.used)
    }

    pub(crate) fn try_acquire(&mut self) -> Result<()> {
        if self.used >= self.max {
            return Err(ReflectError::AccessDenied(format!(
                "node quota of {} reached",
                self.max
            )));
        }
        self.used += 1;
        Ok(())
    }

    pub(crate) fn release(&mut self, count: usize) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.used = self.used.saturating_sub(count);
    }
}
