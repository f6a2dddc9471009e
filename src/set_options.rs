// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Caller-controlled flags for [`crate::Reflector::set_node`].
//!
//! # Example
//!
//! ```rust
//! use reflect_engine::SetNodeFlags;
//!
//! // Default: create missing nodes, overwrite existing payloads, notify
//! let opts = SetNodeFlags::default();
//! assert!(opts.creates());
//!
//! // Update-only: fail if the node doesn't exist yet
//! let opts = SetNodeFlags::update_only();
//! assert!(!opts.creates());
//!
//! // Chatty state that only the latest value matters for
//! let opts = SetNodeFlags::default().with_supersede();
//! assert!(opts.supersede);
//! ```

use serde::{Deserialize, Serialize};

/// Flags controlling how a node write behaves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SetNodeFlags {
    /// Error out instead of creating missing nodes (leaf or intermediate).
    ///
    /// Default: `false`
    #[serde(default)]
    pub dont_create: bool,

    /// Error out instead of replacing the payload of an existing node.
    ///
    /// Default: `false`
    #[serde(default)]
    pub dont_overwrite: bool,

    /// Suppress the change notifications this write would produce.
    ///
    /// Subscriber counts are still maintained for created nodes.
    ///
    /// Default: `false`
    #[serde(default)]
    pub quiet: bool,

    /// Add the new node to the parent's ordered index instead of only
    /// the children map.
    ///
    /// Default: `false`
    #[serde(default)]
    pub add_to_index: bool,

    /// Let this update replace (not append to) still-pending earlier
    /// updates for the same path.
    ///
    /// Default: `false`
    #[serde(default)]
    pub supersede: bool,
}

impl SetNodeFlags {
    /// Only overwrite nodes that already exist.
    #[must_use]
    pub fn update_only() -> Self {
        Self {
            dont_create: true,
            ..Self::default()
        }
    }

    /// Only create nodes that don't exist yet.
    #[must_use]
    pub fn create_only() -> Self {
        Self {
            dont_overwrite: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    #[must_use]
    pub fn with_supersede(mut self) -> Self {
        self.supersede = true;
        self
    }

    #[must_use]
    pub fn with_index(mut self) -> Self {
        self.add_to_index = true;
        self
    }

    /// Returns true if missing nodes may be created.
    #[must_use]
    pub fn creates(&self) -> bool {
        !self.dont_create
    }

    /// Returns true if subscribers should hear about this write.
    #[must_use]
    pub fn notifies(&self) -> bool {
        !self.quiet
    }
}
