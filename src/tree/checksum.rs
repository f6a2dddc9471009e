// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Deterministic subtree digests for comparing replicas.
//!
//! Each node hashes its name, its payload's JSON and its children's digests
//! (sorted by name), followed by its ordered index. Two subtrees with the same
//! digest hold the same names, payloads and orderings.

use sha2::{Digest, Sha256};

use super::arena::NodeTree;
use super::node::NodeId;

impl NodeTree {
    /// SHA-256 digest of the subtree at `id`, descending at most `max_depth`
    /// levels below it. `None` if the node is gone.
    pub fn subtree_digest(&self, id: NodeId, max_depth: usize) -> Option<[u8; 32]> {
        let node = self.get(id)?;
        let mut hasher = Sha256::new();
        hasher.update(node.name.as_bytes());
        hasher.update(b"=");
        hasher.update(node.payload.value().to_string().as_bytes());
        hasher.update(b";");

        if max_depth > 0 {
            // BTreeMap keeps children sorted by name
            for (name, child) in &node.children {
                if let Some(child_hash) = self.subtree_digest(*child, max_depth - 1) {
                    hasher.update(name.as_bytes());
                    hasher.update(b":");
                    hasher.update(child_hash);
                    hasher.update(b";");
                }
            }
        }

        if let Some(ix) = &node.index {
            hasher.update(b"#");
            for child in ix {
                if let Some(n) = self.get(*child) {
                    hasher.update(n.name.as_bytes());
                    hasher.update(b",");
                }
            }
        }
        Some(hasher.finalize().into())
    }

    /// Hex form of [`Self::subtree_digest`].
    pub fn subtree_checksum(&self, id: NodeId, max_depth: usize) -> Option<String> {
        self.subtree_digest(id, max_depth).map(hex::encode)
    }
}
