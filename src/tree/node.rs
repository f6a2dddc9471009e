//! A single element of the namespace.

use std::collections::BTreeMap;

use crate::payload::Payload;
use crate::pool::SubscriberSetRef;

/// Handle to a node slot in a [`super::NodeTree`].
///
/// Carries the slot generation, so a handle to a removed node never aliases
/// a node later allocated in the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) payload: Payload,
    /// name → child, owned by this node
    pub(crate) children: BTreeMap<String, NodeId>,
    /// Explicit ordering over a subset of children
    pub(crate) index: Option<Vec<NodeId>>,
    pub(crate) subscribers: SubscriberSetRef,
    /// Non-owning back-reference (None only for the root)
    pub(crate) parent: Option<NodeId>,
    pub(crate) depth: usize,
    /// Next candidate for auto-named ordered children (`I<n>`)
    pub(crate) next_ordered_id: u64,
}

impl Node {
    pub(crate) fn new(
        name: String,
        payload: Payload,
        parent: Option<NodeId>,
        depth: usize,
        subscribers: SubscriberSetRef,
    ) -> Self {
        Self {
            name,
            payload,
            children: BTreeMap::new(),
            index: None,
            subscribers,
            parent,
            depth,
            next_ordered_id: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Number of ancestors (root is 0).
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn child(&self, name: &str) -> Option<NodeId> {
        self.children.get(name).copied()
    }

    pub fn has_child(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn children(&self) -> impl Iterator<Item = (&str, NodeId)> {
        self.children.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Ordered index, if one was ever requested for this node.
    pub fn index(&self) -> Option<&[NodeId]> {
        self.index.as_deref()
    }

    pub fn subscribers(&self) -> &SubscriberSetRef {
        &self.subscribers
    }
}
