// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Arena storage and structural mutations for the namespace.

use tracing::{debug, instrument};

use super::index::IndexOp;
use super::node::{Node, NodeId};
use super::{ChangeFlags, NodeQuota, TreeObserver};
use crate::error::{ReflectError, Result};
use crate::payload::Payload;
use crate::pool::SubscriberSetRef;

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<Node>,
}

/// Owner of every node in one namespace.
#[derive(Debug)]
pub struct NodeTree {
    slots: Vec<Slot>,
    /// Vacant slot indices, reused before growing
    free: Vec<u32>,
    root: NodeId,
    len: usize,
    /// Initial subscriber set of every new node
    empty_subscribers: SubscriberSetRef,
}

impl NodeTree {
    pub fn new(empty_subscribers: SubscriberSetRef) -> Self {
        let root = Node::new(String::new(), Payload::empty(), None, 0, empty_subscribers.clone());
        Self {
            slots: vec![Slot { generation: 0, node: Some(root) }],
            free: Vec::new(),
            root: NodeId { index: 0, generation: 0 },
            len: 1,
            empty_subscribers,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Live nodes, root included.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len <= 1
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.node.as_mut())
    }

    /// Like [`Self::get`], but a stale id is an error.
    pub fn node(&self, id: NodeId) -> Result<&Node> {
        self.get(id)
            .ok_or_else(|| ReflectError::NotFound(format!("node {}:{}", id.index, id.generation)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.get_mut(id)
            .ok_or_else(|| ReflectError::NotFound(format!("node {}:{}", id.index, id.generation)))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.get(id).is_some()
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeId { index, generation: slot.generation };
        }
        let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
        self.slots.push(Slot { generation: 0, node: Some(node) });
        NodeId { index, generation: 0 }
    }

    fn release(&mut self, id: NodeId) -> Option<Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(node)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Paths
    // ═══════════════════════════════════════════════════════════════════════

    /// Absolute path of a node: `/a/b/c` (root is `/`).
    pub fn path(&self, id: NodeId) -> String {
        let mut names = Vec::new();
        let mut cur = self.get(id);
        while let Some(node) = cur {
            if node.parent.is_none() {
                break;
            }
            names.push(node.name.as_str());
            cur = node.parent.and_then(|p| self.get(p));
        }
        if names.is_empty() {
            return "/".to_string();
        }
        names.iter().rev().fold(String::new(), |mut acc, n| {
            acc.push('/');
            acc.push_str(n);
            acc
        })
    }

    /// The ancestor of `id` (or `id` itself) sitting at `depth`.
    pub fn ancestor_at_depth(&self, id: NodeId, depth: usize) -> Option<NodeId> {
        let mut cur = id;
        loop {
            let node = self.get(cur)?;
            match node.depth.cmp(&depth) {
                std::cmp::Ordering::Equal => return Some(cur),
                std::cmp::Ordering::Less => return None,
                std::cmp::Ordering::Greater => cur = node.parent?,
            }
        }
    }

    /// Follow a `/`-separated relative path from `from`.
    pub fn resolve_path(&self, from: NodeId, relative: &str) -> Option<NodeId> {
        relative
            .split('/')
            .filter(|s| !s.is_empty())
            .try_fold(from, |cur, name| self.get(cur)?.child(name))
    }

    /// Look up an absolute path.
    pub fn find(&self, path: &str) -> Option<NodeId> {
        self.resolve_path(self.root, path)
    }

    /// Snapshot of a node's child ids, safe to hold across mutations.
    pub fn child_ids(&self, id: NodeId) -> Vec<NodeId> {
        self.get(id)
            .map(|n| n.children.values().copied().collect())
            .unwrap_or_default()
    }

    /// Names in a node's ordered index, in order.
    pub fn index_names(&self, id: NodeId) -> Option<Vec<String>> {
        let ix = self.get(id)?.index.as_ref()?;
        Some(
            ix.iter()
                .filter_map(|c| self.get(*c).map(|n| n.name.clone()))
                .collect(),
        )
    }

    pub(crate) fn set_subscribers(&mut self, id: NodeId, set: SubscriberSetRef) {
        if let Some(node) = self.get_mut(id) {
            node.subscribers = set;
        }
    }

    /// Replace a payload without telling anyone. Used by traversal to show a
    /// visitor a retargeted payload.
    pub(crate) fn swap_payload(&mut self, id: NodeId, payload: Payload) -> Option<Payload> {
        self.get_mut(id)
            .map(|node| std::mem::replace(&mut node.payload, payload))
    }

    /// Number of nodes in the subtree rooted at `id` (including it).
    pub fn subtree_size(&self, id: NodeId) -> usize {
        match self.get(id) {
            Some(node) => 1 + node.children.values().map(|c| self.subtree_size(*c)).sum::<usize>(),
            None => 0,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Mutations
    // ═══════════════════════════════════════════════════════════════════════

    /// Create a new child of `parent` named `name`.
    ///
    /// Fails with `AccessDenied` once `quota` is exhausted and `LogicError` if
    /// the name is already taken.
    pub fn put_child(
        &mut self,
        parent: NodeId,
        name: &str,
        payload: Payload,
        quota: &mut NodeQuota,
        observer: &mut dyn TreeObserver,
        flags: ChangeFlags,
    ) -> Result<NodeId> {
        validate_name(name)?;
        let parent_node = self.node(parent)?;
        if parent_node.has_child(name) {
            return Err(ReflectError::LogicError(format!(
                "child '{name}' already exists under {}",
                self.path(parent)
            )));
        }
        let depth = parent_node.depth + 1;
        quota.try_acquire()?;

        let node = Node::new(name.to_string(), payload, Some(parent), depth, self.empty_subscribers.clone());
        let id = self.alloc(node);
        self.node_mut(parent)?.children.insert(name.to_string(), id);

        observer.node_created(self, id);
        if !flags.quiet {
            observer.node_changed(self, id, None, flags.supersede);
        }
        Ok(id)
    }

    /// Replace a node's payload and report it.
    pub fn set_data(
        &mut self,
        id: NodeId,
        payload: Payload,
        is_creation: bool,
        observer: &mut dyn TreeObserver,
        flags: ChangeFlags,
    ) -> Result<()> {
        let old = std::mem::replace(&mut self.node_mut(id)?.payload, payload);
        if !flags.quiet {
            let old = if is_creation { None } else { Some(&old) };
            observer.node_changed(self, id, old, flags.supersede);
        }
        Ok(())
    }

    /// Remove the child `name` of `parent` along with its whole subtree.
    ///
    /// Descendants are reported before their ancestors. Returns the number of
    /// nodes removed; `quota` is decremented by the same amount. Does not
    /// prune `parent` even if it is left empty.
    #[instrument(skip(self, quota, observer), fields(parent = ?parent))]
    pub fn remove_child(
        &mut self,
        parent: NodeId,
        name: &str,
        quota: &mut NodeQuota,
        observer: &mut dyn TreeObserver,
        flags: ChangeFlags,
    ) -> Result<usize> {
        let id = self
            .node(parent)?
            .child(name)
            .ok_or_else(|| ReflectError::NotFound(format!("{}/{name}", self.path(parent))))?;

        let mut removed = 0;
        for child in self.child_ids(id) {
            removed += self.discard(child, observer, flags);
        }
        if !flags.quiet {
            observer.node_removing(self, id);
        }

        let parent_node = self.node_mut(parent)?;
        parent_node.children.remove(name);
        let index_pos = match parent_node.index.as_mut() {
            Some(ix) => ix.iter().position(|c| *c == id).map(|pos| {
                ix.remove(pos);
                pos
            }),
            None => None,
        };
        if let Some(pos) = index_pos {
            observer.index_changed(self, parent, &IndexOp::Removed { index: pos, name: name.to_string() });
        }

        self.release(id);
        removed += 1;
        quota.release(removed);
        debug!(name, removed, "Removed subtree");
        Ok(removed)
    }

    /// Drop a node whose ancestor is being removed. Its own parent's index
    /// goes away with the ancestor, so no index tokens are produced.
    fn discard(&mut self, id: NodeId, observer: &mut dyn TreeObserver, flags: ChangeFlags) -> usize {
        let mut removed = 0;
        for child in self.child_ids(id) {
            removed += self.discard(child, observer, flags);
        }
        if let Some(node) = self.get_mut(id) {
            node.children.clear();
            node.index = None;
        }
        if !flags.quiet {
            observer.node_removing(self, id);
        }
        if self.release(id).is_some() {
            removed += 1;
        }
        removed
    }

    /// Create a child and insert it into `parent`'s ordered index, before
    /// `before` if that names an indexed child, else at the end.
    ///
    /// Without an explicit `name` the child is called `I<n>` with the first
    /// unused `n`.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_ordered_child(
        &mut self,
        parent: NodeId,
        payload: Payload,
        before: Option<&str>,
        name: Option<&str>,
        quota: &mut NodeQuota,
        observer: &mut dyn TreeObserver,
        flags: ChangeFlags,
    ) -> Result<NodeId> {
        let name = match name {
            Some(n) => n.to_string(),
            None => self.next_ordered_name(parent)?,
        };
        let id = self.put_child(parent, &name, payload, quota, observer, flags)?;

        let position = before.and_then(|b| self.index_position_of(parent, b));
        let parent_node = self.node_mut(parent)?;
        let ix = parent_node.index.get_or_insert_with(Vec::new);
        let position = position.unwrap_or(ix.len()).min(ix.len());
        ix.insert(position, id);

        observer.index_changed(self, parent, &IndexOp::Inserted { index: position, name });
        Ok(id)
    }

    /// Move an indexed child to just before `before` (or to the end).
    /// Returns the child's new position.
    pub fn reorder_child(
        &mut self,
        parent: NodeId,
        name: &str,
        before: Option<&str>,
        observer: &mut dyn TreeObserver,
    ) -> Result<usize> {
        let parent_path = self.path(parent);
        let from = self
            .index_position_of(parent, name)
            .ok_or_else(|| ReflectError::NotFound(format!("{parent_path}/{name} is not indexed")))?;
        if before == Some(name) {
            return Ok(from);
        }

        let ix = self
            .node_mut(parent)?
            .index
            .as_mut()
            .ok_or_else(|| ReflectError::LogicError(format!("{parent_path} lost its index")))?;
        let id = ix.remove(from);
        let target = before
            .and_then(|b| self.index_position_of(parent, b))
            .unwrap_or(usize::MAX);

        let ix = self
            .node_mut(parent)?
            .index
            .get_or_insert_with(Vec::new);
        let target = target.min(ix.len());
        ix.insert(target, id);

        observer.index_changed(self, parent, &IndexOp::Moved { index: target, name: name.to_string() });
        Ok(target)
    }

    fn index_position_of(&self, parent: NodeId, name: &str) -> Option<usize> {
        let ix = self.get(parent)?.index.as_ref()?;
        ix.iter()
            .position(|c| self.get(*c).is_some_and(|n| n.name == name))
    }

    fn next_ordered_name(&mut self, parent: NodeId) -> Result<String> {
        let node = self.node_mut(parent)?;
        loop {
            let candidate = format!("I{}", node.next_ordered_id);
            node.next_ordered_id += 1;
            if !node.children.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
    }
}

/// Node names are non-empty and never contain `/`.
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(ReflectError::BadObject(format!("invalid node name '{name}'")));
    }
    Ok(())
}
