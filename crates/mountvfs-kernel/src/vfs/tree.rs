//! Mount tree.
//!
//! An arena of nodes keyed by path segment. Each node may be bound to at
//! most one provider. Nodes that are neither bound nor hold children are
//! pruned as soon as they become empty; the root is always kept.
//!
//! ```text
//! /                (root, unbound)
//! ├── mnt          (virtual)
//! │   ├── a1f      -> provider a1f0…
//! │   └── 7c2      -> provider 7c29…
//! └── tmp          -> provider tmpfs
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use super::error::{VfsError, VfsResult};
use super::path;
use super::provider::Provider;

/// Index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

impl NodeId {
    /// The root node. Always present.
    pub const ROOT: NodeId = NodeId(0);
}

struct MountNode {
    children: BTreeMap<String, NodeId>,
    provider: Option<Arc<dyn Provider>>,
    /// Back-reference for pruning. Never followed during lookup.
    parent: Option<NodeId>,
    name: String,
}

impl MountNode {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            children: BTreeMap::new(),
            provider: None,
            parent,
            name,
        }
    }

    fn is_empty(&self) -> bool {
        self.provider.is_none() && self.children.is_empty()
    }
}

/// Result of resolving a path against the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lookup {
    /// Deepest node reached.
    pub node: NodeId,
    /// Canonical absolute path of `node`.
    pub node_path: String,
    /// Unresolved tail of the path, joined with `/`. Empty on an exact hit.
    pub remainder: String,
}

impl Lookup {
    /// Returns true if the path names the node itself.
    pub fn is_exact(&self) -> bool {
        self.remainder.is_empty()
    }
}

/// Path-indexed tree of mount points.
pub struct MountTree {
    nodes: Vec<Option<MountNode>>,
    free: Vec<usize>,
}

impl std::fmt::Debug for MountTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MountTree")
            .field("mounts", &self.iter().map(|(_, p)| p).collect::<Vec<_>>())
            .finish()
    }
}

impl Default for MountTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTree {
    /// Create a tree holding only the root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Some(MountNode::new(String::new(), None))],
            free: Vec::new(),
        }
    }

    fn node(&self, id: NodeId) -> &MountNode {
        self.nodes[id.0]
            .as_ref()
            .expect("node ids handed out by the tree are live")
    }

    fn node_mut(&mut self, id: NodeId) -> &mut MountNode {
        self.nodes[id.0]
            .as_mut()
            .expect("node ids handed out by the tree are live")
    }

    fn alloc(&mut self, node: MountNode) -> NodeId {
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                NodeId(slot)
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    /// Resolve a path without modifying the tree.
    ///
    /// Walks segments from the root and stops at the first missing child.
    pub fn lookup(&self, path: &str) -> Lookup {
        let parts = path::segments(path);
        let mut current = NodeId::ROOT;
        let mut depth = 0;

        for part in &parts {
            match self.node(current).children.get(part) {
                Some(&child) => {
                    current = child;
                    depth += 1;
                }
                None => break,
            }
        }

        Lookup {
            node: current,
            node_path: format!("/{}", parts[..depth].join("/")),
            remainder: parts[depth..].join("/"),
        }
    }

    /// Resolve a path to `(node, remainder)`.
    ///
    /// With `create` set, missing nodes along the path are created unbound and
    /// the remainder is always empty.
    pub fn find_node(&mut self, path: &str, create: bool) -> (NodeId, String) {
        if !create {
            let found = self.lookup(path);
            return (found.node, found.remainder);
        }

        let mut current = NodeId::ROOT;
        for part in path::segments(path) {
            current = match self.node(current).children.get(&part) {
                Some(&child) => child,
                None => {
                    let child = self.alloc(MountNode::new(part.clone(), Some(current)));
                    self.node_mut(current).children.insert(part, child);
                    child
                }
            };
        }
        (current, String::new())
    }

    /// Provider bound at the node, if any.
    pub fn provider(&self, id: NodeId) -> Option<&Arc<dyn Provider>> {
        self.node(id).provider.as_ref()
    }

    /// Child names of the node, in lexicographic order.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = &str> {
        self.node(id).children.keys().map(String::as_str)
    }

    /// Bind a provider at the path.
    ///
    /// Fails with `AlreadyMounted` if a provider is bound there already; the
    /// tree is left unchanged in that case.
    pub fn mount(&mut self, provider: Arc<dyn Provider>, path: &str) -> VfsResult<NodeId> {
        let found = self.lookup(path);
        if let Some(existing) = self.provider(found.node).filter(|_| found.is_exact()) {
            return Err(VfsError::already_mounted(format!(
                "{} ({})",
                path::canonicalize(path),
                existing.address()
            )));
        }

        let (node, _) = self.find_node(path, true);
        self.node_mut(node).provider = Some(provider);
        Ok(node)
    }

    /// Unbind the provider mounted exactly at the path.
    pub fn unmount(&mut self, path: &str) -> VfsResult<Arc<dyn Provider>> {
        let found = self.lookup(path);
        if !found.is_exact() {
            return Err(VfsError::not_mounted(path::canonicalize(path)));
        }
        let provider = self
            .node_mut(found.node)
            .provider
            .take()
            .ok_or_else(|| VfsError::not_mounted(path::canonicalize(path)))?;
        self.prune(found.node);
        Ok(provider)
    }

    /// Unbind every mount of the provider with this address.
    ///
    /// Returns the number of bindings removed.
    pub fn unmount_provider(&mut self, address: &str) -> usize {
        let mut removed = 0;
        loop {
            let next = self
                .iter()
                .find(|(provider, _)| provider.address() == address)
                .map(|(_, path)| path);
            let Some(path) = next else {
                return removed;
            };
            if self.unmount(&path).is_err() {
                return removed;
            }
            removed += 1;
        }
    }

    /// Remove empty, unbound nodes from `id` upward. The root is never removed.
    fn prune(&mut self, mut id: NodeId) {
        while id != NodeId::ROOT && self.node(id).is_empty() {
            let Some(node) = self.nodes[id.0].take() else {
                return;
            };
            self.free.push(id.0);
            let Some(parent) = node.parent else {
                return;
            };
            self.node_mut(parent).children.remove(&node.name);
            id = parent;
        }
    }

    /// Iterate over every bound node with its absolute path.
    pub fn iter(&self) -> MountIter<'_> {
        MountIter {
            tree: self,
            stack: vec![(String::from("/"), NodeId::ROOT)],
        }
    }

    /// Number of bound nodes.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// True if nothing is mounted.
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    /// Number of live nodes, including the root.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }
}

/// Iterator over `(provider, path)` pairs in a [`MountTree`].
pub struct MountIter<'a> {
    tree: &'a MountTree,
    stack: Vec<(String, NodeId)>,
}

impl<'a> Iterator for MountIter<'a> {
    type Item = (&'a Arc<dyn Provider>, String);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some((path, id)) = self.stack.pop() {
            let node = self.tree.node(id);
            for (name, &child) in node.children.iter().rev() {
                self.stack.push((path::concat(&path, name), child));
            }
            if let Some(provider) = node.provider.as_ref() {
                return Some((provider, path));
            }
        }
        None
    }
}
