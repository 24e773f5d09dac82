//! The role tree.
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. The parent
//! link is a plain index, so the tree has a single owner and no cycles.
//!
//! Every client is a leaf. A client whose path is also the prefix of other
//! clients is stored as a *virtual leaf* named `.` under the internal node
//! for that path:
//!
//! ```text
//! add("a"); add("a/b")
//!
//!   (root)
//!     a          internal
//!       b        leaf, client "a/b"
//!       .        leaf, client "a"
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as _;
use std::ops::{Index, IndexMut};

use crate::allocation::Allocation;
use crate::error::{SorterError, SorterResult};
use crate::path::{self, VIRTUAL_LEAF};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NodeKind {
    ActiveLeaf,
    InactiveLeaf,
    Internal,
}

impl NodeKind {
    pub(crate) fn is_leaf(self) -> bool {
        matches!(self, Self::ActiveLeaf | Self::InactiveLeaf)
    }

    fn label(self) -> &'static str {
        match self {
            Self::ActiveLeaf => "active",
            Self::InactiveLeaf => "inactive",
            Self::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) name: String,
    /// Full path from the root, including a trailing `.` for virtual leaves.
    pub(crate) path: String,
    pub(crate) kind: NodeKind,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    /// Cached configured weight. Cleared whenever the weight map changes
    /// at or above this node.
    pub(crate) weight: Option<f64>,
    /// Only maintained on leaves.
    pub(crate) allocation: Allocation,
}

impl Node {
    fn new(name: &str, path: String, kind: NodeKind, parent: Option<NodeId>) -> Self {
        Self {
            name: name.to_string(),
            path,
            kind,
            parent,
            children: Vec::new(),
            weight: None,
            allocation: Allocation::default(),
        }
    }
}

/// Arena of nodes plus the client lookup table.
#[derive(Debug, Clone)]
pub(crate) struct Tree {
    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: NodeId,
    clients: BTreeMap<String, NodeId>,
}

impl Default for Tree {
    fn default() -> Self {
        Self {
            nodes: vec![Some(Node::new("", String::new(), NodeKind::Internal, None))],
            free: Vec::new(),
            root: NodeId(0),
            clients: BTreeMap::new(),
        }
    }
}

impl Index<NodeId> for Tree {
    type Output = Node;

    fn index(&self, id: NodeId) -> &Node {
        match &self.nodes[id.0] {
            Some(node) => node,
            None => panic!("stale node id {:?}", id),
        }
    }
}

impl IndexMut<NodeId> for Tree {
    fn index_mut(&mut self, id: NodeId) -> &mut Node {
        match &mut self.nodes[id.0] {
            Some(node) => node,
            None => panic!("stale node id {:?}", id),
        }
    }
}

impl Tree {
    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn client(&self, path: &str) -> Option<NodeId> {
        self.clients.get(path).copied()
    }

    pub(crate) fn clients(&self) -> impl Iterator<Item = (&str, NodeId)> + '_ {
        self.clients.iter().map(|(path, id)| (path.as_str(), *id))
    }

    pub(crate) fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// The client path of a leaf: its own path, or its parent's for a
    /// virtual leaf.
    pub(crate) fn client_path(&self, id: NodeId) -> &str {
        let node = &self[id];
        match node.parent {
            Some(parent) if node.name == VIRTUAL_LEAF => &self[parent].path,
            _ => &node.path,
        }
    }

    /// Add an inactive leaf for `client`, creating internal nodes as needed.
    pub(crate) fn add(&mut self, client: &str) -> SorterResult<NodeId> {
        let segments = path::split(client)?;
        if self.clients.contains_key(client) {
            return Err(SorterError::ClientAlreadyExists(client.to_string()));
        }

        let mut current = self.root;
        let mut last_created = None;

        for segment in segments {
            if let Some(child) = self.find_child(current, segment) {
                current = child;
                continue;
            }

            // A leaf cannot have children: turn it into an internal node
            // that keeps the old client as a virtual leaf.
            if self[current].kind.is_leaf() {
                current = self.promote(current);
            }

            let child = self.alloc(segment, NodeKind::Internal, current);
            self.add_child(current, child);
            current = child;
            last_created = Some(child);
        }

        let leaf = if last_created == Some(current) {
            // Created above as internal; it is really an inactive leaf,
            // which belongs at the back of its parent's children.
            self[current].kind = NodeKind::InactiveLeaf;
            self.reposition(current);
            current
        } else {
            // The path already exists as an internal node.
            let leaf = self.alloc(VIRTUAL_LEAF, NodeKind::InactiveLeaf, current);
            self.add_child(current, leaf);
            leaf
        };

        self.clients.insert(client.to_string(), leaf);
        Ok(leaf)
    }

    /// Remove `client` and prune or collapse ancestors. Returns the removed
    /// leaf's ledger.
    pub(crate) fn remove(&mut self, client: &str) -> SorterResult<Allocation> {
        let leaf = self
            .clients
            .remove(client)
            .ok_or_else(|| SorterError::ClientNotFound(client.to_string()))?;
        let allocation = std::mem::take(&mut self[leaf].allocation);

        let mut current = leaf;
        while current != self.root {
            let Some(parent) = self[current].parent else {
                break;
            };

            if self[current].children.is_empty() {
                self.detach(current);
                self.release(current);
            } else if self[current].children.len() == 1 {
                let child = self[current].children[0];
                if self[child].name == VIRTUAL_LEAF {
                    self.collapse(current, child);
                }
            }

            current = parent;
        }

        Ok(allocation)
    }

    /// Set the kind of a client's leaf. Returns whether it changed.
    pub(crate) fn set_active(&mut self, client: &str, active: bool) -> SorterResult<bool> {
        let leaf = self
            .client(client)
            .ok_or_else(|| SorterError::ClientNotFound(client.to_string()))?;

        let kind = if active {
            NodeKind::ActiveLeaf
        } else {
            NodeKind::InactiveLeaf
        };
        if self[leaf].kind == kind {
            return Ok(false);
        }

        self[leaf].kind = kind;
        self.reposition(leaf);
        Ok(true)
    }

    /// Walk from the root along `path`. Unlike [`client`](Self::client),
    /// this also finds pure internal nodes.
    pub(crate) fn find(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root;
        for segment in path.split('/') {
            current = self.find_child(current, segment)?;
        }
        Some(current)
    }

    /// Clear cached weights on `id` and all of its descendants.
    pub(crate) fn invalidate_weights(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(next) = stack.pop() {
            self[next].weight = None;
            stack.extend(self[next].children.iter().copied());
        }
    }

    /// The configured weight of a node, cached on first lookup.
    pub(crate) fn weight(&mut self, id: NodeId, weights: &HashMap<String, f64>) -> f64 {
        if let Some(weight) = self[id].weight {
            return weight;
        }
        let weight = weights.get(&self[id].path).copied().unwrap_or(1.0);
        self[id].weight = Some(weight);
        weight
    }

    /// Nodes that are active leaves or have an active leaf below them.
    pub(crate) fn active_through(&self) -> HashSet<NodeId> {
        let mut live = HashSet::new();
        for &leaf in self.clients.values() {
            if self[leaf].kind != NodeKind::ActiveLeaf {
                continue;
            }
            let mut current = Some(leaf);
            while let Some(id) = current {
                if !live.insert(id) {
                    break;
                }
                current = self[id].parent;
            }
        }
        live
    }

    /// Indented dump of the tree, one node per line.
    pub(crate) fn render(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let node = &self[id];
            let name = if id == self.root { "(root)" } else { node.name.as_str() };
            let _ = write!(out, "{:indent$}{} [{}]", "", name, node.kind.label(), indent = depth * 2);
            if node.kind.is_leaf() {
                let _ = write!(out, " client={}", self.client_path(id));
            }
            out.push('\n');
            for &child in node.children.iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    /// Verify structural invariants and return the first breach.
    pub(crate) fn check(&self) -> SorterResult<()> {
        let breach = |msg: String| Err(SorterError::InvariantViolation(msg));

        if self[self.root].kind != NodeKind::Internal {
            return breach("root is not internal".to_string());
        }

        let mut leaves = 0usize;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = &self[id];

            if node.kind.is_leaf() {
                leaves += 1;
                if !node.children.is_empty() {
                    return breach(format!("leaf '{}' has children", node.path));
                }
                let client = self.client_path(id);
                if self.client(client) != Some(id) {
                    return breach(format!("leaf '{}' is not registered as client '{}'", node.path, client));
                }
            } else if id != self.root && node.children.is_empty() {
                return breach(format!("internal node '{}' has no children", node.path));
            }

            let mut seen_inactive = false;
            for &child in &node.children {
                let child_node = match &self.nodes[child.0] {
                    Some(n) => n,
                    None => return breach(format!("'{}' has a freed child", node.path)),
                };
                if child_node.parent != Some(id) {
                    return breach(format!("'{}' has a wrong parent link", child_node.path));
                }
                if child_node.path != path::join(&node.path, &child_node.name) {
                    return breach(format!("'{}' has a stale path", child_node.path));
                }
                if child_node.kind == NodeKind::InactiveLeaf {
                    seen_inactive = true;
                } else if seen_inactive {
                    return breach(format!("inactive leaf precedes '{}'", child_node.path));
                }
                stack.push(child);
            }
        }

        if leaves != self.clients.len() {
            return breach(format!("{} leaves but {} clients", leaves, self.clients.len()));
        }
        Ok(())
    }

    /// Verify every cached weight matches the weight map.
    pub(crate) fn check_weights(&self, weights: &HashMap<String, f64>) -> SorterResult<()> {
        for node in self.nodes.iter().flatten() {
            if let Some(cached) = node.weight {
                let configured = weights.get(&node.path).copied().unwrap_or(1.0);
                if cached != configured {
                    return Err(SorterError::InvariantViolation(format!(
                        "'{}' caches weight {} but {} is configured",
                        node.path, cached, configured
                    )));
                }
            }
        }
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────

    fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self[parent]
            .children
            .iter()
            .copied()
            .find(|&child| self[child].name == name)
    }

    fn alloc(&mut self, name: &str, kind: NodeKind, parent: NodeId) -> NodeId {
        let node = Node::new(name, path::join(&self[parent].path, name), kind, Some(parent));
        match self.free.pop() {
            Some(id) => {
                self.nodes[id.0] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                NodeId(self.nodes.len() - 1)
            }
        }
    }

    fn release(&mut self, id: NodeId) {
        self.nodes[id.0] = None;
        self.free.push(id);
    }

    /// Insert into the parent's children. Inactive leaves go to the back;
    /// everything else goes to the front.
    fn add_child(&mut self, parent: NodeId, child: NodeId) {
        let inactive = self[child].kind == NodeKind::InactiveLeaf;
        let children = &mut self[parent].children;
        if inactive {
            children.push(child);
        } else {
            children.insert(0, child);
        }
    }

    fn detach(&mut self, child: NodeId) {
        if let Some(parent) = self[child].parent {
            self[parent].children.retain(|&c| c != child);
        }
    }

    fn reposition(&mut self, id: NodeId) {
        if let Some(parent) = self[id].parent {
            self.detach(id);
            self.add_child(parent, id);
        }
    }

    /// Replace leaf `leaf` with a new internal node of the same name and
    /// move the leaf underneath it as a virtual leaf.
    fn promote(&mut self, leaf: NodeId) -> NodeId {
        let parent = match self[leaf].parent {
            Some(parent) => parent,
            None => return leaf,
        };
        let name = self[leaf].name.clone();

        self.detach(leaf);
        let internal = self.alloc(&name, NodeKind::Internal, parent);
        self.add_child(parent, internal);

        let path = path::join(&self[internal].path, VIRTUAL_LEAF);
        let node = &mut self[leaf];
        node.name = VIRTUAL_LEAF.to_string();
        node.path = path;
        node.parent = Some(internal);
        node.weight = None;
        self.add_child(internal, leaf);

        internal
    }

    /// Fold a lone virtual leaf back into its internal parent.
    fn collapse(&mut self, internal: NodeId, virtual_leaf: NodeId) {
        debug_assert_eq!(self.client(&self[internal].path), Some(virtual_leaf));

        let kind = self[virtual_leaf].kind;
        let allocation = std::mem::take(&mut self[virtual_leaf].allocation);
        self.detach(virtual_leaf);
        self.release(virtual_leaf);

        let node = &mut self[internal];
        node.kind = kind;
        node.allocation = allocation;
        let path = node.path.clone();

        self.reposition(internal);
        self.clients.insert(path, internal);
    }
}
