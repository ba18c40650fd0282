//! The hierarchical node store.
//!
//! Nodes live in a `BTreeMap` keyed by normalized path, so children and
//! descendants are contiguous key ranges. All access goes through one
//! reentrant lock: a caller holding a [`StoreGuard`] may call back into
//! the store on the same thread without deadlocking, which is how a
//! transaction replays many operations under a single acquisition.
//!
//! Store operations do not fire watches themselves. Each mutation returns
//! the [`Trigger`]s it caused, already ordered, and the owning session
//! hands them to the watch registry while still holding the lock.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{CoordError, Result};
use crate::node::{Node, Stat};
use crate::path::{self, ROOT};
use crate::watch::{order_triggers, EventType, Trigger, WatchKind};

/// Optimistic concurrency wildcard: matches any stored version.
pub const ANY_VERSION: i32 = -1;

struct Tree {
    nodes: BTreeMap<String, Node>,
}

impl Tree {
    fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(ROOT.to_string(), Node::new(Vec::new(), None));
        Self { nodes }
    }

    fn node(&self, path: &str) -> Result<&Node> {
        self.nodes
            .get(path)
            .ok_or_else(|| CoordError::NoNode(path.to_string()))
    }

    fn descendants(&self, path: &str) -> Vec<String> {
        let prefix = path::child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.as_str() != path)
            .map(|(k, _)| k.clone())
            .collect()
    }

    fn children(&self, path: &str) -> Vec<String> {
        let prefix = path::child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter_map(|(k, _)| {
                let rest = &k[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn stat(&self, path: &str) -> Result<Stat> {
        let node = self.node(path)?;
        Ok(node.stat(self.children(path).len()))
    }

    fn ancestor_triggers(path: &str, triggers: &mut Vec<Trigger>) {
        for ancestor in path::ancestors(path) {
            triggers.push(Trigger::new(
                ancestor,
                EventType::ChildrenChanged,
                WatchKind::Child,
            ));
        }
    }

    fn create(&mut self, path: &str, data: Vec<u8>, owner: Option<i64>) -> Result<Vec<Trigger>> {
        if self.nodes.contains_key(path) {
            return Err(CoordError::NodeExists(path.to_string()));
        }
        let parent = path::parent(path).unwrap_or(ROOT);
        if !self.nodes.contains_key(parent) {
            return Err(CoordError::NoNode(parent.to_string()));
        }

        self.nodes.insert(path.to_string(), Node::new(data, owner));
        debug!(path, "node created");

        let mut triggers = vec![Trigger::new(path, EventType::Created, WatchKind::Data)];
        Self::ancestor_triggers(path, &mut triggers);
        order_triggers(&mut triggers);
        Ok(triggers)
    }

    fn set(
        &mut self,
        path: &str,
        data: Vec<u8>,
        expected_version: i32,
    ) -> Result<(Stat, Vec<Trigger>)> {
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| CoordError::NoNode(path.to_string()))?;
        if expected_version != ANY_VERSION && expected_version != node.version {
            return Err(CoordError::BadVersion {
                path: path.to_string(),
                expected: expected_version,
                found: node.version,
            });
        }
        node.update(data);
        debug!(path, version = node.version, "node updated");

        let stat = self.stat(path)?;
        let mut triggers = vec![Trigger::new(path, EventType::DataChanged, WatchKind::Data)];
        Self::ancestor_triggers(path, &mut triggers);
        order_triggers(&mut triggers);
        Ok((stat, triggers))
    }

    fn delete(&mut self, path: &str, recursive: bool) -> Result<Vec<Trigger>> {
        if path == ROOT {
            return Err(CoordError::BadArguments(
                "cannot delete the root node".to_string(),
            ));
        }
        if !self.nodes.contains_key(path) {
            return Err(CoordError::NoNode(path.to_string()));
        }

        let mut removed = vec![path.to_string()];
        if recursive {
            removed.extend(self.descendants(path));
        }
        removed.sort_by(|a, b| b.cmp(a));

        let mut triggers = Vec::with_capacity(removed.len());
        for p in removed {
            self.nodes.remove(&p);
            debug!(path = %p, "node deleted");
            triggers.push(Trigger::new(p, EventType::Deleted, WatchKind::Combined));
        }
        Ok(triggers)
    }

    fn seed(&mut self, path: &str, data: Vec<u8>) {
        for ancestor in path::ancestors(path).into_iter().rev() {
            self.nodes
                .entry(ancestor.to_string())
                .or_insert_with(|| Node::new(Vec::new(), None));
        }
        match self.nodes.get_mut(path) {
            Some(node) => node.data = data,
            None => {
                self.nodes.insert(path.to_string(), Node::new(data, None));
            }
        }
    }
}

/// A held acquisition of the store lock.
///
/// Every method borrows the tree only for its own duration, so the store
/// may be re-locked and re-entered on the same thread while this guard is
/// alive.
pub struct StoreGuard<'a> {
    tree: ReentrantMutexGuard<'a, RefCell<Tree>>,
}

impl StoreGuard<'_> {
    /// Insert a node at version 0. The parent must exist.
    pub fn create(
        &self,
        path: &str,
        data: Vec<u8>,
        ephemeral_owner: Option<i64>,
    ) -> Result<Vec<Trigger>> {
        self.tree.borrow_mut().create(path, data, ephemeral_owner)
    }

    /// Data and metadata of a node.
    pub fn get(&self, path: &str) -> Result<(Vec<u8>, Stat)> {
        let tree = self.tree.borrow();
        let data = tree.node(path)?.data.clone();
        Ok((data, tree.stat(path)?))
    }

    /// Replace a node's data if `expected_version` matches.
    pub fn set(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: i32,
    ) -> Result<(Stat, Vec<Trigger>)> {
        self.tree.borrow_mut().set(path, data, expected_version)
    }

    /// Remove a node, and its descendants when `recursive`, deepest first.
    ///
    /// A non-recursive delete removes only the addressed node even if it has
    /// children.
    pub fn delete(&self, path: &str, recursive: bool) -> Result<Vec<Trigger>> {
        self.tree.borrow_mut().delete(path, recursive)
    }

    /// Stat of the node at `path`, or `None` if absent.
    pub fn exists(&self, path: &str) -> Option<Stat> {
        self.tree.borrow().stat(path).ok()
    }

    /// Immediate child names in lexicographic order.
    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        let tree = self.tree.borrow();
        tree.node(path)?;
        Ok(tree.children(path))
    }

    /// Whether a node exists at `path`.
    pub fn contains(&self, path: &str) -> bool {
        self.tree.borrow().nodes.contains_key(path)
    }

    /// Node count, root included.
    pub fn len(&self) -> usize {
        self.tree.borrow().nodes.len()
    }
}

/// Versioned node tree guarded by a single reentrant lock.
pub struct NodeStore {
    tree: ReentrantMutex<RefCell<Tree>>,
}

impl NodeStore {
    /// A store holding only the root node.
    pub fn new() -> Self {
        Self {
            tree: ReentrantMutex::new(RefCell::new(Tree::new())),
        }
    }

    /// A store pre-populated with fixture nodes.
    ///
    /// Missing parents are created with empty data. No watches are involved.
    pub fn with_nodes<I, P, D>(nodes: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, D)>,
        P: AsRef<str>,
        D: Into<Vec<u8>>,
    {
        let store = Self::new();
        for (path, data) in nodes {
            store.seed(path.as_ref(), data)?;
        }
        Ok(store)
    }

    /// Write a fixture node, creating missing parents.
    pub fn seed(&self, path: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        let path = path::normalize(path)?;
        self.lock().tree.borrow_mut().seed(&path, data.into());
        Ok(())
    }

    /// Acquire the store lock. Reentrant on the owning thread.
    pub fn lock(&self) -> StoreGuard<'_> {
        StoreGuard {
            tree: self.tree.lock(),
        }
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Always false: the root node cannot be removed.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Copy of every node keyed by path, in path order.
    pub fn snapshot(&self) -> BTreeMap<String, Node> {
        self.lock().tree.borrow().nodes.clone()
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}
