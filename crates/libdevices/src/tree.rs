//! Arena of container nodes. Topology lives behind one lock, each node
//! additionally carries a lease that serializes mutations of its subtree.
//!
//! Lock order: a lease is never waited on while the arena lock is held, and
//! the arena lock is never taken while a node's state is locked. Leases are
//! always acquired from ancestors towards descendants.
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::config::{DeclaredConfig, StoredConfig};
use crate::error::{DevicesError, Result};
use crate::snapshot::EffectiveSnapshot;

pub(crate) type NodeId = usize;

pub(crate) const ROOT: NodeId = 0;
pub const ROOT_NAME: &str = "/";

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Committed state of one container
#[derive(Debug, Clone)]
pub(crate) struct NodeState {
    pub config: DeclaredConfig,
    pub snapshot: EffectiveSnapshot,
    /// Parent snapshot the rules were applied over, kept for boundaries only
    pub baseline: Option<EffectiveSnapshot>,
}

impl NodeState {
    pub fn stored(&self) -> StoredConfig {
        StoredConfig {
            config: self.config.clone(),
            baseline: self.baseline.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct LeaseCell {
    held: Mutex<bool>,
    released: Condvar,
}

/// Exclusive right to mutate one node, released on drop
#[derive(Debug)]
pub(crate) struct Lease {
    cell: Arc<LeaseCell>,
}

impl Lease {
    pub fn acquire(cell: Arc<LeaseCell>) -> Lease {
        let mut held = lock(&cell.held);
        while *held {
            held = cell
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        *held = true;
        drop(held);
        Lease { cell }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        *lock(&self.cell.held) = false;
        self.cell.released.notify_one();
    }
}

#[derive(Debug)]
pub(crate) struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub lease: Arc<LeaseCell>,
    pub state: Arc<Mutex<NodeState>>,
}

/// Ids are never reused, a stale id simply stops resolving.
#[derive(Debug)]
pub(crate) struct Arena {
    nodes: Vec<Option<Node>>,
    by_name: HashMap<String, NodeId>,
}

impl Arena {
    pub fn new() -> Self {
        let root = Node {
            name: ROOT_NAME.to_owned(),
            parent: None,
            children: Vec::new(),
            lease: Arc::default(),
            state: Arc::new(Mutex::new(NodeState {
                config: DeclaredConfig::default(),
                snapshot: EffectiveSnapshot::builtin(),
                baseline: None,
            })),
        };
        Arena {
            nodes: vec![Some(root)],
            by_name: HashMap::from([(ROOT_NAME.to_owned(), ROOT)]),
        }
    }

    pub fn id(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id).and_then(Option::as_ref)
    }

    pub fn get(&self, name: &str) -> Result<(NodeId, &Node)> {
        self.id(name)
            .and_then(|id| self.node(id).map(|node| (id, node)))
            .ok_or_else(|| DevicesError::ContainerNotFound(name.to_owned()))
    }

    pub fn insert(&mut self, name: &str, parent: NodeId, state: NodeState) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Some(Node {
            name: name.to_owned(),
            parent: Some(parent),
            children: Vec::new(),
            lease: Arc::default(),
            state: Arc::new(Mutex::new(state)),
        }));
        self.by_name.insert(name.to_owned(), id);
        if let Some(Some(parent)) = self.nodes.get_mut(parent) {
            parent.children.push(id);
        }
        id
    }

    /// Detaches a leaf. Callers remove subtrees from the bottom up.
    pub fn remove(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id).and_then(Option::take) else {
            return;
        };
        self.by_name.remove(&node.name);
        if let Some(Some(parent)) = node.parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|child| *child != id);
        }
    }

    /// Names of all containers, the implicit root excluded
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .by_name
            .keys()
            .filter(|name| name.as_str() != ROOT_NAME)
            .cloned()
            .collect();
        names.sort();
        names
    }
}

/// Checks a hierarchical name like `a/b/c` and returns its parent's name.
pub(crate) fn parent_name(name: &str) -> Result<&str> {
    let invalid = || DevicesError::InvalidName(name.to_owned());
    if name.is_empty() || name.contains('%') || name.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    if name
        .split('/')
        .any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(invalid());
    }

    Ok(name.rsplit_once('/').map_or(ROOT_NAME, |(parent, _)| parent))
}
