//! Lifecycle and property operations on the container tree.
//!
//! Every mutation runs the same pipeline: resolve new snapshots, write them
//! through the [`Enforcer`] (rolling back on failure), persist the declared
//! config, commit in memory, then provision device nodes. Only the last step
//! may fail without rejecting the operation.
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::{DeclaredConfig, StoredConfig};
use crate::enforce::{EnforceError, Enforcer};
use crate::error::{DevicesError, Result};
use crate::registry::{DeviceRegistry, HostRegistry};
use crate::roots::{HostRoot, RootResolver};
use crate::rootfs::{Device, DeviceError};
use crate::rule::{self, DeviceRule};
use crate::snapshot::EffectiveSnapshot;
use crate::store::ConfigStore;
use crate::syscall::Syscall;
use crate::tree::{lock, parent_name, Arena, Lease, NodeId, NodeState, ROOT, ROOT_NAME};


/// A device node that could not be created. Access is still enforced.
#[derive(Debug)]
pub struct ProvisionFailure {
    pub container: String,
    pub path: PathBuf,
    pub error: DeviceError,
}

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub provision_failures: Vec<ProvisionFailure>,
}

#[derive(Debug, Default)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    /// Containers that could not be reattached, their descendants included
    pub failed: Vec<(String, DevicesError)>,
    pub provision_failures: Vec<ProvisionFailure>,
}

/// How far a lease walk reaches below its starting container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Walk {
    Single,
    /// Descendants that inherit, stopping at inheritance boundaries
    Cascade,
    Subtree,
}

struct Leased {
    id: NodeId,
    name: String,
    parent: NodeId,
    state: Arc<Mutex<NodeState>>,
    _lease: Lease,
}

struct Plan<'a> {
    target: &'a Leased,
    old: NodeState,
    new: NodeState,
}

pub struct DeviceManagerBuilder {
    enforcer: Arc<dyn Enforcer>,
    store: Arc<dyn ConfigStore>,
    registry: Arc<dyn DeviceRegistry>,
    roots: Arc<dyn RootResolver>,
    syscall: Option<Box<dyn Syscall>>,
}

impl DeviceManagerBuilder {
    pub fn new(enforcer: Arc<dyn Enforcer>, store: Arc<dyn ConfigStore>) -> Self {
        DeviceManagerBuilder {
            enforcer,
            store,
            registry: Arc::new(HostRegistry),
            roots: Arc::new(HostRoot),
            syscall: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<dyn DeviceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_roots(mut self, roots: Arc<dyn RootResolver>) -> Self {
        self.roots = roots;
        self
    }

    pub fn with_syscall(mut self, syscall: Box<dyn Syscall>) -> Self {
        self.syscall = Some(syscall);
        self
    }

    pub fn build(self) -> DeviceManager {
        DeviceManager {
            arena: RwLock::new(Arena::new()),
            registry: self.registry,
            enforcer: self.enforcer,
            store: self.store,
            roots: self.roots,
            device: self
                .syscall
                .map(Device::new_with_syscall)
                .unwrap_or_default(),
        }
    }
}

pub struct DeviceManager {
    arena: RwLock<Arena>,
    registry: Arc<dyn DeviceRegistry>,
    enforcer: Arc<dyn Enforcer>,
    store: Arc<dyn ConfigStore>,
    roots: Arc<dyn RootResolver>,
    device: Device,
}

impl DeviceManager {
    /// Parses a rule list against the host devices known to this manager
    pub fn parse_rules(&self, input: &str) -> Result<Vec<DeviceRule>> {
        Ok(rule::parse_rules(input, self.registry.as_ref())?)
    }

    /// Attaches a new container below its parent and enforces its snapshot.
    pub fn on_create(&self, name: &str, config: DeclaredConfig) -> Result<ApplyReport> {
        self.attach(name, config.into(), true)
    }

    /// Detaches the container and its whole subtree, descendants first.
    pub fn on_destroy(&self, name: &str) -> Result<()> {
        parent_name(name)?;
        let leased = self.lease_walk(name, Walk::Subtree)?;

        let mut first_err = None;
        for node in leased.iter().rev() {
            if let Err(err) = self.enforcer.release(&node.name) {
                tracing::warn!(container = %node.name, %err, "failed to release device cgroup");
                first_err.get_or_insert(DevicesError::EnforcementWriteFailed {
                    container: node.name.clone(),
                    source: err,
                });
            }
            if let Err(err) = self.store.remove(&node.name) {
                tracing::warn!(container = %node.name, %err, "failed to remove declared config");
                first_err.get_or_insert(err.into());
            }
            self.write().remove(node.id);
            tracing::debug!(container = %node.name, "container detached");
        }

        first_err.map_or(Ok(()), Err)
    }

    /// Declared rules in wire format
    pub fn get_devices(&self, name: &str) -> Result<String> {
        Ok(self.state(name)?.config.devices_string())
    }

    pub fn set_devices(&self, name: &str, input: &str) -> Result<ApplyReport> {
        let rules = self.parse_rules(input)?;
        self.set_rules(name, rules)
    }

    /// Replaces the declared rules and re-derives every descendant that
    /// still inherits from this container.
    pub fn set_rules(&self, name: &str, rules: Vec<DeviceRule>) -> Result<ApplyReport> {
        self.update(name, Walk::Cascade, move |config| config.rules = Some(rules))
    }

    pub fn controller_enabled(&self, name: &str) -> Result<bool> {
        Ok(self.state(name)?.config.controller_enabled)
    }

    /// Toggles enforcement of this container only. Its snapshot and the
    /// snapshots of its descendants stay as they are.
    pub fn set_controller_enabled(&self, name: &str, enabled: bool) -> Result<ApplyReport> {
        self.update(name, Walk::Single, move |config| {
            config.controller_enabled = enabled
        })
    }

    pub fn declared_config(&self, name: &str) -> Result<DeclaredConfig> {
        Ok(self.state(name)?.config)
    }

    pub fn effective_snapshot(&self, name: &str) -> Result<EffectiveSnapshot> {
        Ok(self.state(name)?.snapshot)
    }

    /// All attached containers, parents before their children
    pub fn containers(&self) -> Vec<String> {
        self.read().names()
    }

    /// Reattaches every stored container from the root down. Containers
    /// that inherit are re-derived from their reattached parent, boundaries
    /// from the baseline stored with them. A container that fails takes its
    /// subtree with it, siblings are unaffected.
    pub fn restore(&self) -> Result<RestoreReport> {
        let mut records = self.store.list()?;
        records.sort_by(|(a, _), (b, _)| depth(a).cmp(&depth(b)).then_with(|| a.cmp(b)));

        let mut report = RestoreReport::default();
        for (name, stored) in records {
            match self.attach(&name, stored, false) {
                Ok(applied) => {
                    report.restored.push(name);
                    report.provision_failures.extend(applied.provision_failures);
                }
                Err(err) => {
                    tracing::error!(container = %name, %err, "failed to reattach container");
                    report.failed.push((name, err));
                }
            }
        }

        tracing::info!(
            restored = report.restored.len(),
            failed = report.failed.len(),
            "device state reattached"
        );
        Ok(report)
    }

    /// Attaches a fresh container when persist is set, otherwise reattaches
    /// a stored one whose cgroup may already be in use.
    fn attach(&self, name: &str, stored: StoredConfig, persist: bool) -> Result<ApplyReport> {
        let parent = parent_name(name)?;
        let parent_lease = self.lease_walk(parent, Walk::Single)?;
        let parent = &parent_lease[0];
        if self.read().id(name).is_some() {
            return Err(DevicesError::ContainerExists(name.to_owned()));
        }

        let StoredConfig { config, baseline } = stored;
        let baseline = match baseline {
            Some(baseline) if config.is_boundary() => baseline,
            _ => lock(&parent.state).snapshot.clone(),
        };
        let state = NodeState {
            snapshot: EffectiveSnapshot::resolve(&baseline, &config),
            baseline: config.is_boundary().then_some(baseline),
            config,
        };
        if let Err(err) = self.enforce(name, &state.snapshot, state.config.controller_enabled) {
            // a reattached cgroup keeps its previous allow-list
            if persist {
                self.release_quietly(name);
            }
            return Err(DevicesError::EnforcementWriteFailed {
                container: name.to_owned(),
                source: err,
            });
        }
        if persist {
            if let Err(err) = self.store.save(name, &state.stored()) {
                self.release_quietly(name);
                return Err(err.into());
            }
        }

        let report = self.provision(name, &state.snapshot);
        self.write().insert(name, parent.id, state);
        tracing::info!(container = name, parent = %parent.name, "container attached");

        Ok(report)
    }

    fn update<F>(&self, name: &str, walk: Walk, change: F) -> Result<ApplyReport>
    where
        F: FnOnce(&mut DeclaredConfig),
    {
        parent_name(name)?;
        let leased = self.lease_walk(name, walk)?;
        let target = &leased[0];

        // the parent cannot go away while its child is leased
        let baseline = {
            let arena = self.read();
            let parent = arena
                .node(target.parent)
                .ok_or_else(|| DevicesError::ContainerNotFound(name.to_owned()))?;
            let snapshot = lock(&parent.state).snapshot.clone();
            snapshot
        };

        let mut config = lock(&target.state).config.clone();
        change(&mut config);

        let mut derived: HashMap<NodeId, EffectiveSnapshot> = HashMap::new();
        let mut plans = Vec::with_capacity(leased.len());
        for node in &leased {
            let old = lock(&node.state).clone();
            let new = if node.id == target.id {
                match walk {
                    Walk::Single => NodeState {
                        config: config.clone(),
                        ..old.clone()
                    },
                    _ => NodeState {
                        config: config.clone(),
                        snapshot: EffectiveSnapshot::resolve(&baseline, &config),
                        baseline: config.is_boundary().then(|| baseline.clone()),
                    },
                }
            } else {
                let parent_snapshot = derived.get(&node.parent).unwrap_or(&baseline);
                NodeState {
                    snapshot: EffectiveSnapshot::resolve(parent_snapshot, &old.config),
                    ..old.clone()
                }
            };
            derived.insert(node.id, new.snapshot.clone());
            plans.push(Plan {
                target: node,
                old,
                new,
            });
        }

        for (written, plan) in plans.iter().enumerate() {
            let container = &plan.target.name;
            let enabled = plan.new.config.controller_enabled;
            if let Err(err) = self.enforce(container, &plan.new.snapshot, enabled) {
                tracing::error!(container = %container, %err, "device policy write failed, rolling back");
                self.rollback(&plans[..written]);
                return Err(DevicesError::EnforcementWriteFailed {
                    container: container.clone(),
                    source: err,
                });
            }
        }

        if let Err(err) = self.store.save(name, &plans[0].new.stored()) {
            self.rollback(&plans);
            return Err(err.into());
        }

        let mut report = ApplyReport::default();
        for plan in &plans {
            *lock(&plan.target.state) = plan.new.clone();
            report
                .provision_failures
                .extend(self.provision(&plan.target.name, &plan.new.snapshot).provision_failures);
        }
        tracing::info!(container = name, rederived = plans.len() - 1, "device config updated");

        Ok(report)
    }

    fn enforce(
        &self,
        container: &str,
        snapshot: &EffectiveSnapshot,
        enabled: bool,
    ) -> std::result::Result<(), EnforceError> {
        let policy = snapshot.policy(enabled)?;
        self.enforcer.apply(container, &policy)
    }

    fn rollback(&self, plans: &[Plan<'_>]) {
        for plan in plans.iter().rev() {
            let container = &plan.target.name;
            let enabled = plan.old.config.controller_enabled;
            if let Err(err) = self.enforce(container, &plan.old.snapshot, enabled) {
                tracing::error!(container = %container, %err, "failed to restore previous device policy");
            }
        }
    }

    fn release_quietly(&self, container: &str) {
        if let Err(err) = self.enforcer.release(container) {
            tracing::warn!(container, %err, "failed to release device cgroup");
        }
    }

    fn provision(&self, container: &str, snapshot: &EffectiveSnapshot) -> ApplyReport {
        let root = self.roots.resolve_root(container);
        let provision_failures = self
            .device
            .provision(&root, snapshot.visible_devices())
            .into_iter()
            .map(|(path, error)| ProvisionFailure {
                container: container.to_owned(),
                path,
                error,
            })
            .collect();

        ApplyReport { provision_failures }
    }

    /// Leases name and, depending on walk, part of its subtree in preorder.
    /// Each lease is taken before the node's children are read, so nothing
    /// can be attached below a node once it is part of the walk.
    fn lease_walk(&self, name: &str, walk: Walk) -> Result<Vec<Leased>> {
        let (start, cell) = {
            let arena = self.read();
            let (id, node) = arena.get(name)?;
            (id, node.lease.clone())
        };

        let mut leased = Vec::new();
        let mut pending = vec![(start, cell)];
        while let Some((id, cell)) = pending.pop() {
            let lease = Lease::acquire(cell);
            let arena = self.read();
            let Some(node) = arena.node(id) else {
                if id == start {
                    return Err(DevicesError::ContainerNotFound(name.to_owned()));
                }
                continue;
            };
            if id != start && walk == Walk::Cascade && lock(&node.state).config.is_boundary() {
                continue;
            }
            if walk != Walk::Single {
                for child in node.children.iter().rev() {
                    if let Some(child_node) = arena.node(*child) {
                        pending.push((*child, child_node.lease.clone()));
                    }
                }
            }

            leased.push(Leased {
                id,
                name: node.name.clone(),
                parent: node.parent.unwrap_or(ROOT),
                state: node.state.clone(),
                _lease: lease,
            });
        }

        Ok(leased)
    }

    fn state(&self, name: &str) -> Result<NodeState> {
        let arena = self.read();
        let (_, node) = arena.get(name)?;
        let state = lock(&node.state).clone();
        Ok(state)
    }

    fn read(&self) -> RwLockReadGuard<'_, Arena> {
        self.arena.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Arena> {
        self.arena.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn depth(name: &str) -> usize {
    if name == ROOT_NAME {
        0
    } else {
        name.matches('/').count() + 1
    }
}
