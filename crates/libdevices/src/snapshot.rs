//! Resolved per device access of one container.
use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::path::{Path, PathBuf};

use libcgroups::DevicePolicy;
use oci_spec::runtime::{LinuxDevice, LinuxDeviceCgroupBuilder};
use serde::{Deserialize, Serialize};

use crate::config::DeclaredConfig;
use crate::registry::{always_allowed, builtin_devices};
use crate::rule::{Access, DeviceRule, RuleAccess};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    pub device: LinuxDevice,
    pub access: Access,
}

/// A value copied from the parent at a trigger point, never a live view of it.
/// Serializes as the list of grants it holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<DeviceRule>", into = "Vec<DeviceRule>")]
pub struct EffectiveSnapshot {
    grants: BTreeMap<PathBuf, Grant>,
}

impl EffectiveSnapshot {
    /// The baseline of the implicit root container
    pub fn builtin() -> Self {
        let grants = builtin_devices()
            .into_iter()
            .map(|device| {
                let grant = Grant {
                    device,
                    access: Access::all(),
                };
                (grant.device.path().to_path_buf(), grant)
            })
            .collect();
        EffectiveSnapshot { grants }
    }

    /// Derives a container's snapshot from its parent's current one.
    pub fn resolve(baseline: &EffectiveSnapshot, config: &DeclaredConfig) -> Self {
        match config.rules.as_deref() {
            None => baseline.clone(),
            Some([]) => Self::builtin(),
            Some(rules) => {
                let mut snapshot = baseline.clone();
                for rule in rules {
                    snapshot.apply_rule(rule);
                }
                snapshot
            }
        }
    }

    fn apply_rule(&mut self, rule: &DeviceRule) {
        match rule.access {
            RuleAccess::Revoke => {
                self.grants.remove(rule.path());
            }
            RuleAccess::Grant(access) => {
                self.grants.insert(
                    rule.path().to_path_buf(),
                    Grant {
                        device: rule.device.clone(),
                        access,
                    },
                );
            }
        }
    }

    pub fn get(&self, path: &Path) -> Option<Access> {
        self.grants.get(path).map(|grant| grant.access)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Grant> {
        self.grants.values()
    }

    pub fn len(&self) -> usize {
        self.grants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Devices that need a node in the container root
    pub fn visible_devices(&self) -> impl Iterator<Item = &LinuxDevice> {
        self.grants
            .values()
            .filter(|grant| !grant.access.is_empty())
            .map(|grant| &grant.device)
    }

    /// The allow-list enforcing exactly this snapshot
    pub fn to_policy(&self) -> Result<DevicePolicy, oci_spec::OciSpecError> {
        let mut rules = Vec::with_capacity(self.grants.len() + 1);
        for grant in self.grants.values().filter(|grant| !grant.access.is_empty()) {
            rules.push(
                LinuxDeviceCgroupBuilder::default()
                    .allow(true)
                    .typ(grant.device.typ())
                    .major(grant.device.major())
                    .minor(grant.device.minor())
                    .access(grant.access.to_string())
                    .build()?,
            );
        }
        rules.extend(always_allowed());

        Ok(DevicePolicy::AllowList(rules))
    }

    /// What to write for a container, a disabled controller lifts every restriction
    pub fn policy(&self, controller_enabled: bool) -> Result<DevicePolicy, oci_spec::OciSpecError> {
        if controller_enabled {
            self.to_policy()
        } else {
            Ok(DevicePolicy::Unrestricted)
        }
    }
}

impl From<Vec<DeviceRule>> for EffectiveSnapshot {
    fn from(rules: Vec<DeviceRule>) -> Self {
        let mut snapshot = EffectiveSnapshot::default();
        for rule in &rules {
            snapshot.apply_rule(rule);
        }
        snapshot
    }
}

impl From<EffectiveSnapshot> for Vec<DeviceRule> {
    fn from(snapshot: EffectiveSnapshot) -> Self {
        snapshot
            .grants
            .into_values()
            .map(|grant| DeviceRule {
                device: grant.device,
                access: RuleAccess::Grant(grant.access),
            })
            .collect()
    }
}

impl Display for EffectiveSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, grant) in self.grants.values().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{} {}", grant.device.path().display(), grant.access)?;
        }
        Ok(())
    }
}
