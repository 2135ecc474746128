//! In-memory doubles for the collaborators of [`crate::DeviceManager`].
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use libcgroups::DevicePolicy;
use oci_spec::runtime::{LinuxDevice, LinuxDeviceBuilder, LinuxDeviceType};

use crate::config::{DeclaredConfig, StoredConfig};
use crate::enforce::{EnforceError, Enforcer};
use crate::registry::{builtin_devices, DeviceRegistry, RegistryError};
use crate::store::{ConfigStore, StoreError};
use crate::tree::lock;

/// A fixed set of host devices
#[derive(Debug, Default, Clone)]
pub struct StaticRegistry {
    devices: BTreeMap<PathBuf, LinuxDevice>,
}

impl StaticRegistry {
    /// The built-in devices plus the ramdisks /dev/ram0 and /dev/ram1
    pub fn with_ram() -> Self {
        let mut registry = StaticRegistry::default();
        for device in builtin_devices() {
            registry.insert(device);
        }
        for minor in 0..2 {
            registry.insert(
                LinuxDeviceBuilder::default()
                    .path(format!("/dev/ram{minor}"))
                    .typ(LinuxDeviceType::B)
                    .major(1)
                    .minor(minor)
                    .file_mode(0o660u32)
                    .uid(0u32)
                    .gid(6u32)
                    .build()
                    .expect("build ramdisk"),
            );
        }
        registry
    }

    pub fn insert(&mut self, device: LinuxDevice) {
        self.devices.insert(device.path().to_path_buf(), device);
    }

    pub fn device(&self, path: &str) -> LinuxDevice {
        self.devices[Path::new(path)].clone()
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.devices.keys().cloned().collect()
    }
}

impl DeviceRegistry for StaticRegistry {
    fn lookup(&self, path: &Path) -> Result<LinuxDevice, RegistryError> {
        self.devices
            .get(path)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(path.to_path_buf()))
    }
}

/// Remembers the policy of every container instead of writing cgroups
#[derive(Debug, Default)]
pub struct RecordingEnforcer {
    policies: Mutex<HashMap<String, DevicePolicy>>,
    history: Mutex<Vec<(String, DevicePolicy)>>,
    released: Mutex<Vec<String>>,
    failures: Mutex<HashMap<String, usize>>,
}

impl RecordingEnforcer {
    pub fn policy(&self, container: &str) -> Option<DevicePolicy> {
        lock(&self.policies).get(container).cloned()
    }

    /// Whether a process of container may use device with the given access
    pub fn can_use(&self, container: &str, device: &LinuxDevice, access: &str) -> bool {
        self.policy(container).map_or(false, |policy| {
            policy.permits(device.typ(), device.major(), device.minor(), access)
        })
    }

    pub fn history(&self) -> Vec<(String, DevicePolicy)> {
        lock(&self.history).clone()
    }

    pub fn clear_history(&self) {
        lock(&self.history).clear();
    }

    pub fn released(&self) -> Vec<String> {
        lock(&self.released).clone()
    }

    /// Makes the next `times` writes for container fail
    pub fn fail_next(&self, container: &str, times: usize) {
        lock(&self.failures).insert(container.to_owned(), times);
    }
}

impl Enforcer for RecordingEnforcer {
    fn apply(&self, container: &str, policy: &DevicePolicy) -> Result<(), EnforceError> {
        if let Some(remaining) = lock(&self.failures).get_mut(container) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(EnforceError::Other(format!("injected write failure for {container}")));
            }
        }

        lock(&self.policies).insert(container.to_owned(), policy.clone());
        lock(&self.history).push((container.to_owned(), policy.clone()));
        Ok(())
    }

    fn release(&self, container: &str) -> Result<(), EnforceError> {
        lock(&self.policies).remove(container);
        lock(&self.released).push(container.to_owned());
        Ok(())
    }
}

/// Keeps declared configs in memory, optionally refusing to save
#[derive(Debug, Default)]
pub struct MemoryStore {
    configs: Mutex<BTreeMap<String, StoredConfig>>,
    fail_saves: AtomicBool,
}

impl MemoryStore {
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, container: &str) -> Option<DeclaredConfig> {
        self.stored(container).map(|stored| stored.config)
    }

    pub fn stored(&self, container: &str) -> Option<StoredConfig> {
        lock(&self.configs).get(container).cloned()
    }
}

impl ConfigStore for MemoryStore {
    fn load(&self, container: &str) -> Result<Option<StoredConfig>, StoreError> {
        Ok(self.stored(container))
    }

    fn save(&self, container: &str, config: &StoredConfig) -> Result<(), StoreError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::Write {
                path: PathBuf::from(container),
                source: std::io::Error::new(std::io::ErrorKind::Other, "injected save failure"),
            });
        }
        lock(&self.configs).insert(container.to_owned(), config.clone());
        Ok(())
    }

    fn remove(&self, container: &str) -> Result<(), StoreError> {
        lock(&self.configs).remove(container);
        Ok(())
    }

    fn list(&self) -> Result<Vec<(String, StoredConfig)>, StoreError> {
        Ok(lock(&self.configs)
            .iter()
            .map(|(name, config)| (name.clone(), config.clone()))
            .collect())
    }
}
