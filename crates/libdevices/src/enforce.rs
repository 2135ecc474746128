//! The single entry point through which device policies reach the kernel.
use std::path::{Path, PathBuf};

use libcgroups::v1::manager::{Manager, V1ManagerError};
use libcgroups::v1::util::{get_devices_mount_point, V1MountPointError};
use libcgroups::{DeviceCgroupManager, DevicePolicy};

#[derive(Debug, thiserror::Error)]
pub enum EnforceError {
    #[error(transparent)]
    V1(#[from] V1ManagerError),
    #[error(transparent)]
    MountPoint(#[from] V1MountPointError),
    #[error("invalid device policy: {0}")]
    Policy(#[from] oci_spec::OciSpecError),
    #[error("{0}")]
    Other(String),
}

/// Programs the device allow-list of a container's control group
pub trait Enforcer: Send + Sync {
    /// Replaces whatever the container was allowed before with policy
    fn apply(&self, container: &str, policy: &DevicePolicy) -> Result<(), EnforceError>;

    /// Drops the container's control group
    fn release(&self, container: &str) -> Result<(), EnforceError>;
}

/// Writes policies into one flat cgroup per container below
/// `<devices mount>/<prefix>`. Nesting container cgroups would let the v1
/// controller propagate parent changes, which snapshots must not see.
#[derive(Debug, Clone)]
pub struct CgroupEnforcer {
    mount_point: PathBuf,
    prefix: PathBuf,
}

impl CgroupEnforcer {
    pub fn new<P: Into<PathBuf>>(prefix: P) -> Result<Self, EnforceError> {
        let mount_point = get_devices_mount_point()?;
        Ok(Self::with_mount_point(mount_point, prefix))
    }

    pub fn with_mount_point<M: Into<PathBuf>, P: Into<PathBuf>>(mount_point: M, prefix: P) -> Self {
        CgroupEnforcer {
            mount_point: mount_point.into(),
            prefix: prefix.into(),
        }
    }

    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    /// Cgroup of container, relative to the mount point
    pub fn cgroup_path(&self, container: &str) -> PathBuf {
        self.prefix.join(container.replace('/', "%"))
    }

    fn manager(&self, container: &str) -> Result<Manager, EnforceError> {
        Ok(Manager::with_mount_point(
            self.mount_point.clone(),
            &self.cgroup_path(container),
        )?)
    }
}

impl Enforcer for CgroupEnforcer {
    fn apply(&self, container: &str, policy: &DevicePolicy) -> Result<(), EnforceError> {
        let manager = self.manager(container)?;
        manager.create()?;
        manager.apply(policy)?;
        tracing::debug!(container, path = ?manager.path(), rules = policy.rules().len(), "device policy enforced");
        Ok(())
    }

    fn release(&self, container: &str) -> Result<(), EnforceError> {
        self.manager(container)?.remove()?;
        Ok(())
    }
}
