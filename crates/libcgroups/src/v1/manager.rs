use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::devices::Devices;
use super::util::{self, V1MountPointError};
use crate::common::{
    self, DeviceCgroupManager, JoinSafelyError, PathBufExt, WrapIoResult, WrappedIoError,
};
use crate::policy::DevicePolicy;

#[derive(thiserror::Error, Debug)]
pub enum V1ManagerError {
    #[error("io error: {0}")]
    WrappedIo(#[from] WrappedIoError),
    #[error("mount point error: {0}")]
    MountPoint(#[from] V1MountPointError),
    #[error("join safely error: {0}")]
    JoinSafely(#[from] JoinSafelyError),
    #[error("failed to apply device policy to {path}: {err}")]
    Apply {
        path: PathBuf,
        #[source]
        err: WrappedIoError,
    },
}

/// Owns the v1 device cgroup of a single container.
#[derive(Debug, Clone)]
pub struct Manager {
    path: PathBuf,
}

impl Manager {
    /// Constructs a manager for cgroup_path, relative to the mount point of the devices controller
    pub fn new(cgroup_path: &Path) -> Result<Self, V1ManagerError> {
        let mount_point = util::get_devices_mount_point()?;
        Self::with_mount_point(mount_point, cgroup_path)
    }

    /// Constructs a manager below an explicitly given devices hierarchy
    pub fn with_mount_point(
        mount_point: PathBuf,
        cgroup_path: &Path,
    ) -> Result<Self, V1ManagerError> {
        let path = mount_point.join_safely(cgroup_path)?;
        tracing::debug!(?path, "device cgroup path");
        Ok(Manager { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DeviceCgroupManager for Manager {
    type Error = V1ManagerError;

    fn create(&self) -> Result<(), Self::Error> {
        fs::create_dir_all(&self.path).wrap_create_dir(&self.path)?;
        Ok(())
    }

    fn apply(&self, policy: &DevicePolicy) -> Result<(), Self::Error> {
        let previous = match Devices::current(&self.path) {
            Ok(lines) => Some(lines),
            Err(err) => {
                tracing::warn!(path = ?self.path, %err, "cannot read current device list, no rollback possible");
                None
            }
        };

        if let Err(err) = Devices::apply(policy, &self.path) {
            tracing::error!(path = ?self.path, %err, "failed to write device policy");
            if let Some(previous) = previous {
                if let Err(restore_err) = Devices::restore(&previous, &self.path) {
                    tracing::error!(path = ?self.path, err = %restore_err, "failed to restore previous device list");
                }
            }
            return Err(V1ManagerError::Apply {
                path: self.path.clone(),
                err,
            });
        }

        Ok(())
    }

    fn remove(&self) -> Result<(), Self::Error> {
        if self.path.exists() {
            tracing::debug!(path = ?self.path, "remove device cgroup");
            common::delete_with_retry(&self.path, 4, Duration::from_millis(100))?;
        }
        Ok(())
    }
}
