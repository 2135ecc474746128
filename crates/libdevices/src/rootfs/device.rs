use std::path::{Path, PathBuf};

use nix::sys::stat::{makedev, Mode, SFlag};
use nix::unistd::{Gid, Uid};
use oci_spec::runtime::{LinuxDevice, LinuxDeviceType};

use crate::registry::validate_device_path;
use crate::syscall::{create_syscall, Syscall, SyscallError};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("{0:?} is not a valid device path")]
    InvalidDevicePath(PathBuf),
    #[error("failed to create device node {path:?}: {source}")]
    DeviceCreateFailed {
        path: PathBuf,
        #[source]
        source: SyscallError,
    },
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

type Result<T> = std::result::Result<T, DeviceError>;

pub fn to_sflag(dev_type: LinuxDeviceType) -> SFlag {
    match dev_type {
        LinuxDeviceType::B => SFlag::S_IFBLK,
        LinuxDeviceType::C | LinuxDeviceType::U | LinuxDeviceType::A => SFlag::S_IFCHR,
        LinuxDeviceType::P => SFlag::S_IFIFO,
    }
}

pub struct Device {
    syscall: Box<dyn Syscall>,
}

impl Default for Device {
    fn default() -> Self {
        Self::new()
    }
}

impl Device {
    pub fn new() -> Device {
        Device {
            syscall: create_syscall(),
        }
    }

    pub fn new_with_syscall(syscall: Box<dyn Syscall>) -> Device {
        Device { syscall }
    }

    pub fn syscall(&self) -> &dyn Syscall {
        self.syscall.as_ref()
    }

    /// Creates every device under rootfs, continuing past failures. The
    /// host root is never touched since its nodes are the originals.
    pub fn provision<'a, I>(&self, rootfs: &Path, devices: I) -> Vec<(PathBuf, DeviceError)>
    where
        I: IntoIterator<Item = &'a LinuxDevice>,
    {
        if rootfs == Path::new("/") {
            return Vec::new();
        }

        devices
            .into_iter()
            .filter_map(|dev| {
                self.materialize(rootfs, dev).err().map(|err| {
                    tracing::warn!(?rootfs, path = ?dev.path(), %err, "device node not provisioned");
                    (dev.path().to_path_buf(), err)
                })
            })
            .collect()
    }

    /// Puts a node equivalent to dev at the same path below rootfs. An
    /// identical node is left alone, a different one is replaced.
    pub fn materialize(&self, rootfs: &Path, dev: &LinuxDevice) -> Result<()> {
        validate_device_path(dev.path())
            .map_err(|_| DeviceError::InvalidDevicePath(dev.path().to_path_buf()))?;

        let full_container_path = create_container_dev_path(rootfs, dev)?;
        let kind = to_sflag(dev.typ());
        let rdev = makedev(dev.major() as u64, dev.minor() as u64);
        let create_failed = |source| DeviceError::DeviceCreateFailed {
            path: full_container_path.clone(),
            source,
        };

        match self.syscall.stat_node(&full_container_path).map_err(create_failed)? {
            Some(existing) if existing.kind == kind && existing.rdev == rdev => {
                tracing::trace!(path = ?full_container_path, "device node already present");
                return Ok(());
            }
            Some(existing) => {
                tracing::debug!(path = ?full_container_path, ?existing, "replacing stale node");
                self.syscall
                    .unlink(&full_container_path)
                    .map_err(create_failed)?;
            }
            None => {}
        }

        let perm = Mode::from_bits_truncate(dev.file_mode().unwrap_or(0o666));
        self.syscall
            .mknod(&full_container_path, kind, perm, rdev)
            .map_err(|err| {
                tracing::error!(
                    ?err,
                    path = ?full_container_path,
                    major = ?dev.major(),
                    minor = ?dev.minor(),
                    "failed to mknod device"
                );
                create_failed(err)
            })?;
        // mknod honors the umask, the node must carry the declared mode
        self.syscall
            .chmod(&full_container_path, perm)
            .map_err(create_failed)?;
        self.syscall
            .chown(
                &full_container_path,
                dev.uid().map(Uid::from_raw),
                dev.gid().map(Gid::from_raw),
            )
            .map_err(|err| {
                tracing::error!(
                    path = ?full_container_path,
                    ?err,
                    uid = ?dev.uid(),
                    gid = ?dev.gid(),
                    "failed to chown device"
                );
                create_failed(err)
            })?;

        Ok(())
    }
}

fn create_container_dev_path(rootfs: &Path, dev: &LinuxDevice) -> Result<PathBuf> {
    let relative_dev_path = dev
        .path()
        .strip_prefix("/")
        .map_err(|err| DeviceError::Other(err.into()))?;
    let full_container_path = safe_path::scoped_join(rootfs, relative_dev_path).map_err(|err| {
        tracing::error!("failed to join {rootfs:?} with {:?}: {err}", dev.path());
        DeviceError::Other(err.into())
    })?;
    std::fs::create_dir_all(
        full_container_path
            .parent()
            .unwrap_or_else(|| Path::new("")),
    )
    .map_err(|err| {
        tracing::error!(
            "failed to create parent dir of {:?}: {}",
            full_container_path,
            err
        );
        DeviceError::Other(err.into())
    })?;

    Ok(full_container_path)
}
