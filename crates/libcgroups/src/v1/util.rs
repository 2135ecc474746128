use std::path::PathBuf;

use procfs::process::Process;
use procfs::ProcError;

const DEVICES_SUBSYSTEM: &str = "devices";

#[derive(thiserror::Error, Debug)]
pub enum V1MountPointError {
    #[error("failed to read process info from /proc/self: {0}")]
    ReadSelf(ProcError),
    #[error("failed to get mountinfo: {0}")]
    MountInfo(ProcError),
    #[error("could not find mountpoint for {subsystem}")]
    NotFound { subsystem: &'static str },
}

/// Finds where the v1 devices controller is mounted. Named hierarchies and
/// the unified hierarchy are skipped.
pub fn get_devices_mount_point() -> Result<PathBuf, V1MountPointError> {
    Process::myself()
        .map_err(V1MountPointError::ReadSelf)?
        .mountinfo()
        .map_err(V1MountPointError::MountInfo)?
        .into_iter()
        .find(|m| m.fs_type == "cgroup" && m.mount_point.ends_with(DEVICES_SUBSYSTEM))
        .map(|m| m.mount_point)
        .ok_or(V1MountPointError::NotFound {
            subsystem: DEVICES_SUBSYSTEM,
        })
}
