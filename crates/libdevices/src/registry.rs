//! Resolves device paths on the host to their type and numbers.
use std::path::{Component, Path, PathBuf};

use nix::sys::stat::{major, minor, stat, SFlag};
use oci_spec::runtime::{
    LinuxDevice, LinuxDeviceBuilder, LinuxDeviceCgroup, LinuxDeviceCgroupBuilder, LinuxDeviceType,
};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0:?} is not a valid device path")]
    InvalidDevicePath(PathBuf),
    #[error("failed to stat {path:?}: {errno}")]
    Stat {
        path: PathBuf,
        errno: nix::errno::Errno,
    },
    #[error("{0:?} is not a device special file")]
    NotADevice(PathBuf),
    #[error("{0:?} is not a known device")]
    NotFound(PathBuf),
    #[error("failed to describe device: {0}")]
    Spec(#[from] oci_spec::OciSpecError),
}

/// Looks up what a device path refers to
pub trait DeviceRegistry: Send + Sync {
    fn lookup(&self, path: &Path) -> Result<LinuxDevice, RegistryError>;
}

/// Reads device metadata straight from the host's /dev
#[derive(Debug, Default, Clone)]
pub struct HostRegistry;

impl DeviceRegistry for HostRegistry {
    fn lookup(&self, path: &Path) -> Result<LinuxDevice, RegistryError> {
        validate_device_path(path)?;

        let st = stat(path).map_err(|errno| {
            tracing::debug!(?path, %errno, "device lookup failed");
            RegistryError::Stat {
                path: path.to_path_buf(),
                errno,
            }
        })?;

        let typ = match SFlag::from_bits_truncate(st.st_mode) & SFlag::S_IFMT {
            SFlag::S_IFCHR => LinuxDeviceType::C,
            SFlag::S_IFBLK => LinuxDeviceType::B,
            _ => return Err(RegistryError::NotADevice(path.to_path_buf())),
        };

        let device = LinuxDeviceBuilder::default()
            .path(path)
            .typ(typ)
            .major(major(st.st_rdev) as i64)
            .minor(minor(st.st_rdev) as i64)
            .file_mode(st.st_mode & 0o7777)
            .uid(st.st_uid)
            .gid(st.st_gid)
            .build()?;

        Ok(device)
    }
}

/// Device paths are absolute, live below /dev and never climb out of it.
pub fn validate_device_path(path: &Path) -> Result<(), RegistryError> {
    let climbs = path
        .components()
        .any(|c| matches!(c, Component::ParentDir | Component::CurDir));
    if !path.is_absolute() || !path.starts_with("/dev") || path == Path::new("/dev") || climbs {
        tracing::debug!(?path, "not a valid device path starting with /dev");
        return Err(RegistryError::InvalidDevicePath(path.to_path_buf()));
    }

    Ok(())
}

fn builtin(path: &str, major: i64, minor: i64) -> LinuxDevice {
    LinuxDeviceBuilder::default()
        .path(PathBuf::from(path))
        .typ(LinuxDeviceType::C)
        .major(major)
        .minor(minor)
        .file_mode(0o0666u32)
        .uid(0u32)
        .gid(0u32)
        .build()
        .unwrap()
}

/// Devices every container may use unless it revokes them.
pub fn builtin_devices() -> Vec<LinuxDevice> {
    vec![
        builtin("/dev/null", 1, 3),
        builtin("/dev/zero", 1, 5),
        builtin("/dev/full", 1, 7),
        builtin("/dev/random", 1, 8),
        builtin("/dev/urandom", 1, 9),
        builtin("/dev/tty", 5, 0),
        builtin("/dev/console", 5, 1),
        builtin("/dev/ptmx", 5, 2),
    ]
}

/// Rules that are not tied to a device path and are always part of an
/// enforced allow-list.
pub fn always_allowed() -> Vec<LinuxDeviceCgroup> {
    vec![
        // /dev/pts
        LinuxDeviceCgroupBuilder::default()
            .allow(true)
            .typ(LinuxDeviceType::C)
            .major(136)
            .access("rwm")
            .build()
            .unwrap(),
    ]
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::Result;
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;

    /// Counts events at warn level or above
    struct LoudEvents(Arc<AtomicUsize>);

    impl<S: tracing::Subscriber> Layer<S> for LoudEvents {
        fn on_event(&self, event: &tracing::Event<'_>, _: Context<'_, S>) {
            if *event.metadata().level() <= tracing::Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_rejected_path_stays_quiet() {
        let loud = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(LoudEvents(loud.clone()));
        tracing::subscriber::with_default(subscriber, || {
            assert!(validate_device_path(Path::new("/etc/passwd")).is_err());
        });
        assert_eq!(loud.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validate_device_path() {
        assert!(validate_device_path(Path::new("/dev/ram0")).is_ok());
        assert!(validate_device_path(Path::new("/dev/net/tun")).is_ok());
        assert!(validate_device_path(Path::new("dev/ram0")).is_err());
        assert!(validate_device_path(Path::new("/dev")).is_err());
        assert!(validate_device_path(Path::new("/etc/passwd")).is_err());
        assert!(validate_device_path(Path::new("/dev/../etc/passwd")).is_err());
        assert!(validate_device_path(Path::new("/devices/ram0")).is_err());
    }

    #[test]
    fn test_host_lookup_null() -> Result<()> {
        if !Path::new("/dev/null").exists() {
            return Ok(());
        }

        let device = HostRegistry.lookup(Path::new("/dev/null"))?;
        assert_eq!(device.typ(), LinuxDeviceType::C);
        assert_eq!(device.major(), 1);
        assert_eq!(device.minor(), 3);
        assert_eq!(device.path(), &PathBuf::from("/dev/null"));
        Ok(())
    }

    #[test]
    fn test_host_lookup_missing() {
        let err = HostRegistry
            .lookup(Path::new("/dev/does-not-exist-devgate"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Stat { .. }));
    }

    #[test]
    fn test_host_lookup_not_a_device() -> Result<()> {
        // /dev/shm is a directory on practically every linux host
        let shm = Path::new("/dev/shm");
        if !fs::metadata(shm).map(|m| m.is_dir()).unwrap_or(false) {
            return Ok(());
        }

        let err = HostRegistry.lookup(shm).unwrap_err();
        assert!(matches!(err, RegistryError::NotADevice(_)));
        Ok(())
    }

    #[test]
    fn test_builtin_devices_are_valid() {
        for device in builtin_devices() {
            assert!(validate_device_path(device.path()).is_ok());
            assert_eq!(device.typ(), LinuxDeviceType::C);
        }
        assert_eq!(always_allowed()[0].to_string(), "c 136:* rwm");
    }
}
