use std::fs::DirBuilder;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use nix::libc;
use nix::sys::stat::Mode;
use nix::unistd::{geteuid, getuid};

/// Creates path with mode unless it exists, then checks that it is a
/// directory owned by owner with at least mode set.
fn create_dir_all_with_mode(path: &Path, owner: u32, mode: Mode) -> Result<()> {
    if !path.exists() {
        DirBuilder::new()
            .recursive(true)
            .mode(mode.bits())
            .create(path)?;
    }

    let metadata = path.metadata()?;
    if metadata.is_dir() && metadata.uid() == owner && metadata.mode() & mode.bits() == mode.bits() {
        Ok(())
    } else {
        bail!("{} exists with unexpected owner or permissions", path.display())
    }
}

fn rootless_required() -> bool {
    !geteuid().is_root() || std::env::var("DEVGATE_USE_ROOTLESS").is_ok()
}

/// Picks the directory holding durable device configs
pub fn determine(root_path: Option<PathBuf>) -> Result<PathBuf> {
    let uid = getuid().as_raw();

    if let Some(path) = root_path {
        if !path.exists() {
            create_dir_all_with_mode(&path, uid, Mode::S_IRWXU)?;
        }
        let path = path.canonicalize()?;
        return Ok(path);
    }

    if !rootless_required() {
        let path = get_default_not_rootless_path();
        create_dir_all_with_mode(&path, uid, Mode::S_IRWXU)?;
        return Ok(path);
    }

    // see https://specifications.freedesktop.org/basedir-spec/basedir-spec-latest.html
    if let Ok(path) = std::env::var("XDG_RUNTIME_DIR") {
        let path = Path::new(&path).join("devgate");
        if create_dir_all_with_mode(&path, uid, Mode::S_IRWXU).is_ok() {
            return Ok(path);
        }
    }

    let path = get_default_rootless_path(uid);
    if create_dir_all_with_mode(&path, uid, Mode::S_IRWXU).is_ok() {
        return Ok(path);
    }

    let tmp_dir = PathBuf::from(format!("/tmp/devgate-{uid}"));
    if create_dir_all_with_mode(&tmp_dir, uid, Mode::S_IRWXU).is_ok() {
        return Ok(tmp_dir);
    }

    bail!("could not find a storage location with suitable permissions for the current user");
}

#[cfg(not(test))]
fn get_default_not_rootless_path() -> PathBuf {
    PathBuf::from("/run/devgate")
}

#[cfg(test)]
fn get_default_not_rootless_path() -> PathBuf {
    std::env::temp_dir().join("default_devgate_path")
}

#[cfg(not(test))]
fn get_default_rootless_path(uid: libc::uid_t) -> PathBuf {
    PathBuf::from(format!("/run/user/{uid}/devgate"))
}

#[cfg(test)]
fn get_default_rootless_path(uid: libc::uid_t) -> PathBuf {
    std::env::temp_dir().join(format!("default_rootless_devgate_path_{uid}"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use anyhow::{Context, Result};
    use serial_test::serial;

    use super::*;

    #[test]
    fn test_user_specified() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        // does not exist yet
        let specified_path = tmp.path().join("provided_path");
        let non_abs_path = specified_path.join("../provided_path");
        let path = determine(Some(non_abs_path)).context("failed with specified path")?;
        assert_eq!(path, specified_path);
        assert!(path.is_dir());
        Ok(())
    }

    #[test]
    fn test_user_specified_exists() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let specified_path = tmp.path().join("provided_path");
        fs::create_dir(&specified_path).context("failed to create dir")?;
        let path = determine(Some(specified_path.clone())).context("failed with specified path")?;
        assert_eq!(path, specified_path);
        Ok(())
    }

    #[test]
    fn test_create_dir_all_with_mode_rejects_files() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let file = tmp.path().join("file");
        fs::write(&file, "")?;
        assert!(create_dir_all_with_mode(&file, getuid().as_raw(), Mode::S_IRWXU).is_err());
        Ok(())
    }

    #[test]
    #[serial]
    fn test_determine_rootless_xdg() -> Result<()> {
        std::env::set_var("DEVGATE_USE_ROOTLESS", "true");
        let tmp = tempfile::tempdir()?;
        let xdg_dir = tmp.path().join("xdg_runtime");
        std::env::set_var("XDG_RUNTIME_DIR", &xdg_dir);

        let path = determine(None).context("failed with $XDG_RUNTIME_DIR path");
        std::env::remove_var("XDG_RUNTIME_DIR");
        std::env::remove_var("DEVGATE_USE_ROOTLESS");

        let path = path?;
        assert_eq!(path, xdg_dir.join("devgate"));
        assert!(path.exists());
        Ok(())
    }
}
