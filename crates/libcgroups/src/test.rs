#![cfg(test)]

use anyhow::{Context, Result};
use std::{
    io::Write,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

use crate::common::{DEVICES_ALLOW, DEVICES_DENY, DEVICES_LIST};

/// Creates a scratch directory that looks like a v1 device cgroup.
pub fn setup_devices() -> TempDir {
    let tmp = tempfile::tempdir().expect("create temp directory for test");
    for file in [DEVICES_ALLOW, DEVICES_DENY, DEVICES_LIST] {
        set_fixture(tmp.path(), file, "")
            .unwrap_or_else(|_| panic!("set test fixture for {file}"));
    }
    tmp
}

pub fn set_fixture(temp_dir: &Path, filename: &str, val: &str) -> Result<PathBuf> {
    let full_path = temp_dir.join(filename);

    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&full_path)
        .with_context(|| format!("failed to open {full_path:?}"))?
        .write_all(val.as_bytes())
        .with_context(|| format!("failed to write to {full_path:?}"))?;

    Ok(full_path)
}
