//! An interface trait so that the rest of the crate can call
//! necessary functions without having to worry about their
//! implementation details
use std::any::Any;
use std::path::Path;

use nix::sys::stat::{Mode, SFlag};
use nix::unistd::{Gid, Uid};

use crate::syscall::linux::LinuxSyscall;
use crate::syscall::Result;

/// File type and device number of an existing filesystem entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStat {
    pub kind: SFlag,
    pub rdev: u64,
}

pub trait Syscall: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn mknod(&self, path: &Path, kind: SFlag, perm: Mode, dev: u64) -> Result<()>;
    fn chown(&self, path: &Path, owner: Option<Uid>, group: Option<Gid>) -> Result<()>;
    /// Sets the permission bits exactly, regardless of the process umask
    fn chmod(&self, path: &Path, mode: Mode) -> Result<()>;
    /// Returns None when nothing exists at path. Symlinks are not followed.
    fn stat_node(&self, path: &Path) -> Result<Option<NodeStat>>;
    fn unlink(&self, path: &Path) -> Result<()>;
}

#[derive(Clone, Copy)]
pub enum SyscallType {
    Linux,
    #[cfg(any(test, feature = "test_utils"))]
    Test,
}

impl Default for SyscallType {
    #[cfg(test)]
    fn default() -> Self {
        SyscallType::Test
    }

    #[cfg(not(test))]
    fn default() -> Self {
        SyscallType::Linux
    }
}

impl SyscallType {
    pub fn create_syscall(&self) -> Box<dyn Syscall> {
        match self {
            SyscallType::Linux => Box::new(LinuxSyscall),
            #[cfg(any(test, feature = "test_utils"))]
            SyscallType::Test => Box::<crate::syscall::test::TestHelperSyscall>::default(),
        }
    }
}

pub fn create_syscall() -> Box<dyn Syscall> {
    SyscallType::default().create_syscall()
}
