//! Implements the Syscall trait against the running kernel
use std::any::Any;
use std::path::Path;

use nix::errno::Errno;
use nix::sys::stat::{fchmodat, lstat, mknod, FchmodatFlags, Mode, SFlag};
use nix::unistd::{chown, unlink, Gid, Uid};

use super::{NodeStat, Result, Syscall, SyscallError};

/// Empty structure to implement Syscall trait for
#[derive(Clone)]
pub struct LinuxSyscall;

impl Syscall for LinuxSyscall {
    /// To enable dynamic typing,
    /// see <https://doc.rust-lang.org/std/any/index.html> for more information
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn mknod(&self, path: &Path, kind: SFlag, perm: Mode, dev: u64) -> Result<()> {
        mknod(path, kind, perm, dev).map_err(|errno| SyscallError::MknodFailed {
            path: path.to_path_buf(),
            kind,
            perm,
            dev,
            errno,
        })
    }

    fn chown(&self, path: &Path, owner: Option<Uid>, group: Option<Gid>) -> Result<()> {
        chown(path, owner, group).map_err(|errno| SyscallError::ChownFailed {
            path: path.to_path_buf(),
            owner,
            group,
            errno,
        })
    }

    fn chmod(&self, path: &Path, mode: Mode) -> Result<()> {
        fchmodat(None, path, mode, FchmodatFlags::FollowSymlink).map_err(|errno| {
            SyscallError::ChmodFailed {
                path: path.to_path_buf(),
                mode,
                errno,
            }
        })
    }

    fn stat_node(&self, path: &Path) -> Result<Option<NodeStat>> {
        match lstat(path) {
            Ok(stat) => Ok(Some(NodeStat {
                kind: SFlag::from_bits_truncate(stat.st_mode) & SFlag::S_IFMT,
                rdev: stat.st_rdev,
            })),
            Err(Errno::ENOENT) => Ok(None),
            Err(errno) => Err(SyscallError::StatFailed {
                path: path.to_path_buf(),
                errno,
            }),
        }
    }

    fn unlink(&self, path: &Path) -> Result<()> {
        unlink(path).map_err(|errno| SyscallError::UnlinkFailed {
            path: path.to_path_buf(),
            errno,
        })
    }
}
