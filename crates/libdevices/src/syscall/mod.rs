//! Contains a wrapper of the syscalls needed to put device nodes into a
//! container root, so that unit tests can run without privileges.

pub mod linux;
#[allow(clippy::module_inception)]
pub mod syscall;

pub use syscall::{create_syscall, NodeStat, Syscall};

#[derive(Debug, thiserror::Error)]
pub enum SyscallError {
    #[error("mknod {path:?} failed: {errno}")]
    MknodFailed {
        path: std::path::PathBuf,
        kind: nix::sys::stat::SFlag,
        perm: nix::sys::stat::Mode,
        dev: nix::sys::stat::dev_t,
        errno: nix::errno::Errno,
    },
    #[error("chown {path:?} failed: {errno}")]
    ChownFailed {
        path: std::path::PathBuf,
        owner: Option<nix::unistd::Uid>,
        group: Option<nix::unistd::Gid>,
        errno: nix::errno::Errno,
    },
    #[error("chmod {path:?} to {:o} failed: {errno}", .mode.bits())]
    ChmodFailed {
        path: std::path::PathBuf,
        mode: nix::sys::stat::Mode,
        errno: nix::errno::Errno,
    },
    #[error("stat {path:?} failed: {errno}")]
    StatFailed {
        path: std::path::PathBuf,
        errno: nix::errno::Errno,
    },
    #[error("unlink {path:?} failed: {errno}")]
    UnlinkFailed {
        path: std::path::PathBuf,
        errno: nix::errno::Errno,
    },
}

type Result<T> = std::result::Result<T, SyscallError>;
