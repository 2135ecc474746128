//! The devices controller of cgroup v1 decides which device nodes the tasks
//! of a cgroup may read, write or create. This crate owns the kernel side of
//! that decision: it replaces the allow-list of one cgroup at a time.
#[cfg(test)]
#[macro_use]
extern crate quickcheck;

mod test;

pub mod common;
pub mod policy;
pub mod v1;

pub use common::DeviceCgroupManager;
pub use policy::DevicePolicy;
