#[cfg(test)]
#[macro_use]
extern crate quickcheck;

pub mod config;
pub mod enforce;
pub mod error;
pub mod manager;
pub mod registry;
pub mod roots;
pub mod rootfs;
pub mod rule;
pub mod snapshot;
pub mod store;
pub mod syscall;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
mod tree;

pub use config::{DeclaredConfig, RulesState, StoredConfig};
pub use error::DevicesError;
pub use manager::{ApplyReport, DeviceManager, DeviceManagerBuilder, ProvisionFailure, RestoreReport};
pub use tree::ROOT_NAME;
