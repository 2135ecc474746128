//! Device nodes inside container root filesystems.
pub mod device;

pub use device::{Device, DeviceError};
