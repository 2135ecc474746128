use std::path::Path;

use oci_spec::runtime::LinuxDeviceCgroup;

use crate::common::{self, WrappedIoError, DEVICES_ALLOW, DEVICES_DENY, DEVICES_LIST};
use crate::policy::DevicePolicy;

// Writing "a" to devices.deny drops every exception of the cgroup, writing
// it to devices.allow turns the cgroup into allow-all.
const ALL_DEVICES: &str = "a";

pub struct Devices {}

impl Devices {
    pub fn apply(policy: &DevicePolicy, cgroup_root: &Path) -> Result<(), WrappedIoError> {
        tracing::debug!(path = ?cgroup_root, "apply devices cgroup config");

        match policy {
            DevicePolicy::Unrestricted => {
                common::write_cgroup_file_str(cgroup_root.join(DEVICES_ALLOW), ALL_DEVICES)
            }
            DevicePolicy::AllowList(rules) => {
                common::write_cgroup_file_str(cgroup_root.join(DEVICES_DENY), ALL_DEVICES)?;
                for rule in rules {
                    Self::apply_device(rule, cgroup_root)?;
                }
                Ok(())
            }
        }
    }

    /// Reads the exceptions currently enforced by the kernel, one rule per line.
    pub fn current(cgroup_root: &Path) -> Result<Vec<String>, WrappedIoError> {
        let content = common::read_cgroup_file(cgroup_root.join(DEVICES_LIST))?;
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect())
    }

    /// Puts back a list previously returned by [`Devices::current`].
    pub fn restore(lines: &[String], cgroup_root: &Path) -> Result<(), WrappedIoError> {
        common::write_cgroup_file_str(cgroup_root.join(DEVICES_DENY), ALL_DEVICES)?;
        for line in lines {
            common::write_cgroup_file_str(cgroup_root.join(DEVICES_ALLOW), line)?;
        }
        Ok(())
    }

    fn apply_device(device: &LinuxDeviceCgroup, cgroup_root: &Path) -> Result<(), WrappedIoError> {
        let path = if device.allow() {
            cgroup_root.join(DEVICES_ALLOW)
        } else {
            cgroup_root.join(DEVICES_DENY)
        };

        common::write_cgroup_file_str(path, &device.to_string())?;
        Ok(())
    }
}
