use oci_spec::runtime::{LinuxDeviceCgroup, LinuxDeviceType};

/// The complete device policy of one cgroup. Applying a policy always
/// replaces whatever the cgroup allowed before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevicePolicy {
    /// Only the listed rules are allowed, everything else is denied
    AllowList(Vec<LinuxDeviceCgroup>),
    /// The kernel imposes no device restriction
    Unrestricted,
}

impl DevicePolicy {
    pub fn rules(&self) -> &[LinuxDeviceCgroup] {
        match self {
            DevicePolicy::AllowList(rules) => rules,
            DevicePolicy::Unrestricted => &[],
        }
    }

    /// Evaluates an access request the way the v1 devices controller does:
    /// a request is granted when a single allow rule matches the device and
    /// covers every requested access bit.
    pub fn permits(&self, typ: LinuxDeviceType, major: i64, minor: i64, access: &str) -> bool {
        match self {
            DevicePolicy::Unrestricted => true,
            DevicePolicy::AllowList(rules) => rules
                .iter()
                .filter(|rule| rule.allow())
                .any(|rule| rule_matches(rule, typ, major, minor, access)),
        }
    }
}

fn rule_matches(
    rule: &LinuxDeviceCgroup,
    typ: LinuxDeviceType,
    major: i64,
    minor: i64,
    access: &str,
) -> bool {
    let type_matches = match rule.typ().unwrap_or_default() {
        LinuxDeviceType::A => true,
        LinuxDeviceType::C | LinuxDeviceType::U => {
            matches!(typ, LinuxDeviceType::C | LinuxDeviceType::U)
        }
        other => other == typ,
    };
    if !type_matches {
        return false;
    }

    if rule.major().map_or(false, |m| m != major) || rule.minor().map_or(false, |m| m != minor) {
        return false;
    }

    let granted = rule.access().as_deref().unwrap_or_default();
    !access.is_empty() && access.chars().all(|c| granted.contains(c))
}

#[cfg(test)]
mod tests {
    use oci_spec::runtime::LinuxDeviceCgroupBuilder;

    use super::*;

    fn allow(typ: LinuxDeviceType, major: Option<i64>, minor: Option<i64>, access: &str) -> LinuxDeviceCgroup {
        let mut builder = LinuxDeviceCgroupBuilder::default()
            .allow(true)
            .typ(typ)
            .access(access);
        if let Some(major) = major {
            builder = builder.major(major);
        }
        if let Some(minor) = minor {
            builder = builder.minor(minor);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_unrestricted_permits_everything() {
        assert!(DevicePolicy::Unrestricted.permits(LinuxDeviceType::B, 1, 0, "rwm"));
        assert!(DevicePolicy::Unrestricted.rules().is_empty());
    }

    #[test]
    fn test_empty_allow_list_denies() {
        let policy = DevicePolicy::AllowList(vec![]);
        assert!(!policy.permits(LinuxDeviceType::C, 1, 3, "r"));
    }

    #[test]
    fn test_exact_rule() {
        let policy = DevicePolicy::AllowList(vec![allow(LinuxDeviceType::B, Some(1), Some(0), "rw")]);
        assert!(policy.permits(LinuxDeviceType::B, 1, 0, "r"));
        assert!(policy.permits(LinuxDeviceType::B, 1, 0, "rw"));
        assert!(!policy.permits(LinuxDeviceType::B, 1, 0, "m"));
        assert!(!policy.permits(LinuxDeviceType::B, 1, 1, "r"));
        assert!(!policy.permits(LinuxDeviceType::C, 1, 0, "r"));
    }

    #[test]
    fn test_mknod_only_rule() {
        let policy = DevicePolicy::AllowList(vec![allow(LinuxDeviceType::B, Some(1), Some(0), "m")]);
        assert!(policy.permits(LinuxDeviceType::B, 1, 0, "m"));
        assert!(!policy.permits(LinuxDeviceType::B, 1, 0, "r"));
        assert!(!policy.permits(LinuxDeviceType::B, 1, 0, "w"));
    }

    #[test]
    fn test_wildcard_minor() {
        let policy = DevicePolicy::AllowList(vec![allow(LinuxDeviceType::C, Some(136), None, "rwm")]);
        assert!(policy.permits(LinuxDeviceType::C, 136, 0, "rw"));
        assert!(policy.permits(LinuxDeviceType::C, 136, 7, "rw"));
        assert!(!policy.permits(LinuxDeviceType::C, 137, 7, "rw"));
    }

    #[test]
    fn test_access_must_be_covered_by_one_rule() {
        let policy = DevicePolicy::AllowList(vec![
            allow(LinuxDeviceType::C, Some(1), Some(9), "r"),
            allow(LinuxDeviceType::C, Some(1), Some(9), "w"),
        ]);
        assert!(policy.permits(LinuxDeviceType::C, 1, 9, "r"));
        assert!(!policy.permits(LinuxDeviceType::C, 1, 9, "rw"));
    }
}
