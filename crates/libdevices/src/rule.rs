//! Textual device rules as users declare them on a container.
use std::fmt::{self, Display};
use std::path::Path;
use std::str::FromStr;

use bitflags::bitflags;
use oci_spec::runtime::LinuxDevice;
use serde::{Deserialize, Serialize};

use crate::registry::{DeviceRegistry, RegistryError};

bitflags! {
    /// Access bits as understood by the devices cgroup
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Access: u8 {
        const READ = 0b001;
        const WRITE = 0b010;
        const MKNOD = 0b100;
    }
}

impl Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (flag, c) in [(Access::READ, 'r'), (Access::WRITE, 'w'), (Access::MKNOD, 'm')] {
            if self.contains(flag) {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid device rule {input:?}: {reason}")]
    InvalidRuleSyntax { input: String, reason: String },
    #[error(transparent)]
    UnknownDevice(#[from] RegistryError),
}

fn syntax_error(input: &str, reason: impl Into<String>) -> ParseError {
    ParseError::InvalidRuleSyntax {
        input: input.to_owned(),
        reason: reason.into(),
    }
}

/// What a single rule does to its device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RuleAccess {
    Grant(Access),
    /// Drops the device from the snapshot, whatever was inherited
    Revoke,
}

impl FromStr for RuleAccess {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "-" {
            return Ok(RuleAccess::Revoke);
        }
        if s.is_empty() {
            return Err(syntax_error(s, "empty permission"));
        }

        let mut access = Access::empty();
        for c in s.chars() {
            access |= match c.to_ascii_lowercase() {
                'r' => Access::READ,
                'w' => Access::WRITE,
                'm' => Access::MKNOD,
                other => {
                    return Err(syntax_error(s, format!("unknown permission {other:?}")));
                }
            };
        }

        Ok(RuleAccess::Grant(access))
    }
}

impl Display for RuleAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleAccess::Grant(access) => Display::fmt(access, f),
            RuleAccess::Revoke => f.write_str("-"),
        }
    }
}

impl TryFrom<String> for RuleAccess {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RuleAccess> for String {
    fn from(value: RuleAccess) -> Self {
        value.to_string()
    }
}

/// A device resolved at declaration time together with what to do with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRule {
    pub device: LinuxDevice,
    pub access: RuleAccess,
}

impl DeviceRule {
    pub fn path(&self) -> &Path {
        self.device.path()
    }
}

impl Display for DeviceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.path().display(), self.access)
    }
}

/// Parses `"<path> <perm>"` rules separated by `;` or newlines. Within one
/// chunk tokens are taken pairwise, so `"/dev/a r /dev/b w"` holds two rules.
/// An input without any tokens is the explicit empty declaration.
pub fn parse_rules(input: &str, registry: &dyn DeviceRegistry) -> Result<Vec<DeviceRule>, ParseError> {
    let mut rules = Vec::new();

    for chunk in input.split([';', '\n']) {
        let tokens: Vec<&str> = chunk.split_whitespace().collect();
        if tokens.len() % 2 != 0 {
            return Err(syntax_error(chunk.trim(), "expected \"<path> <permission>\""));
        }

        for pair in tokens.chunks(2) {
            let access: RuleAccess = pair[1]
                .parse()
                .map_err(|_| syntax_error(&pair.join(" "), format!("bad permission {:?}", pair[1])))?;
            let device = registry.lookup(Path::new(pair[0]))?;
            rules.push(DeviceRule { device, access });
        }
    }

    Ok(rules)
}

/// Renders rules in the form [`parse_rules`] accepts.
pub fn format_rules(rules: &[DeviceRule]) -> String {
    rules
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
