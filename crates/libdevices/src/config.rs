//! Per container device configuration as declared by the user.
use serde::{Deserialize, Serialize};

use crate::rule::{format_rules, DeviceRule};
use crate::snapshot::EffectiveSnapshot;

/// The three states a container's own rule list can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RulesState {
    /// Never declared, the container inherits its parent's snapshot
    Unset,
    /// Declared as nothing, only built-in devices remain
    Empty,
    Populated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclaredConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<DeviceRule>>,
    #[serde(default = "default_controller_enabled")]
    pub controller_enabled: bool,
}

fn default_controller_enabled() -> bool {
    true
}

impl Default for DeclaredConfig {
    fn default() -> Self {
        DeclaredConfig {
            rules: None,
            controller_enabled: true,
        }
    }
}

impl DeclaredConfig {
    pub fn with_rules(mut self, rules: Vec<DeviceRule>) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_controller(mut self, enabled: bool) -> Self {
        self.controller_enabled = enabled;
        self
    }

    pub fn rules_state(&self) -> RulesState {
        match &self.rules {
            None => RulesState::Unset,
            Some(rules) if rules.is_empty() => RulesState::Empty,
            Some(_) => RulesState::Populated,
        }
    }

    /// Whether this container stops ancestor changes from reaching its subtree
    pub fn is_boundary(&self) -> bool {
        self.rules.is_some()
    }

    /// The rule list in wire format, None while unset
    pub fn devices(&self) -> Option<String> {
        self.rules.as_deref().map(format_rules)
    }

    /// Like [`DeclaredConfig::devices`], but unset and empty both render as ""
    pub fn devices_string(&self) -> String {
        self.devices().unwrap_or_default()
    }
}

/// The durable record of one container. An inheritance boundary also keeps
/// the parent snapshot its rules were last applied over, so that it comes
/// back unchanged even when its ancestors changed afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredConfig {
    #[serde(flatten)]
    pub config: DeclaredConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<EffectiveSnapshot>,
}

impl From<DeclaredConfig> for StoredConfig {
    fn from(config: DeclaredConfig) -> Self {
        StoredConfig {
            config,
            baseline: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::rule::parse_rules;
    use crate::test_utils::StaticRegistry;

    #[test]
    fn test_rules_state() -> Result<()> {
        let registry = StaticRegistry::with_ram();
        assert_eq!(DeclaredConfig::default().rules_state(), RulesState::Unset);
        assert!(!DeclaredConfig::default().is_boundary());

        let empty = DeclaredConfig::default().with_rules(vec![]);
        assert_eq!(empty.rules_state(), RulesState::Empty);
        assert!(empty.is_boundary());

        let populated = DeclaredConfig::default().with_rules(parse_rules("/dev/ram0 rw", &registry)?);
        assert_eq!(populated.rules_state(), RulesState::Populated);
        assert_eq!(populated.devices_string(), "/dev/ram0 rw");

        assert_eq!(DeclaredConfig::default().devices(), None);
        assert_eq!(empty.devices(), Some(String::new()));
        Ok(())
    }

    #[test]
    fn test_serde_keeps_unset_and_empty_apart() -> Result<()> {
        let unset: DeclaredConfig = serde_json::from_str("{}")?;
        assert_eq!(unset, DeclaredConfig::default());

        let empty = DeclaredConfig::default().with_rules(vec![]).with_controller(false);
        let json = serde_json::to_string(&empty)?;
        assert_eq!(json, r#"{"rules":[],"controllerEnabled":false}"#);
        let back: DeclaredConfig = serde_json::from_str(&json)?;
        assert_eq!(back.rules_state(), RulesState::Empty);
        assert!(!back.controller_enabled);

        assert_eq!(serde_json::to_string(&DeclaredConfig::default())?, r#"{"controllerEnabled":true}"#);
        Ok(())
    }

    #[test]
    fn test_stored_config_flattens_declaration() -> Result<()> {
        let registry = StaticRegistry::with_ram();
        let stored = StoredConfig {
            config: DeclaredConfig::default().with_rules(parse_rules("/dev/ram1 r", &registry)?),
            baseline: Some(EffectiveSnapshot::builtin()),
        };
        let value = serde_json::to_value(&stored)?;
        assert!(value["rules"].is_array());
        assert_eq!(value["baseline"].as_array().map(Vec::len), Some(8));

        let back: StoredConfig = serde_json::from_value(value)?;
        assert_eq!(back, stored);

        let plain: StoredConfig = serde_json::from_str(r#"{"controllerEnabled":false}"#)?;
        assert_eq!(plain, StoredConfig::from(DeclaredConfig::default().with_controller(false)));
        Ok(())
    }
}
