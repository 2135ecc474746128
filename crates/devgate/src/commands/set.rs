use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use super::{warn_provisioning, Session};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    Devices,
    Controller,
}

/// Change one device property of a running container
#[derive(Parser, Debug)]
pub struct Set {
    #[clap(required = true)]
    pub name: String,
    #[clap(value_enum)]
    pub property: Property,
    /// Rules for devices, true or false for controller
    pub value: String,
}

pub fn set(args: Set, session: &Session) -> Result<()> {
    tracing::debug!("start setting {:?} of {}", args.property, args.name);
    let report = match args.property {
        Property::Devices => session.manager.set_devices(&args.name, &args.value),
        Property::Controller => {
            let enabled: bool = args
                .value
                .parse()
                .with_context(|| format!("controller must be true or false, got {:?}", args.value))?;
            session.manager.set_controller_enabled(&args.name, enabled)
        }
    }
    .with_context(|| format!("failed to update container {}", args.name))?;

    warn_provisioning(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use libcgroups::DevicePolicy;
    use libdevices::DeclaredConfig;

    use super::*;
    use crate::commands::tests::open_session;

    fn args(name: &str, property: Property, value: &str) -> Set {
        Set {
            name: name.to_owned(),
            property,
            value: value.to_owned(),
        }
    }

    #[test]
    fn test_set_devices_survives_restart() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        {
            let (session, _) = open_session(tmp.path())?;
            session.manager.on_create("a", DeclaredConfig::default())?;
            session.manager.on_create("a/b", DeclaredConfig::default())?;
            set(args("a", Property::Devices, "/dev/zero -"), &session)?;
        }

        let (session, _) = open_session(tmp.path())?;
        assert_eq!(session.manager.get_devices("a")?, "/dev/zero -");
        let snapshot = session.manager.effective_snapshot("a/b")?;
        assert!(snapshot.get(std::path::Path::new("/dev/zero")).is_none());
        Ok(())
    }

    #[test]
    fn test_boundary_survives_next_invocation() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let before = {
            let (session, _) = open_session(tmp.path())?;
            for name in ["s", "s/m", "s/m/a"] {
                session.manager.on_create(name, DeclaredConfig::default())?;
            }
            set(args("s/m", Property::Devices, "/dev/zero -"), &session)?;
            set(args("s", Property::Devices, "/dev/null -"), &session)?;
            session.manager.effective_snapshot("s/m/a")?
        };

        let (session, _) = open_session(tmp.path())?;
        let after = session.manager.effective_snapshot("s/m/a")?;
        assert_eq!(after, before);
        assert!(after.get(std::path::Path::new("/dev/null")).is_some());
        assert!(after.get(std::path::Path::new("/dev/zero")).is_none());
        Ok(())
    }

    #[test]
    fn test_set_controller() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let (session, enforcer) = open_session(tmp.path())?;
        session.manager.on_create("a", DeclaredConfig::default())?;

        set(args("a", Property::Controller, "false"), &session)?;
        assert_eq!(enforcer.policy("a"), Some(DevicePolicy::Unrestricted));
        assert!(set(args("a", Property::Controller, "maybe"), &session).is_err());
        assert!(!session.manager.controller_enabled("a")?);
        Ok(())
    }
}
