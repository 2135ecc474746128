use std::io::Write;

use anyhow::Result;
use clap::{Parser, ValueEnum};

use super::{Session, UNSET};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Property {
    /// Declared device rules, `(unset)` when the container inherits
    Devices,
    /// Whether device access is enforced
    Controller,
    /// The resolved per device access the container runs with
    Effective,
}

/// Print one device property of a container
#[derive(Parser, Debug)]
pub struct Get {
    #[clap(required = true)]
    pub name: String,
    #[clap(value_enum, default_value = "devices")]
    pub property: Property,
}

pub fn get<W: Write>(args: Get, session: &Session, out: &mut W) -> Result<()> {
    let value = match args.property {
        Property::Devices => session
            .manager
            .declared_config(&args.name)?
            .devices()
            .unwrap_or_else(|| UNSET.to_owned()),
        Property::Controller => session.manager.controller_enabled(&args.name)?.to_string(),
        Property::Effective => session.manager.effective_snapshot(&args.name)?.to_string(),
    };
    writeln!(out, "{value}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use libdevices::DeclaredConfig;

    use super::*;
    use crate::commands::tests::open_session;

    fn run(session: &Session, name: &str, property: Property) -> Result<String> {
        let mut out = Vec::new();
        get(
            Get {
                name: name.to_owned(),
                property,
            },
            session,
            &mut out,
        )?;
        Ok(String::from_utf8(out)?)
    }

    #[test]
    fn test_get_properties() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let (session, _) = open_session(tmp.path())?;
        let rules = session.manager.parse_rules("/dev/zero -;/dev/null R")?;
        session
            .manager
            .on_create("a", DeclaredConfig::default().with_rules(rules))?;

        assert_eq!(run(&session, "a", Property::Devices)?, "/dev/zero -; /dev/null r\n");
        assert_eq!(run(&session, "a", Property::Controller)?, "true\n");
        let effective = run(&session, "a", Property::Effective)?;
        assert!(effective.contains("/dev/null r;"));
        assert!(!effective.contains("/dev/zero"));
        assert!(run(&session, "b", Property::Devices).is_err());
        Ok(())
    }

    #[test]
    fn test_get_devices_unset_and_empty() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let (session, _) = open_session(tmp.path())?;
        session.manager.on_create("a", DeclaredConfig::default())?;
        session
            .manager
            .on_create("b", DeclaredConfig::default().with_rules(Vec::new()))?;

        assert_eq!(run(&session, "a", Property::Devices)?, "(unset)\n");
        assert_eq!(run(&session, "b", Property::Devices)?, "\n");
        Ok(())
    }
}
