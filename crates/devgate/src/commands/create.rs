//! Contains functionality of create container command
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use libdevices::DeclaredConfig;

use super::{warn_provisioning, Session};

/// Attach a container below its parent, e.g. `a/b` below `a`
#[derive(Parser, Debug)]
pub struct Create {
    #[clap(required = true)]
    pub name: String,
    /// Device rules like "/dev/ram0 rw; /dev/null -", an empty string
    /// drops everything inherited
    #[clap(long)]
    pub devices: Option<String>,
    /// Whether device access is enforced at all
    #[clap(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub controller: bool,
    /// Root filesystem the container runs in, inherited by descendants
    #[clap(long)]
    pub rootfs: Option<PathBuf>,
}

pub fn create(args: Create, session: &Session) -> Result<()> {
    tracing::debug!("start creating {}", args.name);
    if session.manager.declared_config(&args.name).is_ok() {
        bail!("container {} already exists", args.name);
    }

    let mut config = DeclaredConfig::default().with_controller(args.controller);
    if let Some(devices) = &args.devices {
        config = config.with_rules(session.manager.parse_rules(devices)?);
    }

    if let Some(rootfs) = &args.rootfs {
        session.roots.set(&args.name, rootfs.clone());
    }
    let report = match session.manager.on_create(&args.name, config) {
        Ok(report) => report,
        Err(err) => {
            session.roots.remove(&args.name);
            return Err(err).with_context(|| format!("failed to create container {}", args.name));
        }
    };
    if args.rootfs.is_some() {
        session.save_roots()?;
    }

    warn_provisioning(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use libdevices::RulesState;

    use super::*;
    use crate::commands::tests::open_session;

    fn args(name: &str, devices: Option<&str>) -> Create {
        Create {
            name: name.to_owned(),
            devices: devices.map(str::to_owned),
            controller: true,
            rootfs: None,
        }
    }

    #[test]
    fn test_create_persists_config() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        {
            let (session, enforcer) = open_session(tmp.path())?;
            create(args("a", Some("/dev/zero -")), &session)?;
            create(args("a/b", None), &session)?;
            assert!(enforcer.policy("a/b").is_some());
        }

        let (session, enforcer) = open_session(tmp.path())?;
        assert_eq!(session.restored.restored, vec!["a", "a/b"]);
        assert_eq!(session.manager.get_devices("a")?, "/dev/zero -");
        assert_eq!(
            session.manager.declared_config("a/b")?.rules_state(),
            RulesState::Unset
        );
        assert!(enforcer.policy("a/b").is_some());
        Ok(())
    }

    #[test]
    fn test_create_twice_fails() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let (session, _) = open_session(tmp.path())?;
        create(args("a", None), &session)?;
        assert!(create(args("a", Some("")), &session).is_err());
        assert_eq!(session.manager.get_devices("a")?, "");
        Ok(())
    }

    #[test]
    fn test_create_with_rootfs() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let rootfs = tmp.path().join("rootfs");
        {
            let (session, _) = open_session(tmp.path())?;
            let mut create_args = args("a", Some(""));
            create_args.rootfs = Some(rootfs.clone());
            create(create_args, &session)?;
        }

        let (session, _) = open_session(tmp.path())?;
        assert_eq!(session.roots.get("a"), Some(rootfs));
        Ok(())
    }

    #[test]
    fn test_create_rejects_unknown_device() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let (session, enforcer) = open_session(tmp.path())?;
        assert!(create(args("a", Some("/dev/devgate-missing rw")), &session).is_err());
        assert!(session.manager.containers().is_empty());
        assert!(enforcer.history().is_empty());
        Ok(())
    }
}
