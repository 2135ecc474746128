use anyhow::{Context, Result};
use clap::Parser;

use super::Session;

/// Detach a container and everything below it
#[derive(Parser, Debug)]
pub struct Destroy {
    #[clap(required = true)]
    pub name: String,
}

pub fn destroy(args: Destroy, session: &Session) -> Result<()> {
    tracing::debug!("start destroying {}", args.name);
    session
        .manager
        .on_destroy(&args.name)
        .with_context(|| format!("failed to destroy container {}", args.name))?;
    session.roots.remove(&args.name);
    session.save_roots()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::Result;
    use libdevices::DeclaredConfig;

    use super::*;
    use crate::commands::tests::open_session;

    #[test]
    fn test_destroy_subtree() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        {
            let (session, _) = open_session(tmp.path())?;
            session.manager.on_create("a", DeclaredConfig::default())?;
            session.manager.on_create("a/b", DeclaredConfig::default())?;
            session.manager.on_create("c", DeclaredConfig::default())?;
            session.roots.set("a/b", PathBuf::from("/nonexistent/b"));

            destroy(
                Destroy {
                    name: "a".to_owned(),
                },
                &session,
            )?;
        }

        let (session, enforcer) = open_session(tmp.path())?;
        assert_eq!(session.manager.containers(), vec!["c"]);
        assert_eq!(session.roots.get("a/b"), None);
        assert!(enforcer.policy("a").is_none());
        Ok(())
    }

    #[test]
    fn test_destroy_missing() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let (session, _) = open_session(tmp.path())?;
        let result = destroy(
            Destroy {
                name: "missing".to_owned(),
            },
            &session,
        );
        assert!(result.is_err());
        Ok(())
    }
}
