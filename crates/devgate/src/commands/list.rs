//! Contains functionality of list container command
use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use libdevices::roots::RootResolver;
use tabwriter::TabWriter;

use super::{Session, UNSET};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Table,
    Json,
}

/// List attached containers with their declared device rules
#[derive(Parser, Debug)]
pub struct List {
    #[clap(long, value_enum, default_value = "table")]
    pub format: Format,
}

pub fn list<W: Write>(args: List, session: &Session, out: W) -> Result<()> {
    match args.format {
        Format::Table => list_table(session, out),
        Format::Json => list_json(session, out),
    }
}

fn list_table<W: Write>(session: &Session, out: W) -> Result<()> {
    let mut content = String::new();
    for name in session.manager.containers() {
        let config = session.manager.declared_config(&name)?;
        let _ = writeln!(
            content,
            "{}\t{}\t{}\t{}",
            name,
            config.controller_enabled,
            config.devices().as_deref().unwrap_or(UNSET),
            session.roots.resolve_root(&name).display(),
        );
    }

    let mut tab_writer = TabWriter::new(out);
    writeln!(&mut tab_writer, "NAME\tCONTROLLER\tDEVICES\tROOT")?;
    write!(&mut tab_writer, "{content}")?;
    tab_writer.flush()?;

    Ok(())
}

fn list_json<W: Write>(session: &Session, mut out: W) -> Result<()> {
    let mut containers = Vec::new();
    for name in session.manager.containers() {
        let config = session.manager.declared_config(&name)?;
        containers.push(serde_json::json!({
            "name": name,
            "controllerEnabled": config.controller_enabled,
            "devices": config.devices(),
            "root": session.roots.resolve_root(&name),
        }));
    }

    serde_json::to_writer_pretty(&mut out, &containers)?;
    writeln!(out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use anyhow::Result;
    use libdevices::DeclaredConfig;

    use super::*;
    use crate::commands::tests::open_session;

    fn populate(session: &Session) -> Result<()> {
        let rules = session.manager.parse_rules("/dev/zero -")?;
        session
            .manager
            .on_create("a", DeclaredConfig::default().with_rules(rules))?;
        session.manager.on_create(
            "a/b",
            DeclaredConfig::default().with_controller(false),
        )?;
        session.roots.set("a", PathBuf::from("/nonexistent/a"));
        Ok(())
    }

    #[test]
    fn test_list_table() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let (session, _) = open_session(tmp.path())?;
        populate(&session)?;

        let mut out = Vec::new();
        list(List { format: Format::Table }, &session, &mut out)?;
        let out = String::from_utf8(out)?;
        let lines: Vec<Vec<&str>> = out
            .lines()
            .map(|line| {
                line.split("  ")
                    .map(str::trim)
                    .filter(|cell| !cell.is_empty())
                    .collect()
            })
            .collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], vec!["NAME", "CONTROLLER", "DEVICES", "ROOT"]);
        assert_eq!(lines[1], vec!["a", "true", "/dev/zero -", "/nonexistent/a"]);
        assert_eq!(lines[2], vec!["a/b", "false", "(unset)", "/nonexistent/a"]);
        Ok(())
    }

    #[test]
    fn test_list_json() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let (session, _) = open_session(tmp.path())?;
        populate(&session)?;

        let mut out = Vec::new();
        list(List { format: Format::Json }, &session, &mut out)?;
        let value: serde_json::Value = serde_json::from_slice(&out)?;
        let containers = value.as_array().expect("expected an array");
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0]["name"], "a");
        assert_eq!(containers[0]["devices"], "/dev/zero -");
        assert!(containers[1]["devices"].is_null());
        assert_eq!(containers[1]["controllerEnabled"], false);
        assert_eq!(containers[1]["root"], "/nonexistent/a");
        Ok(())
    }
}
