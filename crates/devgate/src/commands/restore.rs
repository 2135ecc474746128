use std::io::Write;

use anyhow::Result;
use clap::Parser;

use super::Session;

/// Report which stored containers were reattached on startup
#[derive(Parser, Debug)]
pub struct Restore {}

pub fn restore<W: Write>(_: Restore, session: &Session, out: &mut W) -> Result<()> {
    let report = &session.restored;
    writeln!(
        out,
        "restored {} containers, {} failed",
        report.restored.len(),
        report.failed.len()
    )?;
    for (name, err) in &report.failed {
        writeln!(out, "{name}: {err}")?;
    }
    for failure in &report.provision_failures {
        writeln!(
            out,
            "{}: device node {} missing: {}",
            failure.container,
            failure.path.display(),
            failure.error
        )?;
    }

    Ok(())
}
