use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use crate::GlobalOpts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: &str = "debug";

#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: &str = "error";

/// --log-level wins over --debug. Accepts full filter directives such as
/// `libdevices=trace`.
fn log_filter(log_level: Option<&str>, debug: bool) -> Result<EnvFilter> {
    let directive = match log_level {
        Some(level) => level,
        None if debug => "debug",
        None => DEFAULT_LOG_LEVEL,
    };
    EnvFilter::try_new(directive).with_context(|| format!("invalid log level {directive:?}"))
}

pub fn init(opts: &GlobalOpts) -> Result<()> {
    let filter = log_filter(opts.log_level.as_deref(), opts.debug)?;
    let writer = match &opts.log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path.display()))?;
            BoxMakeWriter::new(Arc::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match opts.log_format {
        LogFormat::Text => tracing_subscriber::fmt::layer().with_writer(writer).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_span_list(false)
            .with_writer(writer)
            .boxed(),
    };

    let journald = if opts.systemd_log {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer.with_syslog_identifier("devgate".to_owned())),
            Err(err) => {
                // journald is missing in most containers
                eprintln!("failed to initialize journald logging: {err:?}");
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .with(journald)
        .try_init()
        .context("failed to init logger")
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tracing_subscriber::filter::LevelFilter;

    use super::*;

    #[test]
    fn test_log_level_precedence() -> Result<()> {
        let hint = |level, debug| log_filter(level, debug).map(|f| f.max_level_hint());

        assert_eq!(hint(Some("warn"), true)?, Some(LevelFilter::WARN));
        assert_eq!(hint(None, true)?, Some(LevelFilter::DEBUG));
        assert_eq!(hint(Some("libdevices=trace"), false)?, Some(LevelFilter::TRACE));
        let want = if cfg!(debug_assertions) {
            LevelFilter::DEBUG
        } else {
            LevelFilter::ERROR
        };
        assert_eq!(hint(None, false)?, Some(want));
        Ok(())
    }

    #[test]
    fn test_invalid_log_level() {
        assert!(log_filter(Some("devgate=loud"), false).is_err());
    }

    #[test]
    fn test_log_format() {
        assert_eq!(LogFormat::from_str("json", false), Ok(LogFormat::Json));
        assert_eq!(LogFormat::from_str("text", false), Ok(LogFormat::Text));
        assert!(LogFormat::from_str("yaml", false).is_err());
    }
}
