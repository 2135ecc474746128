//! # devgate
//! Keeps the device cgroups of a tree of containers in line with the device
//! rules declared on them. Every invocation reattaches the stored tree and
//! then performs one lifecycle or property operation.
mod commands;
mod observability;
mod rootpath;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{crate_version, Parser};
use libdevices::enforce::{CgroupEnforcer, Enforcer};

#[derive(Parser, Debug)]
pub struct GlobalOpts {
    /// Directory holding the declared device configs
    #[clap(long)]
    pub root: Option<PathBuf>,
    /// Mount point of the cgroup v1 devices hierarchy, discovered when omitted
    #[clap(long)]
    pub cgroup_root: Option<PathBuf>,
    /// Directory below the devices hierarchy that holds container cgroups
    #[clap(long, default_value = "devgate")]
    pub cgroup_prefix: PathBuf,
    /// Write logs to this file instead of stderr
    #[clap(long)]
    pub log: Option<PathBuf>,
    #[clap(long, value_enum, default_value = "text")]
    pub log_format: observability::LogFormat,
    /// Log level, takes precedence over --debug
    #[clap(long)]
    pub log_level: Option<String>,
    #[clap(long)]
    pub debug: bool,
    /// Also send logs to journald
    #[clap(long)]
    pub systemd_log: bool,
}

#[derive(Parser, Debug)]
#[clap(version = crate_version!(), author = env!("CARGO_PKG_AUTHORS"))]
struct Opts {
    #[clap(flatten)]
    global: GlobalOpts,

    #[clap(subcommand)]
    subcmd: SubCommand,
}

#[derive(Parser, Debug)]
enum SubCommand {
    Create(commands::create::Create),
    Destroy(commands::destroy::Destroy),
    Get(commands::get::Get),
    Set(commands::set::Set),
    List(commands::list::List),
    Restore(commands::restore::Restore),
}

fn create_enforcer(opts: &GlobalOpts) -> Result<Arc<dyn Enforcer>> {
    let enforcer = match &opts.cgroup_root {
        Some(mount_point) => CgroupEnforcer::with_mount_point(mount_point, &opts.cgroup_prefix),
        None => {
            let setup = libcgroups::common::get_cgroup_setup()
                .context("failed to detect cgroup setup")?;
            if !setup.has_v1_devices() {
                bail!(
                    "device access control needs the cgroup v1 devices controller, this host has a {} hierarchy",
                    setup
                );
            }
            CgroupEnforcer::new(&opts.cgroup_prefix)
                .context("failed to locate the devices controller")?
        }
    };

    Ok(Arc::new(enforcer))
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    if let Err(e) = observability::init(&opts.global) {
        eprintln!("log init failed: {:?}", e);
    }

    tracing::debug!(
        "started by user {} with {:?}",
        nix::unistd::geteuid(),
        std::env::args_os()
    );
    let root_path = rootpath::determine(opts.global.root.clone())?;
    let enforcer = create_enforcer(&opts.global)?;
    let session = commands::Session::open(&root_path, enforcer)?;

    match opts.subcmd {
        SubCommand::Create(create) => commands::create::create(create, &session),
        SubCommand::Destroy(destroy) => commands::destroy::destroy(destroy, &session),
        SubCommand::Get(get) => commands::get::get(get, &session, &mut std::io::stdout()),
        SubCommand::Set(set) => commands::set::set(set, &session),
        SubCommand::List(list) => commands::list::list(list, &session, std::io::stdout()),
        SubCommand::Restore(restore) => {
            commands::restore::restore(restore, &session, &mut std::io::stdout())
        }
    }
}
