use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use libdevices::enforce::Enforcer;
use libdevices::roots::LayeredRoots;
use libdevices::store::FileStore;
use libdevices::{ApplyReport, DeviceManager, DeviceManagerBuilder, RestoreReport};

pub mod create;
pub mod destroy;
pub mod get;
pub mod list;
pub mod restore;
pub mod set;

const CONTAINERS_DIR: &str = "containers";
const ROOTS_FILE: &str = "roots.json";
const LOCK_FILE: &str = "devgate.lock";
/// Printed for a container that declares no rules and inherits its parent's
const UNSET: &str = "(unset)";

/// The reattached container tree of one invocation. Holds an exclusive
/// lock on the state directory until dropped.
pub struct Session {
    pub manager: DeviceManager,
    pub roots: Arc<LayeredRoots>,
    pub restored: RestoreReport,
    roots_file: PathBuf,
    _lock: Flock<File>,
}

impl Session {
    pub fn open(root_path: &Path, enforcer: Arc<dyn Enforcer>) -> Result<Self> {
        let store = FileStore::new(root_path.join(CONTAINERS_DIR))
            .with_context(|| format!("failed to open config store in {}", root_path.display()))?;
        let lock = lock_state_dir(root_path)?;
        let roots_file = root_path.join(ROOTS_FILE);
        let roots = Arc::new(LayeredRoots::load(&roots_file)?);
        let manager = DeviceManagerBuilder::new(enforcer, Arc::new(store))
            .with_roots(roots.clone())
            .build();

        let restored = manager.restore().context("failed to reattach containers")?;
        for (name, err) in &restored.failed {
            tracing::warn!(container = %name, %err, "container not reattached");
        }

        Ok(Session {
            manager,
            roots,
            restored,
            roots_file,
            _lock: lock,
        })
    }

    fn save_roots(&self) -> Result<()> {
        self.roots
            .save(&self.roots_file)
            .context("failed to save layered roots")
    }
}

/// Waits for any other invocation working on the same state directory
fn lock_state_dir(root_path: &Path) -> Result<Flock<File>> {
    let path = root_path.join(LOCK_FILE);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let locked = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Err((file, errno)) if errno == Errno::EWOULDBLOCK => {
            tracing::info!(?path, "waiting for another devgate invocation");
            Flock::lock(file, FlockArg::LockExclusive)
        }
        other => other,
    };
    locked
        .map_err(|(_, errno)| errno)
        .with_context(|| format!("failed to lock {}", path.display()))
}

fn warn_provisioning(report: &ApplyReport) {
    for failure in &report.provision_failures {
        tracing::warn!(
            container = %failure.container,
            path = ?failure.path,
            err = %failure.error,
            "device node missing, access is enforced regardless"
        );
    }
}
