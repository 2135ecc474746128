//! Where a container's processes see their filesystem root.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::store::StoreError;

pub trait RootResolver: Send + Sync {
    fn resolve_root(&self, container: &str) -> PathBuf;
}

/// Every container runs in the host root
#[derive(Debug, Default, Clone)]
pub struct HostRoot;

impl RootResolver for HostRoot {
    fn resolve_root(&self, _container: &str) -> PathBuf {
        PathBuf::from("/")
    }
}

/// Layered roots registered per container. A container without its own
/// root runs in its nearest ancestor's.
#[derive(Debug, Default)]
pub struct LayeredRoots {
    roots: RwLock<BTreeMap<String, PathBuf>>,
}

impl LayeredRoots {
    pub fn set(&self, container: &str, root: PathBuf) {
        self.write().insert(container.to_owned(), root);
    }

    /// Forgets container and every root registered below it
    pub fn remove(&self, container: &str) {
        let prefix = format!("{container}/");
        self.write()
            .retain(|name, _| name != container && !name.starts_with(&prefix));
    }

    pub fn get(&self, container: &str) -> Option<PathBuf> {
        self.read().get(container).cloned()
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|err| StoreError::Open {
            path: path.to_owned(),
            source: err,
        })?;
        let roots = serde_json::from_str(&content).map_err(|err| {
            tracing::error!(?path, %err, "failed to parse layered roots");
            StoreError::Parse {
                path: path.to_owned(),
                source: err,
            }
        })?;

        Ok(LayeredRoots {
            roots: RwLock::new(roots),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(&*self.read()).map_err(|err| StoreError::Parse {
            path: path.to_owned(),
            source: err,
        })?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, content)
            .and_then(|_| fs::rename(&tmp_path, path))
            .map_err(|err| {
                tracing::error!(?path, %err, "failed to save layered roots");
                StoreError::Write {
                    path: path.to_owned(),
                    source: err,
                }
            })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, PathBuf>> {
        self.roots.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, PathBuf>> {
        self.roots.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl RootResolver for LayeredRoots {
    fn resolve_root(&self, container: &str) -> PathBuf {
        let roots = self.read();
        let mut name = container;
        loop {
            if let Some(root) = roots.get(name) {
                return root.clone();
            }
            match name.rsplit_once('/') {
                Some((parent, _)) => name = parent,
                None => return PathBuf::from("/"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;

    #[test]
    fn test_host_root() {
        assert_eq!(HostRoot.resolve_root("a/b"), PathBuf::from("/"));
    }

    #[test]
    fn test_nearest_ancestor_root() {
        let roots = LayeredRoots::default();
        roots.set("a", PathBuf::from("/place/a"));
        roots.set("a/b/c", PathBuf::from("/place/c"));

        assert_eq!(roots.resolve_root("a"), PathBuf::from("/place/a"));
        assert_eq!(roots.resolve_root("a/b"), PathBuf::from("/place/a"));
        assert_eq!(roots.resolve_root("a/b/c/d"), PathBuf::from("/place/c"));
        assert_eq!(roots.resolve_root("ab"), PathBuf::from("/"));
    }

    #[test]
    fn test_remove_subtree() {
        let roots = LayeredRoots::default();
        roots.set("a", PathBuf::from("/place/a"));
        roots.set("a/b", PathBuf::from("/place/b"));
        roots.set("ab", PathBuf::from("/place/ab"));

        roots.remove("a");

        assert_eq!(roots.get("a"), None);
        assert_eq!(roots.get("a/b"), None);
        assert_eq!(roots.get("ab"), Some(PathBuf::from("/place/ab")));
    }

    #[test]
    fn test_save_and_load() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let file = tmp.path().join("roots.json");
        assert_eq!(LayeredRoots::load(&file)?.get("a"), None);

        let roots = LayeredRoots::default();
        roots.set("a", PathBuf::from("/place/a"));
        roots.save(&file)?;

        let loaded = LayeredRoots::load(&file)?;
        assert_eq!(loaded.resolve_root("a/b"), PathBuf::from("/place/a"));
        Ok(())
    }
}
