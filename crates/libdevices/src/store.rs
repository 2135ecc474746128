//! Durable storage of declared configs. Effective snapshots are rebuilt
//! from these records, only an inheritance boundary keeps the baseline it
//! was resolved against.
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::StoredConfig;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open config file {path:?}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write config file {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to remove config file {path:?}: {source}")]
    Remove {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to list config directory {path:?}: {source}")]
    List {
        path: PathBuf,
        source: std::io::Error,
    },
}

type Result<T> = std::result::Result<T, StoreError>;

pub trait ConfigStore: Send + Sync {
    fn load(&self, container: &str) -> Result<Option<StoredConfig>>;
    fn save(&self, container: &str, config: &StoredConfig) -> Result<()>;
    fn remove(&self, container: &str) -> Result<()>;
    /// Every stored container, in no particular order
    fn list(&self) -> Result<Vec<(String, StoredConfig)>>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Record {
    name: String,
    #[serde(flatten)]
    config: StoredConfig,
}

/// Keeps one json file per container in a directory
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

const EXTENSION: &str = "json";

impl FileStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| StoreError::Write {
            path: dir.clone(),
            source: err,
        })?;
        Ok(FileStore { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_path(&self, container: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{EXTENSION}", container.replace('/', "%")))
    }

    fn read_record(path: &Path) -> Result<Record> {
        let file = File::open(path).map_err(|err| {
            tracing::error!(?path, %err, "failed to open container config file");
            StoreError::Open {
                path: path.to_owned(),
                source: err,
            }
        })?;

        serde_json::from_reader(BufReader::new(file)).map_err(|err| {
            tracing::error!(?path, %err, "failed to parse container config file");
            StoreError::Parse {
                path: path.to_owned(),
                source: err,
            }
        })
    }
}

impl ConfigStore for FileStore {
    #[instrument(level = "trace", skip(self))]
    fn load(&self, container: &str) -> Result<Option<StoredConfig>> {
        let path = self.file_path(container);
        if !path.exists() {
            return Ok(None);
        }

        Ok(Some(Self::read_record(&path)?.config))
    }

    /// Written to a temporary file first so a crash never leaves a torn record
    #[instrument(level = "trace", skip(self, config))]
    fn save(&self, container: &str, config: &StoredConfig) -> Result<()> {
        let path = self.file_path(container);
        let tmp_path = path.with_extension("tmp");
        let write_err = |err: std::io::Error| {
            tracing::error!(path = ?tmp_path, %err, "failed to write container config file");
            StoreError::Write {
                path: tmp_path.clone(),
                source: err,
            }
        };

        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(write_err)?;
        let mut writer = BufWriter::new(file);
        let record = Record {
            name: container.to_owned(),
            config: config.clone(),
        };
        serde_json::to_writer(&mut writer, &record).map_err(|err| {
            tracing::error!(path = ?tmp_path, %err, "failed to serialize container config");
            StoreError::Parse {
                path: tmp_path.clone(),
                source: err,
            }
        })?;
        writer.flush().map_err(write_err)?;
        writer
            .into_inner()
            .map_err(|err| write_err(err.into_error()))?
            .sync_all()
            .map_err(write_err)?;

        fs::rename(&tmp_path, &path).map_err(|err| {
            tracing::error!(?path, %err, "failed to replace container config file");
            StoreError::Write {
                path: path.clone(),
                source: err,
            }
        })
    }

    #[instrument(level = "trace", skip(self))]
    fn remove(&self, container: &str) -> Result<()> {
        let path = self.file_path(container);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Remove { path, source: err }),
        }
    }

    fn list(&self) -> Result<Vec<(String, StoredConfig)>> {
        let entries = fs::read_dir(&self.dir).map_err(|err| StoreError::List {
            path: self.dir.clone(),
            source: err,
        })?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|err| StoreError::List {
                    path: self.dir.clone(),
                    source: err,
                })?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }

            // one unreadable record must not hide the others
            match Self::read_record(&path) {
                Ok(record) => records.push((record.name, record.config)),
                Err(err) => tracing::warn!(?path, %err, "skipping container config"),
            }
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::*;
    use crate::config::DeclaredConfig;
    use crate::rule::parse_rules;
    use crate::snapshot::EffectiveSnapshot;
    use crate::test_utils::StaticRegistry;

    #[test]
    fn test_save_and_load() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = FileStore::new(tmp.path().join("containers"))?;
        let registry = StaticRegistry::with_ram();
        let config = StoredConfig {
            config: DeclaredConfig::default()
                .with_rules(parse_rules("/dev/ram0 rw; /dev/null -", &registry)?)
                .with_controller(false),
            baseline: Some(EffectiveSnapshot::builtin()),
        };

        store.save("a/b", &config)?;

        assert_eq!(store.load("a/b")?, Some(config));
        assert!(store.dir().join("a%b.json").exists());
        assert!(!store.dir().join("a%b.tmp").exists());
        assert_eq!(store.load("a")?, None);
        Ok(())
    }

    #[test]
    fn test_save_overwrites() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = FileStore::new(tmp.path())?;
        store.save("a", &DeclaredConfig::default().with_rules(vec![]).into())?;
        store.save("a", &DeclaredConfig::default().into())?;

        assert_eq!(store.load("a")?, Some(StoredConfig::from(DeclaredConfig::default())));
        Ok(())
    }

    #[test]
    fn test_list_and_remove() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = FileStore::new(tmp.path())?;
        store.save("a", &DeclaredConfig::default().into())?;
        store.save("a/b", &DeclaredConfig::default().with_rules(vec![]).into())?;
        fs::write(tmp.path().join("broken.json"), "{")?;
        fs::write(tmp.path().join("notes.txt"), "ignored")?;

        let mut names: Vec<String> = store.list()?.into_iter().map(|(name, _)| name).collect();
        names.sort();
        assert_eq!(names, vec!["a", "a/b"]);

        store.remove("a/b")?;
        store.remove("a/b")?;
        assert_eq!(store.list()?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_load_corrupted() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let store = FileStore::new(tmp.path())?;
        fs::write(tmp.path().join("a.json"), "not json")?;

        assert!(matches!(store.load("a"), Err(StoreError::Parse { .. })));
        Ok(())
    }
}
