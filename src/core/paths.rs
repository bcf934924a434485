// src/core/paths.rs

use crate::constants::CONFIG_FILENAME;
use crate::models::StorageConfig;
use lazy_static::lazy_static;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;
use thiserror::Error;

lazy_static! {
    static ref DEVX_CONFIG_DIR: Mutex<Option<PathBuf>> = Mutex::new(None);
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find the system {0} directory.")]
    SystemDirNotFound(&'static str),
    #[error("Could not create directory at '{path}': {source}")]
    DirCreation {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to expand path '{template}': {message}")]
    Expansion { template: String, message: String },
}

/// Returns `~/.config/devx` (platform equivalent), creating it on first use.
///
/// Memoized: only the first call touches the filesystem.
pub fn config_dir() -> Result<PathBuf, PathError> {
    let mut cached = DEVX_CONFIG_DIR
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(path) = &*cached {
        return Ok(path.clone());
    }

    let path = dirs::config_dir()
        .ok_or(PathError::SystemDirNotFound("config"))?
        .join("devx");
    ensure_dir(&path)?;
    *cached = Some(path.clone());
    Ok(path)
}

/// The default location of `config.toml`.
pub fn default_config_file() -> Result<PathBuf, PathError> {
    config_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Expands `~` and environment variables in a user-supplied path.
pub fn expand_path(template: &str) -> Result<PathBuf, PathError> {
    shellexpand::full(template)
        .map(|expanded| PathBuf::from(expanded.into_owned()))
        .map_err(|e| PathError::Expansion {
            template: template.to_string(),
            message: e.to_string(),
        })
}

pub fn ensure_dir(path: &Path) -> Result<(), PathError> {
    fs::create_dir_all(path).map_err(|source| PathError::DirCreation {
        path: path.display().to_string(),
        source,
    })
}

/// Replaces `path` with `bytes` so readers see either the old or the new
/// content, never a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Resolved storage roots for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub config: PathBuf,
    pub data: PathBuf,
    pub cache: PathBuf,
}

impl StoragePaths {
    /// Resolves storage roots from configuration, falling back to the
    /// platform data and cache directories.
    pub fn resolve(config_dir: PathBuf, storage: &StorageConfig) -> Result<Self, PathError> {
        let data = match &storage.data {
            Some(template) => expand_path(template)?,
            None => dirs::data_dir()
                .ok_or(PathError::SystemDirNotFound("data"))?
                .join("devx"),
        };
        let cache = match &storage.cache {
            Some(template) => expand_path(template)?,
            None => dirs::cache_dir()
                .ok_or(PathError::SystemDirNotFound("cache"))?
                .join("devx"),
        };
        Ok(Self {
            config: config_dir,
            data,
            cache,
        })
    }

    /// All roots under one directory. Used by tests and throwaway sessions.
    pub fn under(root: &Path) -> Self {
        Self {
            config: root.join("config"),
            data: root.join("data"),
            cache: root.join("cache"),
        }
    }

    /// One JSON record per environment: `data/envs/<type>/<instance>.json`.
    pub fn env_record(&self, env_type: &str, instance: &str) -> PathBuf {
        self.data
            .join("envs")
            .join(env_type)
            .join(format!("{instance}.json"))
    }

    pub fn env_records_dir(&self) -> PathBuf {
        self.data.join("envs")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.data.join("locks")
    }

    /// Host-side cache shared by one environment instance.
    pub fn env_cache_dir(&self, env_type: &str, instance: &str) -> PathBuf {
        self.cache.join("envs").join(env_type).join(instance)
    }

    /// Working copies created by local-checkout environments.
    pub fn checkouts_dir(&self) -> PathBuf {
        self.data.join("checkouts")
    }

    pub fn feature_stamps_dir(&self) -> PathBuf {
        self.data.join("features")
    }

    pub fn telemetry_dir(&self) -> PathBuf {
        self.cache.join("telemetry")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_atomic_replaces_content() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("record.json");

        // --- Execute ---
        write_atomic(&target, b"first").unwrap();
        write_atomic(&target, b"second").unwrap();

        // --- Assert ---
        assert_eq!(fs::read_to_string(&target).unwrap(), "second");
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_storage_layout() {
        let paths = StoragePaths::under(Path::new("/tmp/devx-root"));

        assert_eq!(
            paths.env_record("linux-container", "default"),
            PathBuf::from("/tmp/devx-root/data/envs/linux-container/default.json")
        );
        assert_eq!(
            paths.env_cache_dir("remote", "box"),
            PathBuf::from("/tmp/devx-root/cache/envs/remote/box")
        );
        assert_eq!(paths.telemetry_dir(), PathBuf::from("/tmp/devx-root/cache/telemetry"));
    }

    #[test]
    fn test_resolve_expands_configured_storage() {
        let storage = StorageConfig {
            data: Some("/srv/devx/data".to_string()),
            cache: Some("/srv/devx/cache".to_string()),
        };

        let paths = StoragePaths::resolve(PathBuf::from("/etc/devx"), &storage).unwrap();

        assert_eq!(paths.data, PathBuf::from("/srv/devx/data"));
        assert_eq!(paths.cache, PathBuf::from("/srv/devx/cache"));
    }
}
