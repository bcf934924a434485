// src/core/env/backends/mod.rs

//! Environment backends.
//!
//! Each backend drives external tools through the [`ProcessRunner`] only;
//! the lifecycle manager owns state, locking and version gating.

pub mod container;
pub mod local;
pub mod remote;

use super::models::{EnvironmentId, EnvironmentState, EnvironmentType};
use crate::core::paths::StoragePaths;
use crate::core::retry::Retryable;
use crate::system::executor::{ExecutionError, ProcessRunner};
use serde::de::DeserializeOwned;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("{0}")]
    Execution(#[from] ExecutionError),
    #[error("Invalid {env_type} configuration: {reason}")]
    InvalidConfig {
        env_type: EnvironmentType,
        reason: String,
    },
    #[error("Environment did not become ready: {0}")]
    NotReady(String),
    #[error("Unexpected output from '{command}': {reason}")]
    UnexpectedOutput { command: String, reason: String },
    #[error("{0}")]
    Io(#[from] io::Error),
}

impl Retryable for BackendError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::NotReady(_) => true,
            Self::Io(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Everything a backend needs for one operation.
#[derive(Debug, Clone)]
pub struct BackendContext<'a> {
    pub runner: &'a ProcessRunner,
    pub paths: &'a StoragePaths,
    pub id: EnvironmentId,
    /// The descriptor's backend-specific payload.
    pub config: serde_json::Value,
    pub verbose: bool,
    /// Editor command used by `code`.
    pub editor: String,
    /// Where SSH host entries are written; `None` skips them.
    pub ssh_dir: Option<PathBuf>,
}

impl BackendContext<'_> {
    /// Deserializes the payload into the backend's own config type.
    pub fn typed_config<T: DeserializeOwned>(&self) -> Result<T, BackendError> {
        let payload = if self.config.is_null() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            self.config.clone()
        };
        serde_json::from_value(payload).map_err(|e| BackendError::InvalidConfig {
            env_type: self.id.env_type,
            reason: e.to_string(),
        })
    }

    /// Host-side cache directory of this instance.
    pub fn cache_dir(&self) -> PathBuf {
        self.paths
            .env_cache_dir(self.id.env_type.as_str(), &self.id.instance)
    }
}

/// Capabilities every environment type provides.
pub trait EnvBackend {
    fn start(&self) -> Result<(), BackendError>;
    fn stop(&self) -> Result<(), BackendError>;
    fn remove(&self) -> Result<(), BackendError>;

    /// The state observed on the live system, or `None` when the backend
    /// cannot tell and the persisted record should be trusted.
    fn status(&self) -> Result<Option<EnvironmentState>, BackendError>;

    /// Interactive shell; returns its exit code.
    fn shell(&self) -> Result<i32, BackendError>;
    fn code(&self) -> Result<i32, BackendError>;
    fn run_command(&self, command: &[String]) -> Result<i32, BackendError>;

    /// Host directory holding this environment's cache, if it has one.
    fn host_cache_dir(&self) -> Option<PathBuf> {
        None
    }

    /// Bytes used by the environment's cache.
    fn cache_size(&self) -> Result<u64, BackendError> {
        Ok(self.host_cache_dir().map_or(0, |dir| dir_size(&dir)))
    }

    fn cache_clean(&self) -> Result<(), BackendError> {
        match self.host_cache_dir() {
            Some(dir) => Ok(remove_dir_via_trash(&dir)?),
            None => Ok(()),
        }
    }
}

/// Chooses the backend implementation for an environment type.
pub trait BackendFactory {
    fn create<'a>(&self, ctx: BackendContext<'a>) -> Result<Box<dyn EnvBackend + 'a>, BackendError>;
}

/// The closed set of backends shipped with devx.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinBackends;

impl BackendFactory for BuiltinBackends {
    fn create<'a>(&self, ctx: BackendContext<'a>) -> Result<Box<dyn EnvBackend + 'a>, BackendError> {
        Ok(match ctx.id.env_type {
            EnvironmentType::LinuxContainer => Box::new(container::LinuxContainer::new(ctx)?),
            EnvironmentType::LocalCheckout => Box::new(local::LocalCheckout::new(ctx)?),
            EnvironmentType::Remote => Box::new(remote::RemoteHost::new(ctx)?),
        })
    }
}

/// Total size of regular files below `dir`. Missing directories are empty.
pub fn dir_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

/// Renames `dir` out of the way first, so a half-finished delete never
/// leaves a partially cleaned cache in place.
pub fn remove_dir_via_trash(dir: &Path) -> io::Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let trash = dir.with_file_name(format!(".{name}.trash-{}", uuid::Uuid::new_v4().simple()));
    fs::rename(dir, &trash)?;
    log::debug!("Removing '{}'", trash.display());
    fs::remove_dir_all(&trash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_helpers() {
        // --- Setup ---
        let root = tempfile::tempdir().unwrap();
        let cache = root.path().join("cache");
        fs::create_dir_all(cache.join("nested")).unwrap();
        fs::write(cache.join("a.bin"), vec![0u8; 100]).unwrap();
        fs::write(cache.join("nested").join("b.bin"), vec![0u8; 23]).unwrap();

        // --- Execute & Assert ---
        assert_eq!(dir_size(&cache), 123);
        remove_dir_via_trash(&cache).unwrap();
        assert!(!cache.exists());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
        assert_eq!(dir_size(&cache), 0);
        remove_dir_via_trash(&cache).unwrap();
    }

    #[test]
    fn test_typed_config_treats_null_as_empty() {
        #[derive(serde::Deserialize, Debug, Default)]
        #[serde(default)]
        struct Sample {
            image: String,
        }
        let root = tempfile::tempdir().unwrap();
        let paths = StoragePaths::under(root.path());
        let runner = ProcessRunner::non_interactive();
        let ctx = BackendContext {
            runner: &runner,
            paths: &paths,
            id: EnvironmentId::new(EnvironmentType::Remote, "x").unwrap(),
            config: serde_json::Value::Null,
            verbose: false,
            editor: "code".into(),
            ssh_dir: None,
        };

        let sample: Sample = ctx.typed_config().unwrap();

        assert_eq!(sample.image, "");
    }
}
