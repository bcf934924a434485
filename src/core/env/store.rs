// src/core/env/store.rs

//! One JSON record per environment under `data/envs/<type>/<instance>.json`.

use super::models::{EnvironmentDescriptor, EnvironmentId, EnvironmentType};
use crate::core::paths::{self, StoragePaths};
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to access environment record '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Environment record '{path}' is corrupt: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct DescriptorStore {
    paths: StoragePaths,
}

impl DescriptorStore {
    pub fn new(paths: StoragePaths) -> Self {
        Self { paths }
    }

    fn record_path(&self, id: &EnvironmentId) -> PathBuf {
        self.paths.env_record(id.env_type.as_str(), &id.instance)
    }

    pub fn load(&self, id: &EnvironmentId) -> Result<Option<EnvironmentDescriptor>, StoreError> {
        let path = self.record_path(id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Corrupt {
                path: path.display().to_string(),
                source,
            })
    }

    /// Write-replace, so readers never see a partial record.
    pub fn save(&self, descriptor: &EnvironmentDescriptor) -> Result<(), StoreError> {
        let path = self.record_path(&descriptor.id());
        let json = serde_json::to_vec_pretty(descriptor).map_err(|source| StoreError::Corrupt {
            path: path.display().to_string(),
            source,
        })?;
        paths::write_atomic(&path, &json).map_err(|source| StoreError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn delete(&self, id: &EnvironmentId) -> Result<(), StoreError> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    /// Every readable record, optionally restricted to one type. Corrupt
    /// records are skipped with a warning.
    pub fn list(&self, only: Option<EnvironmentType>) -> Vec<EnvironmentDescriptor> {
        let root = self.paths.env_records_dir();
        let mut found: Vec<EnvironmentDescriptor> = WalkDir::new(&root)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file() && e.path().extension().is_some_and(|x| x == "json"))
            .filter_map(|entry| {
                let raw = fs::read_to_string(entry.path()).ok()?;
                match serde_json::from_str::<EnvironmentDescriptor>(&raw) {
                    Ok(d) => Some(d),
                    Err(e) => {
                        log::warn!("Skipping corrupt record '{}': {e}", entry.path().display());
                        None
                    }
                }
            })
            .filter(|d| only.is_none_or(|t| d.env_type == t))
            .collect();
        found.sort_by(|a, b| a.id().cmp(&b.id()));
        found
    }
}
