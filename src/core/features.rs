// src/core/features.rs

//! Optional dependency groups ("features") that commands can declare.

use crate::core::paths;
use crate::models::FeatureConfig;
use crate::system::executor::{ExecutionRequest, ProcessRunner};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FeatureError {
    #[error("Unknown dependency group '{0}'.")]
    Unknown(String),
    #[error("Dependency group '{0}' has no install command configured.")]
    NoInstaller(String),
    #[error("Installing dependency group '{feature}' failed: {reason}")]
    InstallFailed { feature: String, reason: String },
    #[error("Dependency group '{0}' is still missing after installation.")]
    StillMissing(String),
    #[error("Failed to record installation of '{feature}': {source}")]
    Stamp {
        feature: String,
        #[source]
        source: io::Error,
    },
}

/// Checks and installs dependency groups.
pub trait DependencySync {
    fn is_satisfied(&self, feature: &str) -> Result<bool, FeatureError>;

    /// One installation pass over `features`.
    fn synchronize(&self, features: &[String]) -> Result<(), FeatureError>;
}

/// Dependency groups from `[features.*]` in the user configuration.
///
/// A group with `requires` is installed when every listed executable is on
/// `PATH`. A group without it is installed once a stamp matching its
/// current install command has been written.
#[derive(Debug)]
pub struct ConfiguredFeatures<'a> {
    features: &'a BTreeMap<String, FeatureConfig>,
    stamps_dir: PathBuf,
    runner: &'a ProcessRunner,
    verbose: bool,
}

impl<'a> ConfiguredFeatures<'a> {
    pub fn new(
        features: &'a BTreeMap<String, FeatureConfig>,
        stamps_dir: PathBuf,
        runner: &'a ProcessRunner,
        verbose: bool,
    ) -> Self {
        Self {
            features,
            stamps_dir,
            runner,
            verbose,
        }
    }

    fn lookup(&self, feature: &str) -> Result<&'a FeatureConfig, FeatureError> {
        self.features
            .get(feature)
            .ok_or_else(|| FeatureError::Unknown(feature.to_string()))
    }

    fn stamp_path(&self, feature: &str) -> PathBuf {
        self.stamps_dir.join(format!("{feature}.stamp"))
    }

    fn install_fingerprint(config: &FeatureConfig) -> String {
        let digest = blake3::hash(config.install.join("\u{1f}").as_bytes());
        hex::encode(digest.as_bytes().get(..16).unwrap_or_default())
    }
}

impl DependencySync for ConfiguredFeatures<'_> {
    /// A group missing from the configuration is simply not installed;
    /// [`Self::synchronize`] is where it fails as unknown.
    fn is_satisfied(&self, feature: &str) -> Result<bool, FeatureError> {
        let Some(config) = self.features.get(feature) else {
            return Ok(false);
        };
        if !config.requires.is_empty() {
            return Ok(config.requires.iter().all(|exe| which::which(exe).is_ok()));
        }
        let recorded = fs::read_to_string(self.stamp_path(feature)).unwrap_or_default();
        Ok(recorded.trim() == Self::install_fingerprint(config))
    }

    fn synchronize(&self, features: &[String]) -> Result<(), FeatureError> {
        for feature in features {
            let config = self.lookup(feature)?;
            if config.install.is_empty() {
                return Err(FeatureError::NoInstaller(feature.clone()));
            }

            log::info!("Installing dependency group '{feature}'");
            let request = ExecutionRequest::new(config.install.iter().cloned());
            self.runner
                .run_quietly(&request, self.verbose)
                .map_err(|e| FeatureError::InstallFailed {
                    feature: feature.clone(),
                    reason: e.to_string(),
                })?;

            if config.requires.is_empty() {
                paths::write_atomic(
                    &self.stamp_path(feature),
                    Self::install_fingerprint(config).as_bytes(),
                )
                .map_err(|source| FeatureError::Stamp {
                    feature: feature.clone(),
                    source,
                })?;
            } else if !self.is_satisfied(feature)? {
                return Err(FeatureError::StillMissing(feature.clone()));
            }
        }
        Ok(())
    }
}

/// Returns the declared groups that are not installed yet.
pub fn missing_features(
    sync: &dyn DependencySync,
    declared: &[String],
) -> Result<Vec<String>, FeatureError> {
    let mut missing = Vec::new();
    for feature in declared {
        if !sync.is_satisfied(feature)? {
            missing.push(feature.clone());
        }
    }
    Ok(missing)
}
