//! # Config Loader
//!
//! Loads the user configuration (`config.toml`). A missing file is not an
//! error: every section has defaults.

use crate::models::UserConfig;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse configuration file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

pub fn load(path: &Path) -> Result<UserConfig, ConfigError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            log::debug!("No configuration at '{}', using defaults", path.display());
            return Ok(UserConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };

    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Renders the effective configuration, defaults included.
pub fn render(config: &UserConfig) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();

        let config = load(&dir.path().join("config.toml")).unwrap();

        assert_eq!(config, UserConfig::default());
    }

    #[test]
    fn test_parse_error_names_the_file() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[terminal\npty = ").unwrap();

        // --- Execute ---
        let err = load(&path).unwrap_err();

        // --- Assert ---
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_render_round_trips_through_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = UserConfig::default();
        config.terminal.verbosity = 2;

        fs::write(&path, render(&config).unwrap()).unwrap();

        assert_eq!(load(&path).unwrap(), config);
    }
}
