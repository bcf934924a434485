// src/models.rs

//! User configuration, as read from `config.toml`.
//!
//! Every section is optional; a missing file yields [`UserConfig::default`].

use crate::core::env::models::EnvironmentType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UserConfig {
    pub terminal: TerminalConfig,
    pub storage: StorageConfig,
    pub telemetry: TelemetryConfig,
    pub env: EnvDefaults,
    /// Per environment type defaults, merged under each new descriptor's payload.
    pub envs: BTreeMap<String, toml::Table>,
    /// Named dependency groups that commands may declare.
    pub features: BTreeMap<String, FeatureConfig>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TerminalConfig {
    /// Baseline verbosity, adjusted by `-v`/`-q`.
    pub verbosity: i8,
    /// Allow pseudo-terminal allocation for streamed output.
    pub pty: bool,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            pty: true,
        }
    }
}

/// Storage locations. Values go through `~`/`$VAR` expansion.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub data: Option<String>,
    pub cache: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Upper bound for the on-disk event queue.
    pub queue_max_bytes: u64,
    pub batch_size: usize,
    /// The daemon exits after this many idle seconds.
    pub idle_timeout_secs: u64,
    pub max_attempts: u32,
    /// Collector command; receives the path of a JSON batch file as its last argument.
    pub collector: Option<Vec<String>>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            queue_max_bytes: 1024 * 1024,
            batch_size: 50,
            idle_timeout_secs: 30,
            max_attempts: 5,
            collector: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct EnvDefaults {
    pub default_type: EnvironmentType,
    pub default_instance: String,
    /// Editor command used by `env code`.
    pub editor: String,
}

impl Default for EnvDefaults {
    fn default() -> Self {
        Self {
            default_type: EnvironmentType::LinuxContainer,
            default_instance: "default".to_string(),
            editor: "code".to_string(),
        }
    }
}

/// A named dependency group.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FeatureConfig {
    pub description: Option<String>,
    /// Executables that must be on `PATH` for the group to count as installed.
    pub requires: Vec<String>,
    /// Command that installs the group.
    pub install: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_yields_defaults() {
        let config: UserConfig = toml::from_str("").unwrap();
        assert_eq!(config, UserConfig::default());
        assert!(config.terminal.pty);
    }

    #[test]
    fn test_full_document_parses() {
        // --- Setup ---
        let raw = r#"
            [terminal]
            verbosity = 1
            pty = false

            [storage]
            data = "~/devx-data"

            [telemetry]
            batch_size = 10
            collector = ["curl", "-d"]

            [env]
            default_type = "remote"

            [envs.linux-container]
            image = "ghcr.io/acme/dev:latest"

            [features.http]
            requires = ["curl"]
            install = ["brew", "install", "curl"]
        "#;

        // --- Execute ---
        let config: UserConfig = toml::from_str(raw).unwrap();

        // --- Assert ---
        assert_eq!(config.terminal.verbosity, 1);
        assert!(!config.terminal.pty);
        assert_eq!(config.storage.data.as_deref(), Some("~/devx-data"));
        assert_eq!(config.telemetry.batch_size, 10);
        assert_eq!(config.env.default_type, EnvironmentType::Remote);
        assert!(config.envs.contains_key("linux-container"));
        assert_eq!(config.features["http"].requires, vec!["curl".to_string()]);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result: Result<UserConfig, _> = toml::from_str("[terminal]\ncolour = true\n");
        assert!(result.is_err());
    }
}
