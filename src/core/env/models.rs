// src/core/env/models.rs

use clap::ValueEnum;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

lazy_static! {
    static ref INSTANCE_RE: Regex = Regex::new(r"^[a-z0-9][a-z0-9_.-]{0,62}$")
        .unwrap_or_else(|_| unreachable!("static instance pattern is valid"));
}

/// The closed set of environment backends.
#[derive(Serialize, Deserialize, ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum EnvironmentType {
    LinuxContainer,
    LocalCheckout,
    Remote,
}

impl EnvironmentType {
    pub const ALL: [Self; 3] = [Self::LinuxContainer, Self::LocalCheckout, Self::Remote];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinuxContainer => "linux-container",
            Self::LocalCheckout => "local-checkout",
            Self::Remote => "remote",
        }
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnvironmentType {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == raw)
            .ok_or_else(|| format!("unknown environment type '{raw}'"))
    }
}

/// Lifecycle state. Exactly one per environment identifier.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentState {
    #[default]
    Absent,
    Provisioning,
    Running,
    Stopped,
    Removing,
    Faulted,
}

impl EnvironmentState {
    /// A state left behind by an interrupted operation.
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Provisioning | Self::Removing)
    }
}

impl fmt::Display for EnvironmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Absent => "absent",
            Self::Provisioning => "provisioning",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Removing => "removing",
            Self::Faulted => "faulted",
        };
        f.write_str(label)
    }
}

/// `(type, instance)`; names one environment on this host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvironmentId {
    pub env_type: EnvironmentType,
    pub instance: String,
}

impl EnvironmentId {
    /// Fails when `instance` cannot be used in file and container names.
    pub fn new(env_type: EnvironmentType, instance: impl Into<String>) -> Result<Self, String> {
        let instance = instance.into();
        if !INSTANCE_RE.is_match(&instance) {
            return Err(instance);
        }
        Ok(Self { env_type, instance })
    }

    /// Key used for lock files and resource names.
    pub fn key(&self) -> String {
        format!("{}-{}", self.env_type, self.instance)
    }
}

impl fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.env_type, self.instance)
    }
}

/// Persisted record of one environment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EnvironmentDescriptor {
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,
    pub instance: String,
    pub state: EnvironmentState,
    /// Backend-specific settings, merged from configuration and flags at creation.
    #[serde(default)]
    pub config: serde_json::Value,
    /// Minimum tool version the environment was created for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_version: Option<String>,
    /// Seconds since the Unix epoch.
    pub updated_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl EnvironmentDescriptor {
    pub fn new(id: &EnvironmentId, config: serde_json::Value) -> Self {
        Self {
            env_type: id.env_type,
            instance: id.instance.clone(),
            state: EnvironmentState::Absent,
            config,
            required_version: None,
            updated_at: now_secs(),
            last_error: None,
        }
    }

    pub fn id(&self) -> EnvironmentId {
        EnvironmentId {
            env_type: self.env_type,
            instance: self.instance.clone(),
        }
    }

    pub fn transition(&mut self, state: EnvironmentState) {
        log::debug!(
            "{}/{}: {} -> {}",
            self.env_type,
            self.instance,
            self.state,
            state
        );
        self.state = state;
        self.updated_at = now_secs();
        if state != EnvironmentState::Faulted {
            self.last_error = None;
        }
    }

    pub fn fault(&mut self, reason: impl Into<String>) {
        self.transition(EnvironmentState::Faulted);
        self.last_error = Some(reason.into());
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_names_round_trip() {
        for env_type in EnvironmentType::ALL {
            assert_eq!(env_type.as_str().parse::<EnvironmentType>().unwrap(), env_type);
        }
        assert!("vm".parse::<EnvironmentType>().is_err());
    }

    #[test]
    fn test_instance_names_are_validated() {
        assert!(EnvironmentId::new(EnvironmentType::Remote, "build-01").is_ok());
        assert!(EnvironmentId::new(EnvironmentType::Remote, "../etc").is_err());
        assert!(EnvironmentId::new(EnvironmentType::Remote, "Upper").is_err());
        assert!(EnvironmentId::new(EnvironmentType::Remote, "").is_err());
    }

    #[test]
    fn test_descriptor_serializes_with_type_key() {
        let id = EnvironmentId::new(EnvironmentType::LinuxContainer, "default").unwrap();
        let mut descriptor = EnvironmentDescriptor::new(&id, serde_json::json!({"image": "ubuntu"}));
        descriptor.fault("pull failed");

        let json = serde_json::to_value(&descriptor).unwrap();

        assert_eq!(json["type"], "linux-container");
        assert_eq!(json["state"], "faulted");
        assert_eq!(json["last_error"], "pull failed");
    }
}
