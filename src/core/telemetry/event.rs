// src/core/telemetry/event.rs

use crate::constants::{EXIT_CANCELLED, EXIT_USAGE, SESSION_ID_ENV};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    UsageError,
    Cancelled,
    Failure,
}

impl Outcome {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => Self::Success,
            EXIT_USAGE => Self::UsageError,
            EXIT_CANCELLED => Self::Cancelled,
            _ => Self::Failure,
        }
    }
}

/// One finished command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub id: Uuid,
    pub session: String,
    pub command: Vec<String>,
    pub outcome: Outcome,
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Milliseconds since the Unix epoch.
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    pub version: String,
    pub os: String,
}

impl TelemetryEvent {
    pub fn new(
        session: impl Into<String>,
        command: Vec<String>,
        exit_code: i32,
        started: SystemTime,
        duration: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session: session.into(),
            command,
            outcome: Outcome::from_exit_code(exit_code),
            exit_code,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            started_at: started
                .duration_since(UNIX_EPOCH)
                .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
                .unwrap_or_default(),
            environment: None,
            attributes: BTreeMap::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            os: env::consts::OS.to_string(),
        }
    }

    #[must_use]
    pub fn with_environment(mut self, environment: Option<String>) -> Self {
        self.environment = environment;
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// The session id inherited from a parent devx process, or a fresh one.
pub fn session_id() -> String {
    env::var(SESSION_ID_ENV)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_follows_exit_code() {
        assert_eq!(Outcome::from_exit_code(0), Outcome::Success);
        assert_eq!(Outcome::from_exit_code(2), Outcome::UsageError);
        assert_eq!(Outcome::from_exit_code(130), Outcome::Cancelled);
        assert_eq!(Outcome::from_exit_code(3), Outcome::Failure);
    }

    #[test]
    fn test_event_json_shape() {
        let event = TelemetryEvent::new(
            "session-1",
            vec!["env".into(), "start".into()],
            0,
            UNIX_EPOCH + Duration::from_secs(10),
            Duration::from_millis(1500),
        )
        .with_environment(Some("linux-container/default".into()))
        .with_attribute("source", "builtin");

        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["outcome"], "success");
        assert_eq!(json["duration_ms"], 1500);
        assert_eq!(json["started_at"], 10_000);
        assert_eq!(json["attributes"]["source"], "builtin");
    }
}
