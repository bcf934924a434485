// src/core/telemetry/transport.rs

//! Where the daemon sends event batches.

use super::event::TelemetryEvent;
use crate::constants::EXIT_USAGE;
use crate::core::paths;
use crate::core::retry::Retryable;
use crate::system::executor::{CaptureOptions, ExecutionError, ExecutionRequest, ProcessRunner};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Collector is unavailable: {0}")]
    Unavailable(String),
    #[error("Collector rejected the batch: {0}")]
    Rejected(String),
    #[error("{0}")]
    Execution(#[from] ExecutionError),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("Failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Io(e) => e.is_retryable(),
            Self::Execution(ExecutionError::Io { .. } | ExecutionError::SpawnFailed { .. }) => true,
            _ => false,
        }
    }
}

pub trait Transport {
    fn submit(&self, batch: &[TelemetryEvent]) -> Result<(), TransportError>;
}

/// Writes each batch as a JSON file for an external shipper to pick up.
#[derive(Debug, Clone)]
pub struct OutboxTransport {
    dir: PathBuf,
}

impl OutboxTransport {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }
}

impl Transport for OutboxTransport {
    fn submit(&self, batch: &[TelemetryEvent]) -> Result<(), TransportError> {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let target = self
            .dir
            .join(format!("batch-{stamp}-{}.json", uuid::Uuid::new_v4().simple()));
        paths::write_atomic(&target, &serde_json::to_vec(batch)?)?;
        log::info!("Wrote {} event(s) to '{}'", batch.len(), target.display());
        Ok(())
    }
}

/// Runs a collector command with the path of a JSON batch file appended.
///
/// Exit code 0 is success, the usage-error code is a permanent rejection and
/// anything else is treated as a transient outage.
#[derive(Debug)]
pub struct CommandTransport<'a> {
    argv: Vec<String>,
    runner: &'a ProcessRunner,
    scratch_dir: PathBuf,
}

impl<'a> CommandTransport<'a> {
    pub fn new(argv: Vec<String>, runner: &'a ProcessRunner, scratch_dir: PathBuf) -> Self {
        Self {
            argv,
            runner,
            scratch_dir,
        }
    }
}

impl Transport for CommandTransport<'_> {
    fn submit(&self, batch: &[TelemetryEvent]) -> Result<(), TransportError> {
        std::fs::create_dir_all(&self.scratch_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix("batch-")
            .suffix(".json")
            .tempfile_in(&self.scratch_dir)?;
        file.write_all(&serde_json::to_vec(batch)?)?;
        file.flush()?;

        let request = ExecutionRequest::new(self.argv.iter().cloned())
            .arg(file.path().to_string_lossy());
        let result = self.runner.capture(
            &request,
            CaptureOptions {
                cross_streams: true,
                ..CaptureOptions::default()
            },
        )?;
        match result.exit_code {
            0 => {
                log::info!("Collector accepted {} event(s)", batch.len());
                Ok(())
            }
            EXIT_USAGE => Err(TransportError::Rejected(result.stdout.trim().to_string())),
            code => Err(TransportError::Unavailable(format!(
                "exit code {code}: {}",
                result.stdout.trim()
            ))),
        }
    }
}
