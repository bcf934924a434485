//! # Telemetry
//!
//! Fire-and-forget usage events. The invoking command only appends to a
//! bounded on-disk queue; a detached daemon drains it in batches and submits
//! them through a [`transport::Transport`] with retries.
//!
//! Layout of the telemetry directory:
//!
//! - `queue.jsonl` / `queue.lock`: the event queue and its lock.
//! - `daemon.lock` / `daemon.pid`: held and written by the running daemon.
//! - `daemon.log`: the daemon's own log output.
//! - `outbox/`: batches written when no collector command is configured.

pub mod daemon;
pub mod emitter;
pub mod event;
pub mod queue;
pub mod transport;

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use emitter::{Consent, ConsentStore, Emitter};
pub use event::TelemetryEvent;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("The telemetry daemon is already running")]
    AlreadyRunning,
    #[error("{0}")]
    Queue(#[from] queue::QueueError),
    #[error("{0}")]
    Transport(#[from] transport::TransportError),
    #[error("Failed to start the telemetry daemon: {0}")]
    Spawn(#[from] crate::system::executor::ExecutionError),
    #[error("Telemetry I/O failed on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub fn queue_file(dir: &Path) -> PathBuf {
    dir.join("queue.jsonl")
}

pub fn daemon_lock_file(dir: &Path) -> PathBuf {
    dir.join("daemon.lock")
}

pub fn daemon_pid_file(dir: &Path) -> PathBuf {
    dir.join("daemon.pid")
}

pub fn daemon_log_file(dir: &Path) -> PathBuf {
    dir.join("daemon.log")
}

pub fn outbox_dir(dir: &Path) -> PathBuf {
    dir.join("outbox")
}
