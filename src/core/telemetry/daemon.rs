// src/core/telemetry/daemon.rs

//! The background process that drains the telemetry queue.
//!
//! Liveness is the `daemon.lock` file: the daemon holds an exclusive lock on
//! it for its whole lifetime, so a failed non-blocking lock attempt means a
//! daemon is alive. The PID file is informational.

use super::queue::EventQueue;
use super::transport::Transport;
use super::{TelemetryError, daemon_lock_file, daemon_pid_file};
use crate::CancellationToken;
use crate::core::paths::write_atomic;
use crate::core::retry::{RetryError, RetryPolicy, StopCondition};
use crate::models::TelemetryConfig;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    pub batch_size: usize,
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    /// Raised by SIGINT/SIGTERM; checked between batches and idle polls.
    pub stop: Option<CancellationToken>,
}

impl DaemonSettings {
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            poll_interval: Duration::from_millis(500),
            retry: RetryPolicy::with_stop(StopCondition::MaxAttempts(config.max_attempts))
                .base_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(30))
                .jitter(0.2),
            stop: None,
        }
    }

    #[must_use]
    pub fn stop_on(mut self, token: CancellationToken) -> Self {
        self.stop = Some(token);
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|t| t.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DaemonStats {
    pub batches_sent: usize,
    pub events_sent: usize,
    /// Events dropped because the collector rejected them.
    pub events_rejected: usize,
    /// Events put back in the queue when delivery was given up.
    pub events_requeued: usize,
}

fn open_lock(dir: &Path) -> Result<File, TelemetryError> {
    let path = daemon_lock_file(dir);
    fs::create_dir_all(dir).map_err(|source| TelemetryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .map_err(|source| TelemetryError::Io { path, source })
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Whether a daemon currently holds the lock in `dir`.
pub fn is_running(dir: &Path) -> bool {
    let Ok(file) = OpenOptions::new().read(true).write(true).open(daemon_lock_file(dir)) else {
        return false;
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {
            let _ = FileExt::unlock(&file);
            false
        }
        Err(e) => is_contended(&e),
    }
}

/// The PID recorded by the running daemon, if any.
pub fn recorded_pid(dir: &Path) -> Option<u32> {
    fs::read_to_string(daemon_pid_file(dir))
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
}

/// Drains `queue` until it stays empty for the idle timeout or delivery is
/// given up. Fails with [`TelemetryError::AlreadyRunning`] when another
/// daemon owns `dir`.
pub fn run(
    dir: &Path,
    queue: &EventQueue,
    transport: &dyn Transport,
    settings: &DaemonSettings,
) -> Result<DaemonStats, TelemetryError> {
    let lock = open_lock(dir)?;
    match FileExt::try_lock_exclusive(&lock) {
        Ok(()) => {}
        Err(e) if is_contended(&e) => return Err(TelemetryError::AlreadyRunning),
        Err(source) => {
            return Err(TelemetryError::Io {
                path: daemon_lock_file(dir),
                source,
            });
        }
    }
    let pid_file = daemon_pid_file(dir);
    let _guard = scopeguard::guard(lock, |lock| {
        let _ = fs::remove_file(&pid_file);
        let _ = FileExt::unlock(&lock);
    });
    if let Err(e) = write_atomic(&daemon_pid_file(dir), std::process::id().to_string().as_bytes()) {
        log::warn!("Could not write the daemon PID file: {e}");
    }
    log::info!("Telemetry daemon started (pid {})", std::process::id());

    let mut stats = DaemonStats::default();
    let mut idle_since = Instant::now();
    loop {
        if settings.stop_requested() {
            log::info!("Stop requested, leaving the rest of the queue for the next daemon");
            break;
        }
        let batch = queue.take_batch(settings.batch_size)?;
        if batch.is_empty() {
            if idle_since.elapsed() >= settings.idle_timeout {
                break;
            }
            thread::sleep(settings.poll_interval);
            continue;
        }

        match settings.retry.run(|_| transport.submit(&batch)) {
            Ok(()) => {
                stats.batches_sent += 1;
                stats.events_sent += batch.len();
            }
            Err(RetryError::Permanent(e)) => {
                log::error!("Dropping {} event(s): {e}", batch.len());
                stats.events_rejected += batch.len();
            }
            Err(e @ RetryError::Exhausted { .. }) => {
                log::error!("Submission failed, keeping {} event(s) queued: {e}", batch.len());
                queue.requeue_front(&batch)?;
                stats.events_requeued += batch.len();
                break;
            }
        }
        idle_since = Instant::now();
    }

    log::info!(
        "Telemetry daemon exiting: {} event(s) sent in {} batch(es)",
        stats.events_sent,
        stats.batches_sent
    );
    Ok(stats)
}
