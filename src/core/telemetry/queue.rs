// src/core/telemetry/queue.rs

//! Bounded on-disk event queue: one JSON event per line.
//!
//! Every mutation happens under an exclusive lock on a sibling lock file and
//! rewrites the queue with write-replace. When the queue grows past its byte
//! budget the oldest events are dropped.

use super::event::TelemetryEvent;
use crate::core::paths;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Telemetry queue I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to encode telemetry event: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct EventQueue {
    file: PathBuf,
    lock_file: PathBuf,
    max_bytes: u64,
}

impl EventQueue {
    pub fn new(dir: &Path, max_bytes: u64) -> Self {
        Self {
            file: super::queue_file(dir),
            lock_file: dir.join("queue.lock"),
            max_bytes,
        }
    }

    fn locked<T>(&self, f: impl FnOnce() -> Result<T, QueueError>) -> Result<T, QueueError> {
        if let Some(parent) = self.lock_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_file)?;
        FileExt::lock_exclusive(&lock)?;
        let _release = scopeguard::guard(lock, |lock| {
            let _ = FileExt::unlock(&lock);
        });
        f()
    }

    fn read_lines(&self) -> Result<Vec<String>, QueueError> {
        match fs::read_to_string(&self.file) {
            Ok(raw) => Ok(raw
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(String::from)
                .collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Drops the oldest lines until the queue fits its budget. The newest
    /// line is always kept.
    fn write_bounded(&self, mut lines: Vec<String>) -> Result<usize, QueueError> {
        let mut total: u64 = lines.iter().map(|l| l.len() as u64 + 1).sum();
        let mut dropped = 0;
        while total > self.max_bytes && lines.len() > 1 {
            let oldest = lines.remove(0);
            total -= oldest.len() as u64 + 1;
            dropped += 1;
        }
        if dropped > 0 {
            log::debug!("Telemetry queue full: dropped {dropped} oldest event(s)");
        }
        let mut content = lines.join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        paths::write_atomic(&self.file, content.as_bytes())?;
        Ok(dropped)
    }

    /// Returns how many old events had to be dropped to make room.
    pub fn append(&self, event: &TelemetryEvent) -> Result<usize, QueueError> {
        let line = serde_json::to_string(event)?;
        self.locked(|| {
            let mut lines = self.read_lines()?;
            lines.push(line);
            self.write_bounded(lines)
        })
    }

    /// Removes and returns up to `max` of the oldest events. Lines that no
    /// longer parse are discarded.
    pub fn take_batch(&self, max: usize) -> Result<Vec<TelemetryEvent>, QueueError> {
        self.locked(|| {
            let mut lines = self.read_lines()?;
            if lines.is_empty() {
                return Ok(Vec::new());
            }
            let rest = lines.split_off(max.min(lines.len()));
            self.write_bounded(rest)?;
            Ok(lines
                .iter()
                .filter_map(|line| match serde_json::from_str(line) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        log::warn!("Discarding malformed telemetry line: {e}");
                        None
                    }
                })
                .collect())
        })
    }

    /// Puts a batch that could not be delivered back at the front.
    pub fn requeue_front(&self, events: &[TelemetryEvent]) -> Result<(), QueueError> {
        let mut lines = events
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;
        self.locked(|| {
            lines.extend(self.read_lines()?);
            self.write_bounded(lines).map(|_| ())
        })
    }

    pub fn len(&self) -> Result<usize, QueueError> {
        self.locked(|| Ok(self.read_lines()?.len()))
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    pub fn clear(&self) -> Result<(), QueueError> {
        self.locked(|| self.write_bounded(Vec::new()).map(|_| ()))
    }
}
