// src/core/env/lock.rs

//! Host-local advisory lock per environment, acquired without blocking.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Another process may unlink the file between our open and our lock; we
/// re-open a bounded number of times when that happens.
const MAX_IDENTITY_RETRIES: u32 = 5;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Environment '{0}' is busy: another operation holds its lock.")]
    Busy(String),
    #[error("Failed to lock '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Held lock. Dropping it removes the lock file and releases the lock.
#[derive(Debug)]
pub struct EnvLock {
    file: File,
    path: PathBuf,
}

impl EnvLock {
    /// Takes `<dir>/<key>.lock`, failing immediately with [`LockError::Busy`]
    /// on contention.
    pub fn try_acquire(dir: &Path, key: &str) -> Result<Self, LockError> {
        let path = dir.join(format!("{key}.lock"));
        let io_err = |source: io::Error| LockError::Io {
            path: path.display().to_string(),
            source,
        };
        fs::create_dir_all(dir).map_err(io_err)?;

        for _ in 0..MAX_IDENTITY_RETRIES {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&path)
                .map_err(io_err)?;

            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {}
                Err(e) if is_contended(&e) => return Err(LockError::Busy(key.to_string())),
                Err(e) => return Err(io_err(e)),
            }

            if still_linked(&file, &path) {
                log::trace!("Acquired lock '{}'", path.display());
                return Ok(Self { file, path });
            }
            log::debug!("Lock file '{}' was replaced while locking; retrying", path.display());
            let _ = FileExt::unlock(&file);
        }
        Err(LockError::Busy(key.to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EnvLock {
    fn drop(&mut self) {
        // Unlink while still holding the lock so a waiter that opened the
        // old inode notices the swap and re-opens.
        if cfg!(unix)
            && let Err(e) = fs::remove_file(&self.path)
        {
            log::debug!("Could not remove lock file '{}': {e}", self.path.display());
        }
        let _ = FileExt::unlock(&self.file);
    }
}

fn is_contended(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::WouldBlock
        || error.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn still_linked(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(on_disk)) => held.dev() == on_disk.dev() && held.ino() == on_disk.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_linked(_file: &File, path: &Path) -> bool {
    path.exists()
}
