// src/core/telemetry/emitter.rs

use super::daemon;
use super::event::TelemetryEvent;
use super::queue::EventQueue;
use super::TelemetryError;
use crate::constants::{SESSION_ID_ENV, TELEMETRY_CONSENT_FILENAME, TELEMETRY_DAEMON_PATH};
use crate::core::paths;
use crate::models::TelemetryConfig;
use crate::system::executor::{ExecutionRequest, ProcessRunner};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consent {
    Granted,
    Denied,
    /// The user was never asked.
    Unknown,
}

/// Persists the telemetry opt-in as a one-character file in the config directory.
#[derive(Debug, Clone)]
pub struct ConsentStore {
    file: PathBuf,
}

impl ConsentStore {
    pub fn new(config_dir: &Path) -> Self {
        Self {
            file: config_dir.join(TELEMETRY_CONSENT_FILENAME),
        }
    }

    pub fn read(&self) -> Consent {
        match fs::read_to_string(&self.file).as_deref().map(str::trim) {
            Ok("1") => Consent::Granted,
            Ok("0") => Consent::Denied,
            Ok(other) => {
                log::warn!(
                    "Ignoring unreadable telemetry consent '{}' in '{}'",
                    other,
                    self.file.display()
                );
                Consent::Unknown
            }
            Err(_) => Consent::Unknown,
        }
    }

    pub fn write(&self, granted: bool) -> io::Result<()> {
        paths::write_atomic(&self.file, if granted { b"1\n" } else { b"0\n" })
    }

    pub fn path(&self) -> &Path {
        &self.file
    }
}

/// The argv that starts the daemon through the hidden built-in command.
pub fn daemon_command(executable: &Path, config_file: &Path) -> Vec<String> {
    let mut argv = vec![
        executable.to_string_lossy().into_owned(),
        "--no-interactive".to_string(),
        "--config".to_string(),
        config_file.to_string_lossy().into_owned(),
    ];
    argv.extend(TELEMETRY_DAEMON_PATH.iter().map(|s| s.to_string()));
    argv
}

/// Queues events and keeps the daemon alive. Never fails the caller.
///
/// Owns a detached runner so it can be moved into an exit hook.
#[derive(Debug)]
pub struct Emitter {
    dir: PathBuf,
    queue: EventQueue,
    runner: ProcessRunner,
    daemon_argv: Vec<String>,
    session: String,
}

impl Emitter {
    pub fn new(
        dir: PathBuf,
        config: &TelemetryConfig,
        daemon_argv: Vec<String>,
        session: impl Into<String>,
    ) -> Self {
        Self {
            queue: EventQueue::new(&dir, config.queue_max_bytes),
            dir,
            runner: ProcessRunner::non_interactive(),
            daemon_argv,
            session: session.into(),
        }
    }

    pub fn emit(&self, event: &TelemetryEvent) {
        if let Err(e) = self.try_emit(event) {
            log::debug!("Telemetry event not recorded: {e}");
        }
    }

    fn try_emit(&self, event: &TelemetryEvent) -> Result<(), TelemetryError> {
        let dropped = self.queue.append(event)?;
        if dropped > 0 {
            log::debug!("Telemetry queue over budget, {dropped} old event(s) dropped");
        }
        self.ensure_daemon()
    }

    /// Spawns the daemon unless one is already draining the queue.
    pub fn ensure_daemon(&self) -> Result<(), TelemetryError> {
        if daemon::is_running(&self.dir) {
            log::trace!("Telemetry daemon already running");
            return Ok(());
        }
        let request =
            ExecutionRequest::new(self.daemon_argv.iter().cloned()).env(SESSION_ID_ENV, self.session.clone());
        let handle = self.runner.spawn_daemon(&request)?;
        log::debug!("Started telemetry daemon (pid {})", handle.pid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::telemetry::daemon_lock_file;
    use fs2::FileExt;
    use std::time::{Duration, SystemTime};

    fn event() -> TelemetryEvent {
        TelemetryEvent::new("s", vec!["env".into()], 0, SystemTime::now(), Duration::ZERO)
    }

    #[test]
    fn test_consent_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConsentStore::new(dir.path());
        assert_eq!(store.read(), Consent::Unknown);

        store.write(true).unwrap();
        assert_eq!(store.read(), Consent::Granted);

        store.write(false).unwrap();
        assert_eq!(store.read(), Consent::Denied);
    }

    #[test]
    fn test_emit_absorbs_daemon_spawn_failure() {
        // --- Setup ---
        let dir = tempfile::tempdir().unwrap();
        let emitter = Emitter::new(
            dir.path().to_path_buf(),
            &TelemetryConfig::default(),
            vec!["devx-test-no-such-binary".into()],
            "s",
        );

        // --- Execute ---
        emitter.emit(&event());

        // --- Assert ---
        assert!(emitter.ensure_daemon().is_err());
        assert_eq!(EventQueue::new(dir.path(), 1024).len().unwrap(), 1);
    }

    #[test]
    fn test_running_daemon_is_not_spawned_again() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path()).unwrap();
        let held = fs::File::create(daemon_lock_file(dir.path())).unwrap();
        FileExt::lock_exclusive(&held).unwrap();
        let emitter = Emitter::new(
            dir.path().to_path_buf(),
            &TelemetryConfig::default(),
            vec!["devx-test-no-such-binary".into()],
            "s",
        );

        assert!(emitter.ensure_daemon().is_ok());
    }

    #[test]
    fn test_daemon_command_targets_hidden_leaf() {
        let argv = daemon_command(Path::new("/usr/bin/devx"), Path::new("/cfg/config.toml"));
        assert_eq!(
            argv,
            vec![
                "/usr/bin/devx",
                "--no-interactive",
                "--config",
                "/cfg/config.toml",
                "self",
                "telemetry",
                "daemon"
            ]
        );
    }
}
