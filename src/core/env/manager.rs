// src/core/env/manager.rs

//! Drives the per-environment state machine.
//!
//! ```text
//! absent -> provisioning -> running <-> stopped
//! running | stopped | faulted -> removing -> absent
//! any failure -> faulted
//! ```
//!
//! Every state-mutating operation holds the environment's advisory lock for
//! its whole duration. Invalid transitions are no-ops that report the current
//! state, except `remove` on an absent environment.

use super::backends::{self, BackendContext, BackendError, BackendFactory, BuiltinBackends, EnvBackend};
use super::lock::{EnvLock, LockError};
use super::models::{EnvironmentDescriptor, EnvironmentId, EnvironmentState, EnvironmentType};
use super::store::{DescriptorStore, StoreError};
use crate::core::paths::StoragePaths;
use crate::core::version::{PinError, ToolVersion, VersionPin};
use crate::system::executor::ProcessRunner;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnvError {
    #[error("Environment '{0}' is busy: another operation is in progress.")]
    Busy(String),
    #[error("Environment '{0}' does not exist.")]
    NotFound(String),
    #[error("Environment '{id}' is faulted ({reason}). Only `env remove` is possible.")]
    Faulted { id: String, reason: String },
    #[error("Environment '{id}' is not running (state: {state}).")]
    NotRunning {
        id: String,
        state: EnvironmentState,
    },
    #[error("This project requires devx {required} or newer, but {current} is installed.")]
    VersionTooOld { required: String, current: String },
    #[error("{0}")]
    Pin(#[from] PinError),
    #[error("Invalid environment instance name '{0}'.")]
    InvalidInstance(String),
    #[error("{0}")]
    Backend(#[from] BackendError),
    #[error("{0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Lock(#[source] LockError),
}

impl From<LockError> for EnvError {
    fn from(error: LockError) -> Self {
        match error {
            LockError::Busy(key) => Self::Busy(key),
            other => Self::Lock(other),
        }
    }
}

pub struct EnvManager<'a> {
    store: DescriptorStore,
    paths: &'a StoragePaths,
    runner: &'a ProcessRunner,
    factory: Box<dyn BackendFactory + 'a>,
    current_version: ToolVersion,
    required_version: Option<ToolVersion>,
    pin_error: Option<PinError>,
    verbose: bool,
    editor: String,
    ssh_dir: Option<PathBuf>,
}

impl fmt::Debug for EnvManager<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvManager")
            .field("paths", &self.paths)
            .field("current_version", &self.current_version)
            .field("required_version", &self.required_version)
            .finish_non_exhaustive()
    }
}

impl<'a> EnvManager<'a> {
    pub fn new(paths: &'a StoragePaths, runner: &'a ProcessRunner) -> Self {
        Self {
            store: DescriptorStore::new(paths.clone()),
            paths,
            runner,
            factory: Box::new(BuiltinBackends),
            current_version: ToolVersion::current(),
            required_version: None,
            pin_error: None,
            verbose: false,
            editor: "code".to_string(),
            ssh_dir: None,
        }
    }

    #[must_use]
    pub fn with_factory(mut self, factory: impl BackendFactory + 'a) -> Self {
        self.factory = Box::new(factory);
        self
    }

    /// Minimum version pinned by the current project.
    #[must_use]
    pub fn required_version(mut self, version: Option<ToolVersion>) -> Self {
        self.required_version = version;
        self
    }

    /// The project pin as read at startup. A malformed pin fails the
    /// version-gated operations instead of the whole invocation.
    #[must_use]
    pub fn version_pin(mut self, pin: VersionPin) -> Self {
        match pin {
            Ok(version) => {
                self.required_version = version;
                self.pin_error = None;
            }
            Err(e) => {
                self.required_version = None;
                self.pin_error = Some(e);
            }
        }
        self
    }

    #[must_use]
    pub fn current_version(mut self, version: ToolVersion) -> Self {
        self.current_version = version;
        self
    }

    #[must_use]
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    #[must_use]
    pub fn editor(mut self, editor: impl Into<String>) -> Self {
        self.editor = editor.into();
        self
    }

    #[must_use]
    pub fn ssh_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.ssh_dir = dir;
        self
    }

    pub fn id(env_type: EnvironmentType, instance: &str) -> Result<EnvironmentId, EnvError> {
        EnvironmentId::new(env_type, instance).map_err(EnvError::InvalidInstance)
    }

    /// Brings the environment to `running`. `initial_config` only applies
    /// when the environment does not exist yet.
    pub fn start(
        &self,
        id: &EnvironmentId,
        initial_config: serde_json::Value,
    ) -> Result<EnvironmentState, EnvError> {
        self.check_version(None)?;
        let _lock = self.lock(id)?;

        let mut descriptor = match self.store.load(id)? {
            Some(descriptor) => descriptor,
            None => {
                let mut descriptor = EnvironmentDescriptor::new(id, initial_config);
                descriptor.required_version = self.required_version.as_ref().map(ToString::to_string);
                descriptor
            }
        };
        self.check_version(Some(&descriptor))?;
        match descriptor.state {
            EnvironmentState::Running => {
                log::info!("Environment '{id}' is already running");
                return Ok(EnvironmentState::Running);
            }
            EnvironmentState::Absent | EnvironmentState::Stopped => {}
            EnvironmentState::Faulted => return Err(faulted(&descriptor)),
            EnvironmentState::Provisioning | EnvironmentState::Removing => {
                return Err(self.fault_stale(&mut descriptor)?);
            }
        }

        let backend = self.backend(&descriptor)?;
        if descriptor.state == EnvironmentState::Absent {
            descriptor.transition(EnvironmentState::Provisioning);
            self.store.save(&descriptor)?;
        }
        self.finish(&mut descriptor, backend.start(), EnvironmentState::Running)
    }

    pub fn stop(&self, id: &EnvironmentId) -> Result<EnvironmentState, EnvError> {
        let _lock = self.lock(id)?;
        let Some(mut descriptor) = self.store.load(id)? else {
            return Ok(EnvironmentState::Absent);
        };
        match descriptor.state {
            EnvironmentState::Running => {}
            EnvironmentState::Absent | EnvironmentState::Stopped => return Ok(descriptor.state),
            EnvironmentState::Faulted => return Err(faulted(&descriptor)),
            EnvironmentState::Provisioning | EnvironmentState::Removing => {
                return Err(self.fault_stale(&mut descriptor)?);
            }
        }

        let backend = self.backend(&descriptor)?;
        self.finish(&mut descriptor, backend.stop(), EnvironmentState::Stopped)
    }

    /// Tears the environment down and forgets it.
    pub fn remove(&self, id: &EnvironmentId) -> Result<(), EnvError> {
        // An absent environment fails without touching the lock.
        if self.load_existing(id)?.is_none() {
            return Err(EnvError::NotFound(id.to_string()));
        }
        let _lock = self.lock(id)?;
        let Some(mut descriptor) = self.load_existing(id)? else {
            return Err(EnvError::NotFound(id.to_string()));
        };

        match self.backend(&descriptor) {
            Ok(backend) => {
                descriptor.transition(EnvironmentState::Removing);
                self.store.save(&descriptor)?;
                if let Err(e) = backend.remove() {
                    descriptor.fault(e.to_string());
                    self.store.save(&descriptor)?;
                    return Err(e.into());
                }
            }
            Err(EnvError::Backend(e @ BackendError::InvalidConfig { .. })) => {
                log::warn!("Forgetting '{id}' without backend cleanup: {e}");
            }
            Err(e) => return Err(e),
        }

        let cache = self.paths.env_cache_dir(id.env_type.as_str(), &id.instance);
        if let Err(e) = backends::remove_dir_via_trash(&cache) {
            log::warn!("Could not remove cache '{}': {e}", cache.display());
        }
        self.store.delete(id)?;
        log::info!("Removed environment '{id}'");
        Ok(())
    }

    /// The persisted record reconciled with what the backend observes.
    /// Read-only: nothing is written and no lock is taken.
    pub fn status(&self, id: &EnvironmentId) -> Result<EnvironmentDescriptor, EnvError> {
        let Some(mut descriptor) = self.store.load(id)? else {
            return Ok(EnvironmentDescriptor::new(id, serde_json::Value::Null));
        };
        if descriptor.state.is_transitional() || descriptor.state == EnvironmentState::Faulted {
            return Ok(descriptor);
        }
        let observed = self
            .backend(&descriptor)
            .and_then(|backend| backend.status().map_err(EnvError::from));
        match observed {
            Ok(Some(state)) if state != descriptor.state => {
                log::debug!("'{id}' is recorded {} but observed {state}", descriptor.state);
                descriptor.state = state;
            }
            Ok(_) => {}
            Err(e) => log::warn!("Could not query '{id}': {e}"),
        }
        Ok(descriptor)
    }

    pub fn shell(&self, id: &EnvironmentId) -> Result<i32, EnvError> {
        self.check_version(None)?;
        let descriptor = self.require_running(id)?;
        self.check_version(Some(&descriptor))?;
        Ok(self.backend(&descriptor)?.shell()?)
    }

    pub fn code(&self, id: &EnvironmentId) -> Result<i32, EnvError> {
        let descriptor = self.require_running(id)?;
        Ok(self.backend(&descriptor)?.code()?)
    }

    pub fn run_command(&self, id: &EnvironmentId, command: &[String]) -> Result<i32, EnvError> {
        let descriptor = self.require_running(id)?;
        Ok(self.backend(&descriptor)?.run_command(command)?)
    }

    pub fn cache_size(&self, id: &EnvironmentId) -> Result<u64, EnvError> {
        let descriptor = self.require(id)?;
        Ok(self.backend(&descriptor)?.cache_size()?)
    }

    pub fn cache_clean(&self, id: &EnvironmentId) -> Result<(), EnvError> {
        let _lock = self.lock(id)?;
        let descriptor = self.require(id)?;
        Ok(self.backend(&descriptor)?.cache_clean()?)
    }

    pub fn list(&self, only: Option<EnvironmentType>) -> Vec<EnvironmentDescriptor> {
        self.store.list(only)
    }

    fn lock(&self, id: &EnvironmentId) -> Result<EnvLock, EnvError> {
        Ok(EnvLock::try_acquire(&self.paths.locks_dir(), &id.key())?)
    }

    fn load_existing(&self, id: &EnvironmentId) -> Result<Option<EnvironmentDescriptor>, EnvError> {
        Ok(self
            .store
            .load(id)?
            .filter(|d| d.state != EnvironmentState::Absent))
    }

    fn require(&self, id: &EnvironmentId) -> Result<EnvironmentDescriptor, EnvError> {
        self.load_existing(id)?
            .ok_or_else(|| EnvError::NotFound(id.to_string()))
    }

    fn require_running(&self, id: &EnvironmentId) -> Result<EnvironmentDescriptor, EnvError> {
        let descriptor = self.require(id)?;
        match descriptor.state {
            EnvironmentState::Running => Ok(descriptor),
            EnvironmentState::Faulted => Err(faulted(&descriptor)),
            state => Err(EnvError::NotRunning {
                id: id.to_string(),
                state,
            }),
        }
    }

    fn backend(&self, descriptor: &EnvironmentDescriptor) -> Result<Box<dyn EnvBackend + 'a>, EnvError> {
        let ctx = BackendContext {
            runner: self.runner,
            paths: self.paths,
            id: descriptor.id(),
            config: descriptor.config.clone(),
            verbose: self.verbose,
            editor: self.editor.clone(),
            ssh_dir: self.ssh_dir.clone(),
        };
        Ok(self.factory.create(ctx)?)
    }

    /// Gates on the project pin and, when given, the version recorded in the descriptor.
    fn check_version(&self, descriptor: Option<&EnvironmentDescriptor>) -> Result<(), EnvError> {
        if let Some(e) = &self.pin_error {
            return Err(e.clone().into());
        }
        let mut required = self.required_version.clone();
        if let Some(raw) = descriptor.and_then(|d| d.required_version.as_deref()) {
            match raw.parse::<ToolVersion>() {
                Ok(recorded) if required.as_ref().is_none_or(|r| recorded > *r) => {
                    required = Some(recorded);
                }
                Ok(_) => {}
                Err(e) => log::warn!("Ignoring recorded version requirement: {e}"),
            }
        }
        match required {
            Some(required) if required > self.current_version => Err(EnvError::VersionTooOld {
                required: required.to_string(),
                current: self.current_version.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// A transitional state seen while holding the lock means the previous
    /// operation died midway.
    fn fault_stale(&self, descriptor: &mut EnvironmentDescriptor) -> Result<EnvError, EnvError> {
        let reason = format!("interrupted while {}", descriptor.state);
        descriptor.fault(reason);
        self.store.save(descriptor)?;
        Ok(faulted(descriptor))
    }

    fn finish(
        &self,
        descriptor: &mut EnvironmentDescriptor,
        outcome: Result<(), BackendError>,
        target: EnvironmentState,
    ) -> Result<EnvironmentState, EnvError> {
        match outcome {
            Ok(()) => {
                descriptor.transition(target);
                self.store.save(descriptor)?;
                Ok(target)
            }
            Err(e) => {
                descriptor.fault(e.to_string());
                self.store.save(descriptor)?;
                Err(e.into())
            }
        }
    }
}

fn faulted(descriptor: &EnvironmentDescriptor) -> EnvError {
    EnvError::Faulted {
        id: descriptor.id().to_string(),
        reason: descriptor
            .last_error
            .clone()
            .unwrap_or_else(|| "unknown failure".to_string()),
    }
}
