// src/state.rs

//! Everything one invocation resolves up front and hands to command bodies.

use crate::core::env::EnvManager;
use crate::core::features::ConfiguredFeatures;
use crate::core::paths::{self, StoragePaths};
use crate::core::telemetry::{self, ConsentStore, Emitter};
use crate::core::version::{self, VersionPin};
use crate::core::{config_loader, discovery};
use crate::models::UserConfig;
use crate::system::executor::ProcessRunner;
use crate::system::signals::SignalFlags;
use crate::system::ssh;
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Startup inputs gathered from the command line and the process environment.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub config_file: Option<PathBuf>,
    /// Net verbosity: `-v` count minus `-q` count.
    pub verbosity: i8,
    pub interactive: bool,
    pub pty_enabled: bool,
    pub working_dir: Option<PathBuf>,
    pub session_id: String,
    pub signals: SignalFlags,
}

#[derive(Debug)]
pub struct AppContext {
    pub config: UserConfig,
    pub config_file: PathBuf,
    pub paths: StoragePaths,
    pub runner: ProcessRunner,
    pub verbosity: i8,
    pub interactive: bool,
    pub project_root: Option<PathBuf>,
    /// Minimum tool version pinned by the current project. A malformed pin
    /// only fails the operations that gate on it.
    pub version_pin: VersionPin,
    pub session_id: String,
}

impl AppContext {
    /// Loads configuration, resolves storage roots and locates the project.
    pub fn load(options: ContextOptions) -> Result<Self> {
        let config_file = match options.config_file {
            Some(path) => path,
            None => paths::default_config_file()?,
        };
        let config = config_loader::load(&config_file)?;
        let config_dir = config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let paths = StoragePaths::resolve(config_dir, &config.storage)?;

        let working_dir = match options.working_dir {
            Some(dir) => dir,
            None => env::current_dir().context(t!("state.error.no_cwd"))?,
        };
        let project_root = discovery::find_project_root(&working_dir);
        let version_pin = match &project_root {
            Some(root) => version::read_pin(root),
            None => Ok(None),
        };
        if let Err(e) = &version_pin {
            log::debug!("{e}");
        }
        if let Some(root) = &project_root {
            log::debug!("Project root: '{}'", root.display());
        }

        let runner = ProcessRunner::new(
            options.interactive,
            options.pty_enabled && config.terminal.pty,
            options.signals,
        );
        Ok(Self {
            verbosity: options.verbosity.saturating_add(config.terminal.verbosity),
            config,
            config_file,
            paths,
            runner,
            interactive: options.interactive,
            project_root,
            version_pin,
            session_id: options.session_id,
        })
    }

    pub fn verbose(&self) -> bool {
        self.verbosity > 0
    }

    pub fn env_manager(&self) -> EnvManager<'_> {
        EnvManager::new(&self.paths, &self.runner)
            .version_pin(self.version_pin.clone())
            .verbose(self.verbose())
            .editor(self.config.env.editor.clone())
            .ssh_dir(ssh::default_ssh_dir())
    }

    pub fn features(&self) -> ConfiguredFeatures<'_> {
        ConfiguredFeatures::new(
            &self.config.features,
            self.paths.feature_stamps_dir(),
            &self.runner,
            self.verbose(),
        )
    }

    pub fn consent(&self) -> ConsentStore {
        ConsentStore::new(&self.paths.config)
    }

    pub fn telemetry_dir(&self) -> PathBuf {
        self.paths.telemetry_dir()
    }

    /// An emitter that restarts this very executable as the daemon.
    pub fn emitter(&self) -> Result<Emitter> {
        let exe = env::current_exe().context(t!("state.error.no_exe"))?;
        Ok(Emitter::new(
            self.telemetry_dir(),
            &self.config.telemetry,
            telemetry::emitter::daemon_command(&exe, &self.config_file),
            self.session_id.clone(),
        ))
    }
}
