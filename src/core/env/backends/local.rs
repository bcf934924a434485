// src/core/env/backends/local.rs

//! `local-checkout`: a git working copy on this machine.

use super::{BackendContext, BackendError, EnvBackend};
use crate::core::env::models::{EnvironmentState, EnvironmentType};
use crate::core::paths;
use crate::system::executor::{ExecutionRequest, InputSource};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct LocalConfig {
    /// Repository to clone into the data directory.
    pub repo: Option<String>,
    pub branch: Option<String>,
    /// Use an existing directory instead of cloning. Never deleted by `remove`.
    pub path: Option<String>,
}

#[derive(Debug)]
pub struct LocalCheckout<'a> {
    ctx: BackendContext<'a>,
    config: LocalConfig,
    dir: PathBuf,
    managed: bool,
}

impl<'a> LocalCheckout<'a> {
    pub fn new(ctx: BackendContext<'a>) -> Result<Self, BackendError> {
        let config: LocalConfig = ctx.typed_config()?;
        let invalid = |reason: String| BackendError::InvalidConfig {
            env_type: EnvironmentType::LocalCheckout,
            reason,
        };
        let (dir, managed) = match (&config.path, &config.repo) {
            (Some(path), _) => (paths::expand_path(path).map_err(|e| invalid(e.to_string()))?, false),
            (None, Some(_)) => (ctx.paths.checkouts_dir().join(&ctx.id.instance), true),
            (None, None) => return Err(invalid("set either `repo` or `path`".to_string())),
        };
        Ok(Self {
            ctx,
            config,
            dir,
            managed,
        })
    }

    fn clone_repo(&self, repo: &str) -> Result<(), BackendError> {
        if let Some(parent) = self.dir.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut request = ExecutionRequest::new(["git", "clone"]);
        if let Some(branch) = &self.config.branch {
            request = request.args(["--branch", branch.as_str()]);
        }
        request = request.arg(repo).arg(self.dir.to_string_lossy());
        log::info!("Cloning repository: {repo}");
        Ok(self.ctx.runner.run_quietly(&request, self.ctx.verbose)?)
    }

    fn login_shell() -> String {
        env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| if cfg!(windows) { "cmd" } else { "sh" }.to_string())
    }
}

impl EnvBackend for LocalCheckout<'_> {
    fn start(&self) -> Result<(), BackendError> {
        if self.dir.is_dir() {
            return Ok(());
        }
        match (&self.config.repo, self.managed) {
            (Some(repo), true) => self.clone_repo(repo),
            _ => Err(BackendError::InvalidConfig {
                env_type: EnvironmentType::LocalCheckout,
                reason: format!("'{}' does not exist", self.dir.display()),
            }),
        }
    }

    fn stop(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn remove(&self) -> Result<(), BackendError> {
        if self.managed && self.dir.exists() {
            log::info!("Removing checkout: {}", self.dir.display());
            super::remove_dir_via_trash(&self.dir)?;
        }
        Ok(())
    }

    fn status(&self) -> Result<Option<EnvironmentState>, BackendError> {
        // A checkout has no running process; only its absence is observable.
        Ok((!self.dir.is_dir()).then_some(EnvironmentState::Absent))
    }

    fn shell(&self) -> Result<i32, BackendError> {
        let request = ExecutionRequest::new([Self::login_shell()])
            .cwd(&self.dir)
            .input(InputSource::Inherit);
        Ok(self.ctx.runner.attach(&request)?)
    }

    fn code(&self) -> Result<i32, BackendError> {
        let request = ExecutionRequest::new([self.ctx.editor.clone()])
            .arg(self.dir.to_string_lossy());
        Ok(self.ctx.runner.run(&request)?)
    }

    fn run_command(&self, command: &[String]) -> Result<i32, BackendError> {
        let request = ExecutionRequest::new(command.iter().cloned())
            .cwd(&self.dir)
            .input(InputSource::Inherit);
        Ok(self.ctx.runner.run(&request)?)
    }

    fn host_cache_dir(&self) -> Option<PathBuf> {
        Some(self.ctx.cache_dir())
    }
}
