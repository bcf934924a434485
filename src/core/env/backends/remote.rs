// src/core/env/backends/remote.rs

//! `remote`: an existing host reached over SSH. devx never provisions the
//! machine itself; `start` only proves it is reachable.

use super::{BackendContext, BackendError, EnvBackend};
use crate::core::env::models::{EnvironmentState, EnvironmentType};
use crate::core::retry::{RetryPolicy, Retryable, StopCondition};
use crate::system::executor::{CaptureOptions, ExecutionError, ExecutionRequest, InputSource};
use crate::system::ssh;
use serde::Deserialize;
use std::fmt;

/// `ssh` reserves this exit code for its own (connection) failures.
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub host: String,
    pub user: Option<String>,
    pub port: u16,
    /// Relative paths start from the login directory.
    pub workdir: String,
    /// Cache directory on the remote host, relative to the login directory.
    pub cache_dir: String,
    pub connect_attempts: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            user: None,
            port: 22,
            workdir: ".".to_string(),
            cache_dir: ".cache/devx".to_string(),
            connect_attempts: 4,
        }
    }
}

#[derive(Debug)]
enum ProbeError {
    Unreachable(i32),
    Exec(ExecutionError),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreachable(code) => write!(f, "ssh exited with code {code}"),
            Self::Exec(e) => write!(f, "{e}"),
        }
    }
}

impl Retryable for ProbeError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Unreachable(SSH_CONNECTION_FAILURE))
    }
}

#[derive(Debug)]
pub struct RemoteHost<'a> {
    ctx: BackendContext<'a>,
    config: RemoteConfig,
}

impl<'a> RemoteHost<'a> {
    pub fn new(ctx: BackendContext<'a>) -> Result<Self, BackendError> {
        let config: RemoteConfig = ctx.typed_config()?;
        if config.host.trim().is_empty() {
            return Err(BackendError::InvalidConfig {
                env_type: EnvironmentType::Remote,
                reason: "`host` is required".to_string(),
            });
        }
        Ok(Self { ctx, config })
    }

    fn destination(&self) -> String {
        match &self.config.user {
            Some(user) => format!("{user}@{}", self.config.host),
            None => self.config.host.clone(),
        }
    }

    fn remote(&self, workdir: &str, command: &[String]) -> ExecutionRequest {
        ExecutionRequest::new(ssh::remote_command(
            &self.destination(),
            self.config.port,
            workdir,
            command,
        ))
    }

    fn probe(&self) -> Result<(), ProbeError> {
        let request = ExecutionRequest::new(ssh::base_command(&self.destination(), self.config.port))
            .arg("true");
        let result = self
            .ctx
            .runner
            .capture(&request, CaptureOptions::default())
            .map_err(ProbeError::Exec)?;
        if result.success() {
            Ok(())
        } else {
            Err(ProbeError::Unreachable(result.exit_code))
        }
    }
}

impl EnvBackend for RemoteHost<'_> {
    fn start(&self) -> Result<(), BackendError> {
        log::info!("Connecting to {}", self.destination());
        let policy =
            RetryPolicy::with_stop(StopCondition::MaxAttempts(self.config.connect_attempts));
        policy.run(|_| self.probe()).map_err(|e| match e.into_inner() {
            ProbeError::Exec(e) => BackendError::Execution(e),
            unreachable @ ProbeError::Unreachable(_) => {
                BackendError::NotReady(format!("{}: {unreachable}", self.destination()))
            }
        })
    }

    fn stop(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn remove(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn status(&self) -> Result<Option<EnvironmentState>, BackendError> {
        Ok(None)
    }

    fn shell(&self) -> Result<i32, BackendError> {
        let mut argv = ssh::base_command(&self.destination(), self.config.port);
        argv.push(format!(
            "cd {} && exec \"$SHELL\" -l",
            shlex::try_quote(&self.config.workdir).unwrap_or_default()
        ));
        let request = ExecutionRequest::new(argv).input(InputSource::Inherit);
        Ok(self.ctx.runner.attach(&request)?)
    }

    fn code(&self) -> Result<i32, BackendError> {
        let request = ExecutionRequest::new([self.ctx.editor.as_str()]).args([
            "--remote".to_string(),
            format!("ssh-remote+{}", self.destination()),
            self.config.workdir.clone(),
        ]);
        Ok(self.ctx.runner.run(&request)?)
    }

    fn run_command(&self, command: &[String]) -> Result<i32, BackendError> {
        let request = self
            .remote(&self.config.workdir, command)
            .input(InputSource::Inherit);
        Ok(self.ctx.runner.run(&request)?)
    }

    fn cache_size(&self) -> Result<u64, BackendError> {
        let command = vec![
            "du".to_string(),
            "-sk".to_string(),
            self.config.cache_dir.clone(),
        ];
        let request = self.remote(".", &command);
        let result = self.ctx.runner.capture(&request, CaptureOptions::default())?;
        if !result.success() {
            // `du` fails when the directory was never created.
            return Ok(0);
        }
        parse_du_kib(&result.stdout)
            .map(|kib| kib * 1024)
            .ok_or_else(|| BackendError::UnexpectedOutput {
                command: request.display(),
                reason: result.stdout.trim().to_string(),
            })
    }

    fn cache_clean(&self) -> Result<(), BackendError> {
        let command = vec![
            "rm".to_string(),
            "-rf".to_string(),
            self.config.cache_dir.clone(),
        ];
        let request = self.remote(".", &command);
        Ok(self.ctx.runner.run_quietly(&request, self.ctx.verbose)?)
    }
}

fn parse_du_kib(output: &str) -> Option<u64> {
    output.split_whitespace().next()?.parse().ok()
}
