// src/core/env/backends/container.rs

//! `linux-container`: a long-lived container reached over SSH on a port
//! derived from its name.

use super::{BackendContext, BackendError, EnvBackend};
use crate::core::env::models::{EnvironmentState, EnvironmentType};
use crate::core::retry::{RetryPolicy, StopCondition};
use crate::system::executor::{CaptureOptions, ExecutionRequest, InputSource};
use crate::system::ssh;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Line the image's sshd prints once it accepts connections.
const READY_MARKER: &str = "Server listening on :: port 22";
const READY_TIMEOUT: Duration = Duration::from_secs(30);
const CONTAINER_HOME: &str = "/root";
const SSH_DESTINATION: &str = "root@localhost";

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ContainerConfig {
    pub image: String,
    /// Skip `pull` before creating the container.
    pub no_pull: bool,
    /// Container manager executable, e.g. `docker` or `podman`.
    pub cli: String,
    /// Working directory inside the container.
    pub workdir: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            image: "devx/dev-env-linux:latest".to_string(),
            no_pull: false,
            cli: "docker".to_string(),
            workdir: CONTAINER_HOME.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct LinuxContainer<'a> {
    ctx: BackendContext<'a>,
    config: ContainerConfig,
    name: String,
    port: u16,
}

impl<'a> LinuxContainer<'a> {
    pub fn new(ctx: BackendContext<'a>) -> Result<Self, BackendError> {
        let config: ContainerConfig = ctx.typed_config()?;
        if config.image.trim().is_empty() {
            return Err(BackendError::InvalidConfig {
                env_type: EnvironmentType::LinuxContainer,
                reason: "`image` must not be empty".to_string(),
            });
        }
        let name = format!("devx-{}", ctx.id.key());
        let port = ssh::derive_dynamic_port(&name);
        Ok(Self {
            ctx,
            config,
            name,
            port,
        })
    }

    fn cli(&self, args: &[&str]) -> ExecutionRequest {
        ExecutionRequest::new([self.config.cli.as_str()]).args(args.iter().copied())
    }

    fn wait(&self, args: &[&str]) -> Result<(), BackendError> {
        Ok(self.ctx.runner.run_quietly(&self.cli(args), self.ctx.verbose)?)
    }

    fn check_readiness(&self) -> Result<(), BackendError> {
        let output = self.ctx.runner.capture(
            &self.cli(&["logs", &self.name]),
            CaptureOptions {
                cross_streams: true,
                ..CaptureOptions::default()
            },
        )?;
        if output.stdout.contains(READY_MARKER) {
            Ok(())
        } else {
            Err(BackendError::NotReady(format!("sshd in '{}' is not listening yet", self.name)))
        }
    }

    fn wait_until_ready(&self) -> Result<(), BackendError> {
        let policy = RetryPolicy::with_stop(StopCondition::MaxElapsed(READY_TIMEOUT))
            .base_delay(Duration::from_millis(300))
            .multiplier(1.5)
            .max_delay(Duration::from_secs(2));
        policy
            .run(|_| self.check_readiness())
            .map_err(|e| e.into_inner())
    }

    fn ensure_ssh_config(&self) -> Result<(), BackendError> {
        let Some(ssh_dir) = &self.ctx.ssh_dir else {
            return Ok(());
        };
        let port = self.port.to_string();
        ssh::write_host_config(
            ssh_dir,
            &self.name,
            &[
                ("HostName", "localhost"),
                ("User", "root"),
                ("Port", &port),
                ("StrictHostKeyChecking", "no"),
                ("UserKnownHostsFile", "/dev/null"),
                ("ForwardAgent", "yes"),
            ],
        )?;
        Ok(())
    }

    fn create(&self) -> Result<(), BackendError> {
        if !self.config.no_pull {
            log::info!("Pulling image: {}", self.config.image);
            self.wait(&["pull", &self.config.image])?;
        }

        let cache = self.ctx.cache_dir();
        std::fs::create_dir_all(&cache)?;
        let port_mapping = format!("{}:22", self.port);
        let volume = format!("{}:{CONTAINER_HOME}/.cache", dunce::simplified(&cache).display());
        log::info!("Creating and starting container: {}", self.name);
        self.wait(&[
            "run",
            "--pull",
            "never",
            "-d",
            "--name",
            &self.name,
            "-p",
            &port_mapping,
            "-v",
            &volume,
            &self.config.image,
        ])
    }

    fn ssh_command(&self, command: &[String]) -> Vec<String> {
        ssh::remote_command(SSH_DESTINATION, self.port, &self.config.workdir, command)
    }
}

/// Maps `State` from `inspect` output to a lifecycle state.
fn state_from_inspect(raw: &str) -> Result<Option<EnvironmentState>, String> {
    let items: Vec<serde_json::Value> = serde_json::from_str(raw).map_err(|e| e.to_string())?;
    let Some(first) = items.first() else {
        return Ok(Some(EnvironmentState::Absent));
    };
    let state = &first["State"];
    let status = state["Status"].as_str().unwrap_or_default().to_lowercase();
    Ok(match status.as_str() {
        "running" => Some(EnvironmentState::Running),
        "created" | "paused" => Some(EnvironmentState::Stopped),
        "exited" if state["ExitCode"].as_i64() == Some(1) => Some(EnvironmentState::Faulted),
        "exited" => Some(EnvironmentState::Stopped),
        "restarting" => Some(EnvironmentState::Provisioning),
        "removing" => Some(EnvironmentState::Removing),
        _ => None,
    })
}

impl EnvBackend for LinuxContainer<'_> {
    fn start(&self) -> Result<(), BackendError> {
        match self.status()? {
            Some(EnvironmentState::Running) => {}
            Some(EnvironmentState::Stopped) => {
                log::info!("Starting container: {}", self.name);
                self.wait(&["start", &self.name])?;
            }
            _ => self.create()?,
        }
        log::info!("Waiting for container: {}", self.name);
        self.wait_until_ready()?;
        self.ensure_ssh_config()
    }

    fn stop(&self) -> Result<(), BackendError> {
        log::info!("Stopping container: {}", self.name);
        self.wait(&["stop", "-t", "0", &self.name])
    }

    fn remove(&self) -> Result<(), BackendError> {
        log::info!("Removing container: {}", self.name);
        self.wait(&["rm", "-f", &self.name])
    }

    fn status(&self) -> Result<Option<EnvironmentState>, BackendError> {
        let request = self.cli(&["inspect", &self.name]);
        let output = self.ctx.runner.capture(&request, CaptureOptions::default())?;
        if !output.success() && output.stdout.trim().is_empty() {
            return Ok(Some(EnvironmentState::Absent));
        }
        state_from_inspect(&output.stdout).map_err(|reason| BackendError::UnexpectedOutput {
            command: request.display(),
            reason,
        })
    }

    fn shell(&self) -> Result<i32, BackendError> {
        self.ensure_ssh_config()?;
        let mut argv = ssh::base_command(SSH_DESTINATION, self.port);
        argv.push(format!(
            "cd {} && exec \"$SHELL\" -l",
            shlex::try_quote(&self.config.workdir).unwrap_or_default()
        ));
        let request = ExecutionRequest::new(argv).input(InputSource::Inherit);
        Ok(self.ctx.runner.attach(&request)?)
    }

    fn code(&self) -> Result<i32, BackendError> {
        self.ensure_ssh_config()?;
        let request = ExecutionRequest::new([self.ctx.editor.as_str()]).args([
            "--remote".to_string(),
            format!("ssh-remote+{}", self.name),
            self.config.workdir.clone(),
        ]);
        Ok(self.ctx.runner.run(&request)?)
    }

    fn run_command(&self, command: &[String]) -> Result<i32, BackendError> {
        self.ensure_ssh_config()?;
        let request = ExecutionRequest::new(self.ssh_command(command)).input(InputSource::Inherit);
        Ok(self.ctx.runner.run(&request)?)
    }

    fn host_cache_dir(&self) -> Option<PathBuf> {
        Some(self.ctx.cache_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::models::EnvironmentId;
    use crate::core::paths::StoragePaths;
    use crate::system::executor::ProcessRunner;

    #[test]
    fn test_inspect_states() {
        let running = r#"[{"State": {"Status": "running", "ExitCode": 0}}]"#;
        let crashed = r#"[{"State": {"Status": "exited", "ExitCode": 1}}]"#;
        let exited = r#"[{"State": {"Status": "Exited", "ExitCode": 137}}]"#;

        assert_eq!(state_from_inspect(running).unwrap(), Some(EnvironmentState::Running));
        assert_eq!(state_from_inspect(crashed).unwrap(), Some(EnvironmentState::Faulted));
        assert_eq!(state_from_inspect(exited).unwrap(), Some(EnvironmentState::Stopped));
        assert_eq!(state_from_inspect("[]").unwrap(), Some(EnvironmentState::Absent));
        assert_eq!(
            state_from_inspect(r#"[{"State": {"Status": "dead"}}]"#).unwrap(),
            None
        );
        assert!(state_from_inspect("not json").is_err());
    }

    #[test]
    fn test_name_and_port_follow_instance() {
        let root = tempfile::tempdir().unwrap();
        let paths = StoragePaths::under(root.path());
        let runner = ProcessRunner::non_interactive();
        let ctx = BackendContext {
            runner: &runner,
            paths: &paths,
            id: EnvironmentId::new(EnvironmentType::LinuxContainer, "default").unwrap(),
            config: serde_json::json!({"cli": "podman"}),
            verbose: false,
            editor: "code".into(),
            ssh_dir: None,
        };

        let backend = LinuxContainer::new(ctx).unwrap();

        assert_eq!(backend.name, "devx-linux-container-default");
        assert_eq!(backend.port, ssh::derive_dynamic_port("devx-linux-container-default"));
        assert_eq!(backend.config.cli, "podman");
        assert_eq!(backend.cli(&["ps"]).argv(), ["podman", "ps"]);
    }

    #[test]
    fn test_rejects_unknown_settings() {
        let root = tempfile::tempdir().unwrap();
        let paths = StoragePaths::under(root.path());
        let runner = ProcessRunner::non_interactive();
        let ctx = BackendContext {
            runner: &runner,
            paths: &paths,
            id: EnvironmentId::new(EnvironmentType::LinuxContainer, "default").unwrap(),
            config: serde_json::json!({"imgae": "typo"}),
            verbose: false,
            editor: "code".into(),
            ssh_dir: None,
        };

        assert!(matches!(
            LinuxContainer::new(ctx),
            Err(BackendError::InvalidConfig { .. })
        ));
    }
}
