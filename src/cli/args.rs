// src/cli/args.rs

//! Argument parsers of the built-in leaves. Each one parses only the
//! arguments left after the command path, hence `no_binary_name`.

use crate::core::env::EnvironmentType;
use clap::{Args, Parser};

/// Which environment a command targets. Both parts fall back to the
/// `[env]` defaults of the configuration.
#[derive(Args, Debug, Default, Clone)]
pub struct EnvTarget {
    /// The instance name.
    pub instance: Option<String>,

    /// The environment type.
    #[arg(long = "type", short = 't', value_enum)]
    pub env_type: Option<EnvironmentType>,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, name = "devx env start", about = "Creates or resumes an environment.")]
pub struct EnvStartArgs {
    #[command(flatten)]
    pub target: EnvTarget,

    /// Backend setting for a new environment (e.g. `image=ubuntu:24.04`).
    /// Values are parsed as JSON when possible.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub settings: Vec<String>,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, name = "devx env", about = "Targets one environment.")]
pub struct EnvTargetArgs {
    #[command(flatten)]
    pub target: EnvTarget,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, name = "devx env remove", about = "Removes an environment and its cache.")]
pub struct EnvRemoveArgs {
    #[command(flatten)]
    pub target: EnvTarget,

    /// Do not ask for confirmation.
    #[arg(long, short)]
    pub yes: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, name = "devx env status", about = "Shows the state of an environment.")]
pub struct EnvStatusArgs {
    #[command(flatten)]
    pub target: EnvTarget,

    /// Print the full descriptor as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, name = "devx env list", about = "Lists known environments.")]
pub struct EnvListArgs {
    /// Only list environments of this type.
    #[arg(long = "type", short = 't', value_enum)]
    pub env_type: Option<EnvironmentType>,

    /// Print descriptors as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug, Default)]
#[command(
    no_binary_name = true,
    name = "devx env run",
    about = "Runs a command inside an environment.",
    after_help = "Example: devx env run box -- make test"
)]
pub struct EnvRunArgs {
    #[command(flatten)]
    pub target: EnvTarget,

    /// The command to run, after `--`.
    #[arg(last = true, required = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, name = "devx self dep sync", about = "Installs dependency groups.")]
pub struct DepSyncArgs {
    /// Groups to synchronize.
    pub features: Vec<String>,

    /// Synchronize every configured group.
    #[arg(long, conflicts_with = "features")]
    pub all: bool,
}

/// For leaves that take no arguments; still answers `--help`.
#[derive(Parser, Debug, Default)]
#[command(no_binary_name = true, name = "devx")]
pub struct NoArgs {}
