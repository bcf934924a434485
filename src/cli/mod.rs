// src/cli/mod.rs

//! Command-line surface: global flags, logging setup, the built-in registry
//! and the dispatcher that routes a command path to its body.

use crate::constants::{CONFIG_ENV, EXIT_CANCELLED, EXIT_RESOLVER_FAILURE, EXIT_USAGE};
use crate::core::env::EnvError;
use crate::core::resolver::ResolveError;
use crate::system::executor::ExecutionError;
use clap::{ArgAction, Parser};
use log::LevelFilter;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

pub mod args;
pub mod builtins;
pub mod dispatcher;
pub mod handlers;

/// devx: an extensible developer-tooling CLI.
#[derive(Parser, Debug, Default)]
#[command(
    name = "devx",
    version,
    about,
    disable_help_flag = true,
    disable_help_subcommand = true,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
pub struct Cli {
    /// More output. Repeat for debug and trace logs.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Less output. Repeat to silence warnings.
    #[arg(short, long, action = ArgAction::Count)]
    pub quiet: u8,

    /// Never prompt and never allocate a pseudo-terminal.
    #[arg(long)]
    pub no_interactive: bool,

    /// Use this configuration file instead of the default one.
    #[arg(long, env = CONFIG_ENV, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show help for the root or for the given command path.
    #[arg(short, long)]
    pub help: bool,

    /// The command path followed by the command's own arguments.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub args: Vec<String>,
}

impl Cli {
    /// Net verbosity: `-v` count minus `-q` count.
    pub fn verbosity(&self) -> i8 {
        let verbose = i8::try_from(self.verbose).unwrap_or(i8::MAX);
        let quiet = i8::try_from(self.quiet).unwrap_or(i8::MAX);
        verbose.saturating_sub(quiet)
    }

    /// Whether the arguments start with the given command path.
    pub fn targets(&self, path: &[&str]) -> bool {
        self.args.len() >= path.len() && self.args.iter().zip(path).all(|(a, p)| a == p)
    }
}

fn level_for(verbosity: i8) -> LevelFilter {
    match verbosity {
        i8::MIN..=-1 => LevelFilter::Error,
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Initialises `env_logger` from the net verbosity. `RUST_LOG` still wins.
///
/// With `log_file`, records are appended there without colors instead of
/// going to stderr.
pub fn init_logging(verbosity: i8, log_file: Option<&Path>) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level_for(verbosity)).parse_default_env();

    if let Some(path) = log_file {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                builder
                    .target(env_logger::Target::Pipe(Box::new(file)))
                    .write_style(env_logger::WriteStyle::Never);
            }
            Err(e) => eprintln!("Could not open log file '{}': {e}", path.display()),
        }
    }
    let _ = builder.try_init();
}

/// Maps an error chain to its exit code and a short kind label.
pub fn classify_error(err: &anyhow::Error) -> (i32, &'static str) {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<ResolveError>() {
            match e {
                ResolveError::CommandNotFound(_) => return (EXIT_RESOLVER_FAILURE, "CommandNotFound"),
                ResolveError::UnsatisfiedDependency { .. } => {
                    return (EXIT_RESOLVER_FAILURE, "UnsatisfiedDependency");
                }
                _ => {}
            }
        }
        if let Some(e) = cause.downcast_ref::<EnvError>() {
            match e {
                EnvError::Busy(_) => return (EXIT_RESOLVER_FAILURE, "EnvironmentBusy"),
                EnvError::NotFound(_) => return (1, "EnvironmentNotFound"),
                EnvError::Faulted { .. } => return (1, "EnvironmentFaulted"),
                EnvError::VersionTooOld { .. } => return (1, "VersionTooOld"),
                EnvError::Pin(_) => return (1, "InvalidVersionPin"),
                EnvError::InvalidInstance(_) => return (EXIT_USAGE, "UsageError"),
                _ => {}
            }
        }
        if let Some(e) = cause.downcast_ref::<ExecutionError>() {
            match e {
                ExecutionError::Cancelled => return (EXIT_CANCELLED, "ExecutionCancelled"),
                ExecutionError::ExecutableNotFound(_) => return (1, "ExecutableNotFound"),
                ExecutionError::ProcessFailed { .. } => return (1, "ProcessFailed"),
                _ => {}
            }
        }
        if cause.downcast_ref::<clap::Error>().is_some() {
            return (EXIT_USAGE, "UsageError");
        }
    }
    (1, GENERIC_ERROR_KIND)
}

/// Kind reported for errors no module classifies.
pub const GENERIC_ERROR_KIND: &str = "Error";

/// The `Error [Kind]` headline printed before an error message.
pub fn error_headline(kind: &str) -> String {
    if kind == GENERIC_ERROR_KIND {
        kind.to_string()
    } else {
        format!("Error [{kind}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::env::{EnvironmentId, EnvironmentType};
    use crate::core::features::FeatureError;
    use anyhow::Context;

    #[test]
    fn test_verbosity_is_net_count() {
        let cli = Cli::try_parse_from(["devx", "-vvv", "-q", "env", "list"]).unwrap();
        assert_eq!(cli.verbosity(), 2);
        assert_eq!(cli.args, vec!["env", "list"]);
    }

    #[test]
    fn test_flags_after_the_command_path_belong_to_the_command() {
        let cli = Cli::try_parse_from(["devx", "env", "start", "-h", "--verbose"]).unwrap();

        assert!(!cli.help);
        assert_eq!(cli.verbose, 0);
        assert_eq!(cli.args, vec!["env", "start", "-h", "--verbose"]);
        assert!(cli.targets(&["env", "start"]));
        assert!(!cli.targets(&["env", "stop"]));
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(level_for(-2), LevelFilter::Error);
        assert_eq!(level_for(0), LevelFilter::Warn);
        assert_eq!(level_for(2), LevelFilter::Debug);
        assert_eq!(level_for(9), LevelFilter::Trace);
    }

    #[test]
    fn test_error_classification_walks_the_chain() {
        let not_found = anyhow::Error::from(ResolveError::CommandNotFound("nope".into()));
        assert_eq!(classify_error(&not_found), (3, "CommandNotFound"));

        let dependency = anyhow::Error::from(ResolveError::UnsatisfiedDependency {
            features: vec!["node".into()],
            source: FeatureError::NoInstaller("node".into()),
        })
        .context("while running 'build'");
        assert_eq!(classify_error(&dependency).0, 3);

        let id = EnvironmentId::new(EnvironmentType::Remote, "box").unwrap();
        let busy = Err::<(), _>(EnvError::Busy(id.to_string()))
            .context("starting")
            .unwrap_err();
        assert_eq!(classify_error(&busy), (3, "EnvironmentBusy"));

        let cancelled = anyhow::Error::from(EnvError::Backend(ExecutionError::Cancelled.into()));
        assert_eq!(classify_error(&cancelled), (130, "ExecutionCancelled"));

        assert_eq!(classify_error(&anyhow::anyhow!("plain")), (1, "Error"));
    }

    #[test]
    fn test_headline_names_the_error_kind() {
        let id = EnvironmentId::new(EnvironmentType::Remote, "box").unwrap();
        let missing = anyhow::Error::from(EnvError::NotFound(id.to_string()));
        let (_, kind) = classify_error(&missing);

        assert_eq!(error_headline(kind), "Error [EnvironmentNotFound]");
        assert_eq!(error_headline(GENERIC_ERROR_KIND), "Error");
    }
}
