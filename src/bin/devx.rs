// src/bin/devx.rs

use colored::*;
use devx::{
    cli::{self, Cli, dispatcher},
    constants::{DISABLE_PTY_ENV, EXIT_CANCELLED, TELEMETRY_DAEMON_PATH},
    core::telemetry,
    state::{AppContext, ContextOptions},
    system::{signals::SignalFlags, terminal},
};
use clap::Parser;
use std::env;
use std::io::IsTerminal;

/// The entry point of `devx`.
/// It loads the invocation context, sets up logging, dispatches the command
/// path and turns errors into exit codes. Exit hooks (telemetry) run on every
/// path out of here.
fn main() {
    let cli = Cli::parse();

    let signals = SignalFlags::install().unwrap_or_else(|e| {
        eprintln!("{}: {e}", "Warning: could not install signal handlers".yellow());
        SignalFlags::detached()
    });
    let options = ContextOptions {
        config_file: cli.config.clone(),
        verbosity: cli.verbosity(),
        interactive: terminal::detect_interactive(cli.no_interactive),
        pty_enabled: env::var_os(DISABLE_PTY_ENV).is_none_or(|v| v.is_empty()),
        working_dir: None,
        session_id: telemetry::event::session_id(),
        signals,
    };

    if !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }

    let ctx = match AppContext::load(options) {
        Ok(ctx) => ctx,
        Err(e) => {
            cli::init_logging(cli.verbosity(), None);
            std::process::exit(report(&e));
        }
    };

    // The daemon has no terminal; it logs to its own file.
    let log_file = cli
        .targets(TELEMETRY_DAEMON_PATH)
        .then(|| telemetry::daemon_log_file(&ctx.telemetry_dir()));
    cli::init_logging(ctx.verbosity, log_file.as_deref());
    log::debug!("CLI args parsed: {:?}", cli);

    let code = match dispatcher::dispatch(&ctx, &cli.args, cli.help) {
        Ok(code) => code,
        Err(e) => report(&e),
    };
    ctx.runner.exit(code)
}

/// Prints the error and picks the exit code. Cancellation stays silent.
fn report(err: &anyhow::Error) -> i32 {
    let (code, kind) = cli::classify_error(err);
    log::debug!("Failing with {kind} ({code}): {err:?}");
    if code == EXIT_CANCELLED {
        return code;
    }
    eprintln!("\n{}: {}", cli::error_headline(kind).red().bold(), err);
    code
}
