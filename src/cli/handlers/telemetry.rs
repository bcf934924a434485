// src/cli/handlers/telemetry.rs

//! Handlers of the `self telemetry` group, the daemon entry point included.

use crate::cli::args::NoArgs;
use crate::core::telemetry::daemon::{self, DaemonSettings};
use crate::core::telemetry::queue::EventQueue;
use crate::core::telemetry::transport::{CommandTransport, OutboxTransport, Transport};
use crate::core::telemetry::{Consent, TelemetryError, daemon_log_file, outbox_dir};
use crate::state::AppContext;
use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::fs;
use std::io;

pub fn enable(ctx: &AppContext, args: &[String]) -> Result<i32> {
    NoArgs::try_parse_from(args)?;
    let consent = ctx.consent();
    consent
        .write(true)
        .with_context(|| format!(t!("telemetry.error.consent_write"), path = consent.path().display()))?;
    println!("{} {}", "✔".green(), t!("telemetry.success.enabled"));
    Ok(0)
}

/// Opts out and discards anything still queued.
pub fn disable(ctx: &AppContext, args: &[String]) -> Result<i32> {
    NoArgs::try_parse_from(args)?;
    let consent = ctx.consent();
    consent
        .write(false)
        .with_context(|| format!(t!("telemetry.error.consent_write"), path = consent.path().display()))?;
    queue(ctx).clear()?;
    println!("{} {}", "✔".green(), t!("telemetry.success.disabled"));
    Ok(0)
}

pub fn status(ctx: &AppContext, args: &[String]) -> Result<i32> {
    NoArgs::try_parse_from(args)?;
    let dir = ctx.telemetry_dir();
    let consent = match ctx.consent().read() {
        Consent::Granted => t!("telemetry.status.granted").green(),
        Consent::Denied => t!("telemetry.status.denied").yellow(),
        Consent::Unknown => t!("telemetry.status.unknown").dimmed(),
    };
    let daemon_state = if daemon::is_running(&dir) {
        match daemon::recorded_pid(&dir) {
            Some(pid) => format!(t!("telemetry.status.daemon_pid"), pid = pid),
            None => t!("telemetry.status.daemon_running").to_string(),
        }
    } else {
        t!("telemetry.status.daemon_stopped").to_string()
    };

    println!("  {:<12} {}", t!("telemetry.label.consent").blue(), consent);
    println!("  {:<12} {}", t!("telemetry.label.queued").blue(), queue(ctx).len()?);
    println!("  {:<12} {}", t!("telemetry.label.daemon").blue(), daemon_state);
    println!("  {:<12} {}", t!("telemetry.label.directory").blue(), dir.display());
    Ok(0)
}

/// Hidden entry point spawned by the emitter. Logging already goes to the
/// daemon log file.
pub fn daemon(ctx: &AppContext, args: &[String]) -> Result<i32> {
    NoArgs::try_parse_from(args)?;
    let dir = ctx.telemetry_dir();
    let settings = DaemonSettings::from_config(&ctx.config.telemetry)
        .stop_on(ctx.runner.signals().interrupted.clone());
    let transport: Box<dyn Transport + '_> = match &ctx.config.telemetry.collector {
        Some(argv) if !argv.is_empty() => Box::new(CommandTransport::new(
            argv.clone(),
            &ctx.runner,
            dir.join("scratch"),
        )),
        _ => Box::new(OutboxTransport::new(outbox_dir(&dir))),
    };

    match daemon::run(&dir, &queue(ctx), transport.as_ref(), &settings) {
        Ok(stats) => {
            log::debug!("Daemon stats: {stats:?}");
            Ok(0)
        }
        Err(TelemetryError::AlreadyRunning) => {
            log::debug!("Another telemetry daemon owns '{}'", dir.display());
            Ok(0)
        }
        Err(e) => Err(e.into()),
    }
}

pub fn log_show(ctx: &AppContext, args: &[String]) -> Result<i32> {
    NoArgs::try_parse_from(args)?;
    let path = daemon_log_file(&ctx.telemetry_dir());
    match fs::read_to_string(&path) {
        Ok(content) if !content.is_empty() => print!("{content}"),
        Ok(_) => println!("{}", t!("telemetry.log.empty").dimmed()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            println!("{}", t!("telemetry.log.empty").dimmed());
        }
        Err(e) => {
            return Err(e).with_context(|| format!(t!("telemetry.error.log_read"), path = path.display()));
        }
    }
    Ok(0)
}

pub fn log_clear(ctx: &AppContext, args: &[String]) -> Result<i32> {
    NoArgs::try_parse_from(args)?;
    let path = daemon_log_file(&ctx.telemetry_dir());
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!(t!("telemetry.error.log_clear"), path = path.display()));
        }
    }
    println!("{} {}", "✔".green(), t!("telemetry.success.log_cleared"));
    Ok(0)
}

fn queue(ctx: &AppContext) -> EventQueue {
    EventQueue::new(&ctx.telemetry_dir(), ctx.config.telemetry.queue_max_bytes)
}
