// src/cli/handlers/env.rs

//! Handlers of the `env` group.

use crate::cli::args::{EnvListArgs, EnvRemoveArgs, EnvRunArgs, EnvStartArgs, EnvStatusArgs, EnvTargetArgs};
use crate::cli::handlers::commons;
use crate::state::AppContext;
use anyhow::Result;
use clap::Parser;
use colored::*;
use std::time::{Duration, UNIX_EPOCH};

pub fn start(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = EnvStartArgs::try_parse_from(args)?;
    let id = commons::resolve_target(ctx, &args.target)?;
    let initial = commons::initial_config(ctx, id.env_type, &args.settings)?;

    println!("{}", format!(t!("env.info.starting"), id = id).dimmed());
    let state = ctx.env_manager().start(&id, initial)?;
    println!(
        t!("env.success.state"),
        id = id.to_string().cyan(),
        state = commons::state_label(state)
    );
    Ok(0)
}

pub fn stop(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = EnvTargetArgs::try_parse_from(args)?;
    let id = commons::resolve_target(ctx, &args.target)?;
    let state = ctx.env_manager().stop(&id)?;
    println!(
        t!("env.success.state"),
        id = id.to_string().cyan(),
        state = commons::state_label(state)
    );
    Ok(0)
}

pub fn remove(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = EnvRemoveArgs::try_parse_from(args)?;
    let id = commons::resolve_target(ctx, &args.target)?;

    if !args.yes && !commons::confirm(ctx, &format!(t!("env.prompt.remove"), id = id))? {
        if !ctx.interactive {
            return Err(clap::Error::raw(
                clap::error::ErrorKind::MissingRequiredArgument,
                t!("env.error.remove_needs_yes"),
            )
            .into());
        }
        println!("{}", t!("common.info.aborted"));
        return Ok(0);
    }
    ctx.env_manager().remove(&id)?;
    println!(
        "{} {}",
        "✔".green(),
        format!(t!("env.success.removed"), id = id.to_string().cyan())
    );
    Ok(0)
}

pub fn status(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = EnvStatusArgs::try_parse_from(args)?;
    let id = commons::resolve_target(ctx, &args.target)?;
    let descriptor = ctx.env_manager().status(&id)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&descriptor)?);
        return Ok(0);
    }
    println!("\n--- {} '{}' ---", t!("env.status.header"), id.to_string().yellow());
    println!("  {:<18} {}", t!("env.status.state").blue(), commons::state_label(descriptor.state));
    println!("  {:<18} {}", t!("env.status.updated").blue(), format_time(descriptor.updated_at));
    if let Some(required) = &descriptor.required_version {
        println!("  {:<18} {}", t!("env.status.required_version").blue(), required);
    }
    if let Some(error) = &descriptor.last_error {
        println!("  {:<18} {}", t!("env.status.last_error").blue(), error.red());
    }
    Ok(0)
}

pub fn list(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = EnvListArgs::try_parse_from(args)?;
    let descriptors = ctx.env_manager().list(args.env_type);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(0);
    }
    if descriptors.is_empty() {
        println!("{}", t!("env.list.empty").dimmed());
        return Ok(0);
    }
    let width = descriptors
        .iter()
        .map(|d| d.id().to_string().len())
        .max()
        .unwrap_or_default()
        .max(t!("env.list.column_id").len());
    println!(
        "{:<width$}  {:<13}  {}",
        t!("env.list.column_id").bold(),
        t!("env.list.column_state").bold(),
        t!("env.list.column_updated").bold()
    );
    for descriptor in &descriptors {
        println!(
            "{:<width$}  {:<13}  {}",
            descriptor.id().to_string(),
            commons::state_label(descriptor.state),
            format_time(descriptor.updated_at)
        );
    }
    Ok(0)
}

pub fn shell(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = EnvTargetArgs::try_parse_from(args)?;
    let id = commons::resolve_target(ctx, &args.target)?;
    Ok(ctx.env_manager().shell(&id)?)
}

pub fn code(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = EnvTargetArgs::try_parse_from(args)?;
    let id = commons::resolve_target(ctx, &args.target)?;
    Ok(ctx.env_manager().code(&id)?)
}

pub fn run(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = EnvRunArgs::try_parse_from(args)?;
    let id = commons::resolve_target(ctx, &args.target)?;
    Ok(ctx.env_manager().run_command(&id, &args.command)?)
}

pub fn cache_size(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = EnvTargetArgs::try_parse_from(args)?;
    let id = commons::resolve_target(ctx, &args.target)?;
    let bytes = ctx.env_manager().cache_size(&id)?;
    println!("{}\t{}", commons::human_bytes(bytes), id);
    Ok(0)
}

pub fn cache_clean(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = EnvTargetArgs::try_parse_from(args)?;
    let id = commons::resolve_target(ctx, &args.target)?;
    ctx.env_manager().cache_clean(&id)?;
    println!(
        "{} {}",
        "✔".green(),
        format!(t!("env.success.cache_cleaned"), id = id.to_string().cyan())
    );
    Ok(0)
}

/// How long ago a Unix timestamp was, or `-` when unset.
fn format_time(secs: u64) -> String {
    if secs == 0 {
        return "-".to_string();
    }
    let elapsed = UNIX_EPOCH
        .elapsed()
        .map(|now| now.saturating_sub(Duration::from_secs(secs)))
        .unwrap_or_default();
    match elapsed.as_secs() {
        0..60 => format!(t!("env.time.seconds_ago"), n = elapsed.as_secs()),
        60..3600 => format!(t!("env.time.minutes_ago"), n = elapsed.as_secs() / 60),
        3600..86_400 => format!(t!("env.time.hours_ago"), n = elapsed.as_secs() / 3600),
        _ => format!(t!("env.time.days_ago"), n = elapsed.as_secs() / 86_400),
    }
}
