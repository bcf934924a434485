// src/cli/handlers/config.rs

use crate::cli::args::NoArgs;
use crate::core::config_loader;
use crate::state::AppContext;
use anyhow::Result;
use clap::Parser;

/// Prints the effective configuration, defaults included.
pub fn show(ctx: &AppContext, args: &[String]) -> Result<i32> {
    NoArgs::try_parse_from(args)?;
    print!("{}", config_loader::render(&ctx.config)?);
    Ok(0)
}

pub fn path(ctx: &AppContext, args: &[String]) -> Result<i32> {
    NoArgs::try_parse_from(args)?;
    println!("{}", ctx.config_file.display());
    Ok(0)
}
