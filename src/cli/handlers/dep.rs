// src/cli/handlers/dep.rs

use crate::cli::args::DepSyncArgs;
use crate::core::features::{self, DependencySync};
use crate::core::resolver::ResolveError;
use crate::state::AppContext;
use anyhow::Result;
use clap::Parser;
use colored::*;

/// Installs the named dependency groups (or all of them) that are missing.
pub fn sync(ctx: &AppContext, args: &[String]) -> Result<i32> {
    let args = DepSyncArgs::try_parse_from(args)?;
    let requested: Vec<String> = if args.all {
        ctx.config.features.keys().cloned().collect()
    } else {
        args.features
    };
    if requested.is_empty() {
        println!("{}", t!("dep.info.nothing_requested").dimmed());
        return Ok(0);
    }

    let sync = ctx.features();
    let unsatisfied = |source| ResolveError::UnsatisfiedDependency {
        features: requested.clone(),
        source,
    };
    let missing = features::missing_features(&sync, &requested).map_err(unsatisfied)?;
    if missing.is_empty() {
        println!("{} {}", "✔".green(), t!("dep.success.already_installed"));
        return Ok(0);
    }

    println!("{}", format!(t!("dep.info.installing"), features = missing.join(", ")).dimmed());
    sync.synchronize(&missing).map_err(unsatisfied)?;
    println!("{} {}", "✔".green(), format!(t!("dep.success.installed"), count = missing.len()));
    Ok(0)
}
