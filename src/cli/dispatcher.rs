// src/cli/dispatcher.rs

//! Routes a command line to the body of the matching command node.

use crate::cli::builtins;
use crate::constants::{
    EXIT_USAGE, HELPER_PATH_ENV, ROOT_COMMAND, SCRIPT_DIR_ENV, SESSION_ID_ENV,
};
use crate::core::discovery;
use crate::core::resolver::{self, CommandBody, CommandNode, CommandTree, NodeKind, NodeSource};
use crate::core::telemetry::{Consent, TelemetryEvent};
use crate::state::AppContext;
use crate::system::executor::{ExecutionRequest, InputSource};
use anyhow::{Context, Result};
use clap::error::ErrorKind;
use colored::*;
use dialoguer::{Confirm, theme::ColorfulTheme};
use std::env;
use std::fmt::Write as _;
use std::path::Path;
use std::time::{Instant, SystemTime};

/// Built-ins first, then project-local scripts, then `PATH` plugins.
pub fn build_tree(project_root: Option<&Path>, search_path: Option<&std::ffi::OsStr>) -> CommandTree {
    let mut tree = CommandTree::new(t!("cli.root_help").to_string());
    builtins::register(&mut tree);
    discovery::discover(&mut tree, project_root, search_path);
    log::debug!("Command tree has {} node(s)", tree.len());
    tree
}

/// Resolves `args` and runs the command. `help` is the root `--help` flag.
pub fn dispatch(ctx: &AppContext, args: &[String], help: bool) -> Result<i32> {
    let search_path = env::var_os("PATH");
    let tree = build_tree(ctx.project_root.as_deref(), search_path.as_deref());
    let resolution = tree.resolve(args)?;
    let node = tree
        .get(&resolution.path)
        .ok_or_else(|| resolver::ResolveError::CommandNotFound(resolution.path.join(" ")))?;
    log::debug!(
        "Resolved '{}' ({:?}), remaining args: {:?}",
        node.display_path(),
        node.source,
        resolution.rest
    );

    if node.kind == NodeKind::Group {
        print!("{}", render_group_help(&tree, node)?);
        let asked = help || resolution.rest.is_empty() || is_help_flag(resolution.rest.first());
        return Ok(if asked { 0 } else { EXIT_USAGE });
    }

    let loaded = node.load()?;
    if help {
        // `devx --help <leaf>`: native leaves render their own argument help.
        return match &loaded.body {
            CommandBody::Native(handler) => run_native(ctx, *handler, &["--help".to_string()]),
            _ => {
                println!("{}", loaded.help);
                Ok(0)
            }
        };
    }

    maybe_ask_consent(ctx, &resolution.path);
    register_telemetry(ctx, node);
    resolver::ensure_features(&ctx.features(), &loaded.features)?;

    match &loaded.body {
        CommandBody::Native(handler) => run_native(ctx, *handler, &resolution.rest),
        CommandBody::Script { argv, dir } => run_script(ctx, &tree, argv, dir, &resolution.rest),
        CommandBody::Plugin { executable } => {
            let request = ExecutionRequest::new([executable.to_string_lossy()])
                .args(resolution.rest.iter().cloned())
                .env(SESSION_ID_ENV, ctx.session_id.clone())
                .input(InputSource::Inherit);
            match ctx.runner.exit_with(&request)? {}
        }
        CommandBody::Group => {
            print!("{}", render_group_help(&tree, node)?);
            Ok(0)
        }
    }
}

fn is_help_flag(arg: Option<&String>) -> bool {
    matches!(arg.map(String::as_str), Some("-h" | "--help"))
}

/// Runs a built-in body. Argument errors print clap's own message.
fn run_native(ctx: &AppContext, handler: resolver::NativeHandler, args: &[String]) -> Result<i32> {
    let result = handler(ctx, args);
    if let Err(e) = &result
        && let Some(clap_err) = e.downcast_ref::<clap::Error>()
    {
        let _ = clap_err.print();
        return Ok(match clap_err.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
            _ => EXIT_USAGE,
        });
    }
    result
}

/// Runs a local script from the project root. Helper directories reach the
/// child through its environment only.
fn run_script(
    ctx: &AppContext,
    tree: &CommandTree,
    argv: &[String],
    dir: &Path,
    rest: &[String],
) -> Result<i32> {
    let helper_path = env::join_paths(tree.helper_dirs()).context(t!("dispatcher.error.helper_path"))?;
    let cwd = ctx.project_root.as_deref().unwrap_or(dir);
    let request = ExecutionRequest::new(argv.iter().cloned())
        .args(rest.iter().cloned())
        .cwd(cwd)
        .env(HELPER_PATH_ENV, helper_path.to_string_lossy())
        .env(SCRIPT_DIR_ENV, dir.to_string_lossy())
        .env(SESSION_ID_ENV, ctx.session_id.clone())
        .input(InputSource::Inherit);
    Ok(ctx.runner.run(&request)?)
}

/// Lists the immediate children of a group. Only their loaders run.
pub fn render_group_help(tree: &CommandTree, group: &CommandNode) -> Result<String> {
    let loaded = group.load()?;
    let children = tree.children(&group.path);
    let mut out = String::new();

    if !loaded.help.is_empty() {
        writeln!(out, "{}\n", loaded.help)?;
    }
    let prefix = if group.path.is_empty() {
        ROOT_COMMAND.to_string()
    } else {
        format!("{ROOT_COMMAND} {}", group.display_path())
    };
    writeln!(
        out,
        "{} {} {}\n",
        t!("cli.help.usage").yellow().bold(),
        prefix.cyan().bold(),
        t!("cli.help.usage_tail")
    )?;

    writeln!(out, "{}", t!("cli.help.commands").yellow().bold())?;
    let width = children
        .iter()
        .filter_map(|c| c.path.last())
        .map(String::len)
        .max()
        .unwrap_or_default();
    for child in &children {
        let name = child.path.last().map(String::as_str).unwrap_or_default();
        let summary = match child.load() {
            Ok(loaded) => loaded.summary().to_string(),
            Err(e) => {
                log::debug!("Could not load '{}': {e}", child.display_path());
                t!("cli.help.unavailable").to_string()
            }
        };
        let marker = match child.source {
            NodeSource::LocalScript => format!(" {}", t!("cli.help.local_marker").dimmed()),
            _ => String::new(),
        };
        writeln!(out, "  {:<width$}  {}{}", name.cyan().bold(), summary, marker)?;
    }
    if children.is_empty() {
        writeln!(out, "  {}", t!("cli.help.no_commands").dimmed())?;
    }

    if group.path.is_empty() {
        writeln!(out, "\n{}", t!("cli.help.options").yellow().bold())?;
        writeln!(out, "{}", t!("cli.help.options_body"))?;
    }
    Ok(out)
}

/// First-run question, interactive sessions only.
fn maybe_ask_consent(ctx: &AppContext, path: &[String]) {
    if !ctx.interactive || path.first().is_some_and(|s| s == "self") {
        return;
    }
    let store = ctx.consent();
    if store.read() != Consent::Unknown {
        return;
    }
    let answer = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(t!("telemetry.prompt.consent"))
        .default(false)
        .interact();
    match answer {
        Ok(granted) => {
            if let Err(e) = store.write(granted) {
                log::warn!("Could not record telemetry consent: {e}");
            }
        }
        Err(e) => log::debug!("Telemetry consent prompt skipped: {e}"),
    }
}

/// Queues one event when the process exits, if the user opted in.
/// The telemetry commands themselves are never reported.
fn register_telemetry(ctx: &AppContext, node: &CommandNode) {
    let is_telemetry_command = node.path.len() >= 2
        && node.path.first().is_some_and(|s| s == "self")
        && node.path.get(1).is_some_and(|s| s == "telemetry");
    if is_telemetry_command || ctx.consent().read() != Consent::Granted {
        return;
    }
    let emitter = match ctx.emitter() {
        Ok(emitter) => emitter,
        Err(e) => {
            log::debug!("Telemetry disabled for this run: {e}");
            return;
        }
    };

    let session = ctx.session_id.clone();
    let command = node.path.clone();
    let source = format!("{:?}", node.source).to_lowercase();
    let started = SystemTime::now();
    let clock = Instant::now();
    ctx.runner.add_exit_hook(Box::new(move |code| {
        let event = TelemetryEvent::new(session, command, code, started, clock.elapsed())
            .with_attribute("source", source);
        emitter.emit(&event);
    }));
}
