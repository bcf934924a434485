// src/cli/handlers/commons.rs

// Shared helpers for the built-in handlers.

use crate::cli::args::EnvTarget;
use crate::core::env::{EnvManager, EnvironmentId, EnvironmentState, EnvironmentType};
use crate::state::AppContext;
use anyhow::Result;
use clap::error::ErrorKind;
use colored::{ColoredString, Colorize};
use dialoguer::{Confirm, theme::ColorfulTheme};
use serde_json::{Map, Value};

/// Fills the type and instance from the `[env]` defaults when omitted.
pub fn resolve_target(ctx: &AppContext, target: &EnvTarget) -> Result<EnvironmentId> {
    let env_type = target.env_type.unwrap_or(ctx.config.env.default_type);
    let instance = target
        .instance
        .as_deref()
        .unwrap_or(&ctx.config.env.default_instance);
    Ok(EnvManager::id(env_type, instance)?)
}

/// Backend settings for a new environment: the `[envs.<type>]` table from
/// the configuration, overlaid with `--set KEY=VALUE` pairs.
pub fn initial_config(
    ctx: &AppContext,
    env_type: EnvironmentType,
    settings: &[String],
) -> Result<Value> {
    let mut config = match ctx.config.envs.get(env_type.as_str()) {
        Some(table) => match serde_json::to_value(table)? {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        None => Map::new(),
    };

    for setting in settings {
        let Some((key, raw)) = setting.split_once('=') else {
            return Err(clap::Error::raw(
                ErrorKind::InvalidValue,
                format!(t!("env.error.bad_setting"), setting = setting),
            )
            .into());
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        config.insert(key.trim().to_string(), value);
    }
    Ok(Value::Object(config))
}

/// Asks a yes/no question. Non-interactive sessions take the default, no.
pub fn confirm(ctx: &AppContext, prompt: &str) -> Result<bool> {
    if !ctx.interactive {
        return Ok(false);
    }
    Ok(Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?)
}

pub fn state_label(state: EnvironmentState) -> ColoredString {
    let text = state.to_string();
    match state {
        EnvironmentState::Running => text.green().bold(),
        EnvironmentState::Stopped => text.yellow(),
        EnvironmentState::Faulted => text.red().bold(),
        EnvironmentState::Absent => text.dimmed(),
        EnvironmentState::Provisioning | EnvironmentState::Removing => text.cyan(),
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let suffix = UNITS.get(unit).copied().unwrap_or("B");
    if unit == 0 {
        format!("{bytes} {suffix}")
    } else {
        format!("{value:.1} {suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::paths::StoragePaths;
    use crate::models::UserConfig;
    use crate::system::executor::ProcessRunner;
    use std::path::{Path, PathBuf};

    fn context(config: UserConfig) -> AppContext {
        AppContext {
            config,
            config_file: PathBuf::from("/nonexistent/config.toml"),
            paths: StoragePaths::under(Path::new("/nonexistent")),
            runner: ProcessRunner::non_interactive(),
            verbosity: 0,
            interactive: false,
            project_root: None,
            version_pin: Ok(None),
            session_id: "s".into(),
        }
    }

    #[test]
    fn test_initial_config_overlays_settings_on_type_defaults() {
        // --- Setup ---
        let config: UserConfig =
            toml::from_str("[envs.linux-container]\nimage = 'base:1'\nno_pull = false\n").unwrap();
        let ctx = context(config);
        let settings = vec!["no_pull=true".to_string(), "workdir=/src".to_string()];

        // --- Execute ---
        let value = initial_config(&ctx, EnvironmentType::LinuxContainer, &settings).unwrap();

        // --- Assert ---
        assert_eq!(value["image"], "base:1");
        assert_eq!(value["no_pull"], true);
        assert_eq!(value["workdir"], "/src");
        assert!(initial_config(&ctx, EnvironmentType::Remote, &["oops".into()]).is_err());
    }

    #[test]
    fn test_target_defaults_come_from_config() {
        let ctx = context(UserConfig::default());
        let id = resolve_target(&ctx, &EnvTarget::default()).unwrap();
        assert_eq!(id.env_type, ctx.config.env.default_type);
        assert_eq!(id.instance, ctx.config.env.default_instance);
    }

    #[test]
    fn test_confirm_declines_without_a_terminal() {
        let ctx = context(UserConfig::default());

        assert!(!confirm(&ctx, "Remove everything?").unwrap());
    }

    #[test]
    fn test_human_bytes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }
}
