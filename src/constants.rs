// src/constants.rs

/// The root command name. Plugin executables are named `<ROOT>-<segment>...`.
pub const ROOT_COMMAND: &str = "devx";

/// The project-local directory holding extensions and the version pin.
pub const PROJECT_DIR: &str = ".devx";

/// Local command definitions live under `.devx/extend/commands`.
pub const LOCAL_COMMANDS_SUBDIR: &str = "extend/commands";

/// Shared helper code for local commands lives under `.devx/extend/helpers`.
pub const LOCAL_HELPERS_SUBDIR: &str = "extend/helpers";

/// The entry point that turns a directory into a local command node.
pub const COMMAND_ENTRY_POINT: &str = "command.toml";

/// Directories starting with this marker are helper modules, not commands.
pub const HELPER_DIR_MARKER: char = '_';

/// Minimum tool version pin, checked in the project root and in `.devx/`.
pub const VERSION_PIN_FILENAMES: &[&str] = &[".devx-version", ".devx/version"];

/// The user configuration file (in `~/.config/devx/`).
pub const CONFIG_FILENAME: &str = "config.toml";

/// Marker file recording telemetry consent (in the config directory).
pub const TELEMETRY_CONSENT_FILENAME: &str = "telemetry.consent";

/// Exit code for resolver-level failures (unknown command, unsatisfied dependency, busy environment).
pub const EXIT_RESOLVER_FAILURE: i32 = 3;

/// Exit code for command-line usage errors.
pub const EXIT_USAGE: i32 = 2;

/// Exit code reported when the user interrupts a command.
pub const EXIT_CANCELLED: i32 = 130;

/// Environment variable through which local scripts receive their helper search path.
pub const HELPER_PATH_ENV: &str = "DEVX_HELPER_PATH";

/// Environment variable through which local scripts receive their own directory.
pub const SCRIPT_DIR_ENV: &str = "DEVX_SCRIPT_DIR";

/// Set to `0` to force non-interactive behaviour.
pub const INTERACTIVE_ENV: &str = "DEVX_INTERACTIVE";

/// Disables pseudo-terminal allocation when set to a non-empty value.
pub const DISABLE_PTY_ENV: &str = "DEVX_NO_PTY";

/// Hidden leaf used to start the telemetry daemon.
pub const TELEMETRY_DAEMON_PATH: &[&str] = &["self", "telemetry", "daemon"];

/// Shared by every process of one top-level invocation, plugins and scripts included.
pub const SESSION_ID_ENV: &str = "DEVX_SESSION_ID";

/// Overrides the configuration file path.
pub const CONFIG_ENV: &str = "DEVX_CONFIG";
