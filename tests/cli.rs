use assert_cmd::Command;
use fs2::FileExt;
use predicates::prelude::*;
use predicates::str::contains;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::{TempDir, tempdir};

/// An isolated home: config, data and cache all live under one tempdir.
struct Sandbox {
    root: TempDir,
}

impl Sandbox {
    fn new() -> Self {
        let sandbox = Self {
            root: tempdir().unwrap(),
        };
        sandbox.write_config("");
        sandbox
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn config_file(&self) -> PathBuf {
        self.path().join("config").join("config.toml")
    }

    fn data_dir(&self) -> PathBuf {
        self.path().join("data")
    }

    /// Writes the config with storage pinned to the sandbox, plus `extra`.
    fn write_config(&self, extra: &str) {
        fs::create_dir_all(self.path().join("config")).unwrap();
        fs::write(
            self.config_file(),
            format!(
                "[storage]\ndata = '{}'\ncache = '{}'\n\n{extra}",
                self.data_dir().display(),
                self.path().join("cache").display()
            ),
        )
        .unwrap();
    }

    fn project(&self) -> PathBuf {
        let project = self.path().join("project");
        fs::create_dir_all(project.join(".devx").join("extend").join("commands")).unwrap();
        project
    }

    fn bin(&self) -> Command {
        let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("devx"));
        cmd.env("HOME", self.path())
            .env("XDG_CONFIG_HOME", self.path().join("xdg-config"))
            .env("DEVX_CONFIG", self.config_file())
            .env("CI", "1")
            .env_remove("RUST_LOG")
            .env_remove("DEVX_SESSION_ID")
            .current_dir(self.path());
        cmd
    }
}

fn write_command(project: &Path, path: &[&str], manifest: &str) {
    let mut dir = project.join(".devx").join("extend").join("commands");
    for segment in path {
        dir = dir.join(segment);
    }
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("command.toml"), manifest).unwrap();
}

#[test]
fn root_help_lists_builtin_groups() {
    let sandbox = Sandbox::new();

    sandbox
        .bin()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("env").and(contains("self")).and(contains("config")))
        .stdout(contains("daemon").not());
}

#[test]
fn unknown_command_exits_with_resolver_failure() {
    let sandbox = Sandbox::new();

    sandbox
        .bin()
        .args(["frobnicate", "--now"])
        .assert()
        .code(3)
        .stderr(contains("'frobnicate' was not found"));

    sandbox
        .bin()
        .args(["env", "explode"])
        .assert()
        .code(3)
        .stderr(contains("'env explode' was not found"));
}

#[test]
fn group_without_subcommand_prints_its_children() {
    let sandbox = Sandbox::new();

    sandbox
        .bin()
        .arg("env")
        .assert()
        .success()
        .stdout(contains("start").and(contains("cache")).and(contains("Usage:")));
}

#[test]
fn config_path_honours_override() {
    let sandbox = Sandbox::new();

    sandbox
        .bin()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(contains("config.toml"));
}

#[cfg(unix)]
#[test]
fn local_script_runs_from_project_root_with_helper_path() {
    // --- Setup ---
    let sandbox = Sandbox::new();
    let project = sandbox.project();
    write_command(
        &project,
        &["hello"],
        "help = 'Say hello'\nrun = ['sh', '-c', 'echo \"hello $0 $1\"; echo \"helpers=$DEVX_HELPER_PATH\"; pwd']\n",
    );
    fs::create_dir_all(project.join(".devx/extend/commands/_lib")).unwrap();
    let nested = project.join("src");
    fs::create_dir_all(&nested).unwrap();

    // --- Execute & Assert ---
    sandbox
        .bin()
        .current_dir(&nested)
        .args(["hello", "big", "world"])
        .assert()
        .success()
        .stdout(contains("hello big world"))
        .stdout(contains("_lib"))
        .stdout(contains("project\n"));
}

#[cfg(unix)]
#[test]
fn plugins_need_an_existing_parent_group() {
    use std::os::unix::fs::PermissionsExt;

    // --- Setup ---
    let sandbox = Sandbox::new();
    let plugin_dir = sandbox.path().join("plugins");
    fs::create_dir_all(&plugin_dir).unwrap();
    for (name, body) in [
        ("devx-greet", "#!/bin/sh\necho \"plugin got: $*\"\nexit 7\n"),
        ("devx-ghost-walk", "#!/bin/sh\necho boo\n"),
        ("devx-env-inspect", "#!/bin/sh\necho inspecting\n"),
    ] {
        let path = plugin_dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    let search_path = std::env::join_paths(
        std::iter::once(plugin_dir.clone()).chain(std::env::split_paths(
            &std::env::var_os("PATH").unwrap_or_default(),
        )),
    )
    .unwrap();

    // --- Execute & Assert ---
    sandbox
        .bin()
        .env("PATH", &search_path)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("greet").and(contains("[external plugin]")))
        .stdout(contains("ghost").not());

    sandbox
        .bin()
        .env("PATH", &search_path)
        .args(["greet", "--loud", "x"])
        .assert()
        .code(7)
        .stdout(contains("plugin got: --loud x"));

    sandbox
        .bin()
        .env("PATH", &search_path)
        .args(["env", "inspect"])
        .assert()
        .success()
        .stdout(contains("inspecting"));

    sandbox
        .bin()
        .env("PATH", &search_path)
        .args(["ghost", "walk"])
        .assert()
        .code(3);
}

#[cfg(unix)]
#[test]
fn failed_dependency_sync_blocks_the_command_body() {
    // --- Setup ---
    let sandbox = Sandbox::new();
    sandbox.write_config("[features.toolchain]\ninstall = ['sh', '-c', 'exit 1']\n");
    let project = sandbox.project();
    let marker = sandbox.path().join("body-ran");
    write_command(
        &project,
        &["build"],
        &format!(
            "help = 'Build it'\nfeatures = ['toolchain']\nrun = ['touch', '{}']\n",
            marker.display()
        ),
    );

    // --- Execute & Assert ---
    sandbox
        .bin()
        .current_dir(&project)
        .arg("build")
        .assert()
        .code(3)
        .stderr(contains("toolchain"));
    assert!(!marker.exists());
}

#[cfg(unix)]
#[test]
fn unconfigured_dependency_group_blocks_the_command_body() {
    let sandbox = Sandbox::new();
    let project = sandbox.project();
    let marker = sandbox.path().join("body-ran");
    write_command(
        &project,
        &["build"],
        &format!(
            "help = 'Build it'\nfeatures = ['ghost']\nrun = ['touch', '{}']\n",
            marker.display()
        ),
    );

    sandbox
        .bin()
        .current_dir(&project)
        .arg("build")
        .assert()
        .code(3)
        .stderr(contains("Error [UnsatisfiedDependency]"))
        .stderr(contains("Unknown dependency group 'ghost'"));
    assert!(!marker.exists());
}

#[cfg(unix)]
#[test]
fn successful_dependency_sync_runs_once() {
    let sandbox = Sandbox::new();
    let counter = sandbox.path().join("installs");
    sandbox.write_config(&format!(
        "[features.toolchain]\ninstall = ['sh', '-c', 'echo x >> {}']\n",
        counter.display()
    ));
    let project = sandbox.project();
    write_command(
        &project,
        &["build"],
        "help = 'Build it'\nfeatures = ['toolchain']\nrun = ['true']\n",
    );

    for _ in 0..2 {
        sandbox.bin().current_dir(&project).arg("build").assert().success();
    }

    assert_eq!(fs::read_to_string(&counter).unwrap().lines().count(), 1);
}

#[test]
fn removing_an_absent_environment_fails_without_leaving_a_lock() {
    let sandbox = Sandbox::new();

    sandbox
        .bin()
        .args(["env", "remove", "box", "--type", "remote", "--yes"])
        .assert()
        .code(1)
        .stderr(contains("Error [EnvironmentNotFound]"))
        .stderr(contains("'remote/box' does not exist"));

    let locks = sandbox.data_dir().join("locks");
    let leftovers = fs::read_dir(&locks).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[test]
fn absent_environment_reports_absent_status() {
    let sandbox = Sandbox::new();

    sandbox
        .bin()
        .args(["env", "status", "box", "-t", "local-checkout"])
        .assert()
        .success()
        .stdout(contains("absent"));

    sandbox
        .bin()
        .args(["env", "list"])
        .assert()
        .success()
        .stdout(contains("No environments"));
}

/// Writes a running `remote/box` record and returns its path.
fn seed_remote_box(sandbox: &Sandbox) -> PathBuf {
    let record = sandbox.data_dir().join("envs").join("remote").join("box.json");
    fs::create_dir_all(record.parent().unwrap()).unwrap();
    fs::write(
        &record,
        r#"{"type":"remote","instance":"box","state":"running","config":{"host":"example.invalid"},"updated_at":1}"#,
    )
    .unwrap();
    record
}

#[test]
fn remove_without_yes_refuses_in_non_interactive_sessions() {
    let sandbox = Sandbox::new();
    let record = seed_remote_box(&sandbox);

    sandbox
        .bin()
        .args(["env", "remove", "box", "--type", "remote"])
        .assert()
        .code(2)
        .stderr(contains("--yes"));

    assert!(record.exists());
}

#[test]
fn held_lock_makes_the_environment_busy() {
    // --- Setup ---
    let sandbox = Sandbox::new();
    seed_remote_box(&sandbox);
    let locks = sandbox.data_dir().join("locks");
    fs::create_dir_all(&locks).unwrap();
    let held = fs::File::create(locks.join("remote-box.lock")).unwrap();
    held.lock_exclusive().unwrap();

    // --- Execute & Assert ---
    sandbox
        .bin()
        .args(["env", "stop", "box", "--type", "remote"])
        .assert()
        .code(3)
        .stderr(contains("Error [EnvironmentBusy]"))
        .stderr(contains("busy"));

    FileExt::unlock(&held).unwrap();
    sandbox
        .bin()
        .args(["env", "stop", "box", "--type", "remote"])
        .assert()
        .success()
        .stdout(contains("stopped"));
}

#[test]
fn version_pin_blocks_shell_before_spawning() {
    let sandbox = Sandbox::new();
    let project = sandbox.project();
    fs::write(project.join(".devx").join("version"), "999.0.0\n").unwrap();

    sandbox
        .bin()
        .current_dir(&project)
        .args(["env", "shell", "box", "--type", "remote"])
        .assert()
        .code(1)
        .stderr(contains("requires devx 999.0.0"));
}

#[test]
fn malformed_version_pin_only_blocks_gated_commands() {
    // --- Setup ---
    let sandbox = Sandbox::new();
    let project = sandbox.project();
    fs::write(project.join(".devx").join("version"), "latest\n").unwrap();

    // --- Execute & Assert ---
    for args in [&["--help"][..], &["config", "path"], &["env", "list"]] {
        sandbox.bin().current_dir(&project).args(args).assert().success();
    }

    sandbox
        .bin()
        .current_dir(&project)
        .args(["env", "start", "box", "--type", "remote", "--set", "host=example.invalid"])
        .assert()
        .code(1)
        .stderr(contains("Error [InvalidVersionPin]"))
        .stderr(contains("Invalid version 'latest'"));
    assert!(!sandbox.data_dir().join("envs").join("remote").join("box.json").exists());
}

#[test]
fn bad_start_setting_is_a_usage_error() {
    let sandbox = Sandbox::new();

    sandbox
        .bin()
        .args(["env", "start", "box", "--type", "remote", "--set", "oops"])
        .assert()
        .code(2)
        .stderr(contains("KEY=VALUE"));
}

#[test]
fn telemetry_consent_round_trip() {
    let sandbox = Sandbox::new();

    sandbox.bin().args(["self", "telemetry", "status"]).assert().success().stdout(contains("not asked yet"));
    sandbox.bin().args(["self", "telemetry", "enable"]).assert().success();
    assert_eq!(
        fs::read_to_string(sandbox.path().join("config").join("telemetry.consent")).unwrap().trim(),
        "1"
    );
    sandbox.bin().args(["self", "telemetry", "disable"]).assert().success();
    sandbox.bin().args(["self", "telemetry", "status"]).assert().success().stdout(contains("denied"));
}
