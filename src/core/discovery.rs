// src/core/discovery.rs

//! Populates the command tree from project-local scripts and `PATH` plugins.
//!
//! Built-ins are inserted by the CLI layer before discovery runs; because the
//! tree keeps the first registration of a path, that ordering is what gives
//! built-ins precedence over local scripts, and local scripts over plugins.
//! Discovery never fails: unusable entries are logged at debug level and
//! skipped.

use crate::constants::{
    COMMAND_ENTRY_POINT, HELPER_DIR_MARKER, LOCAL_COMMANDS_SUBDIR, LOCAL_HELPERS_SUBDIR,
    PROJECT_DIR, ROOT_COMMAND, VERSION_PIN_FILENAMES,
};
use crate::core::resolver::{
    CommandBody, CommandNode, CommandTree, LoadedCommand, Loader, NodeKind, NodeSource,
    ResolveError,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Contents of a local command's `command.toml`.
#[derive(Deserialize, Debug, Default)]
#[serde(default, deny_unknown_fields)]
struct CommandManifest {
    help: String,
    features: Vec<String>,
    /// Argument vector; groups leave it out.
    run: Option<Vec<String>>,
}

/// Walks up from `start` to the directory that holds `.devx/` or a version pin.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| {
            dir.join(PROJECT_DIR).is_dir()
                || VERSION_PIN_FILENAMES.iter().any(|name| dir.join(name).is_file())
        })
        .map(Path::to_path_buf)
}

/// Adds local scripts, then plugins.
pub fn discover(tree: &mut CommandTree, project_root: Option<&Path>, search_path: Option<&OsStr>) {
    if let Some(root) = project_root {
        add_local_commands(tree, root);
    }
    if let Some(search_path) = search_path {
        add_plugins(tree, search_path);
    }
}

/// Registers every directory under `.devx/extend/commands` that has a
/// `command.toml`. `_`-prefixed directories become helper directories.
pub fn add_local_commands(tree: &mut CommandTree, project_root: &Path) {
    let extend_dir = project_root.join(PROJECT_DIR);
    let commands_dir = extend_dir.join(LOCAL_COMMANDS_SUBDIR);
    let shared_helpers = extend_dir.join(LOCAL_HELPERS_SUBDIR);
    if shared_helpers.is_dir() {
        tree.add_helper_dir(canonical(&shared_helpers));
    }
    if !commands_dir.is_dir() {
        return;
    }

    let mut walker = WalkDir::new(&commands_dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter();
    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("Skipping unreadable command entry: {e}");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if name.starts_with(HELPER_DIR_MARKER) {
            log::debug!("Using '{}' as a helper directory", entry.path().display());
            tree.add_helper_dir(canonical(entry.path()));
            walker.skip_current_dir();
            continue;
        }
        let manifest = entry.path().join(COMMAND_ENTRY_POINT);
        if !manifest.is_file() {
            log::debug!(
                "Ignoring '{}': no {COMMAND_ENTRY_POINT}",
                entry.path().display()
            );
            walker.skip_current_dir();
            continue;
        }

        let Some(path) = segments_below(&commands_dir, entry.path()) else {
            walker.skip_current_dir();
            continue;
        };
        let kind = if has_command_children(entry.path()) {
            NodeKind::Group
        } else {
            NodeKind::Leaf
        };
        let node = CommandNode::new(
            path,
            kind,
            NodeSource::LocalScript,
            local_loader(entry.path().to_path_buf(), kind),
        );
        match tree.insert(node) {
            Ok(()) => {}
            Err(ResolveError::Duplicate(existing)) => {
                // A built-in owns this path; children may still extend it.
                log::debug!("Local command '{existing}' is shadowed by a built-in");
            }
            Err(e) => {
                log::debug!("Rejected local command '{}': {e}", entry.path().display());
                walker.skip_current_dir();
            }
        }
    }
}

/// Registers `devx-<seg>[-<seg>...]` executables found on `search_path`.
/// The first match in search order wins; every prefix must already be a group.
pub fn add_plugins(tree: &mut CommandTree, search_path: &OsStr) {
    let prefix = format!("{ROOT_COMMAND}-");
    let mut found: BTreeMap<Vec<String>, PathBuf> = BTreeMap::new();

    for dir in env::split_paths(search_path) {
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(stem) = plugin_stem(&file_name, &prefix) else {
                continue;
            };
            if !is_executable(&entry.path()) {
                continue;
            }
            let segments: Vec<String> = stem.split('-').map(String::from).collect();
            found.entry(segments).or_insert_with(|| entry.path());
        }
    }

    for (path, executable) in found {
        let display = executable.display().to_string();
        let node = CommandNode::new(
            path,
            NodeKind::ExternalPlugin,
            NodeSource::ExternalPlugin,
            plugin_loader(executable),
        );
        if let Err(e) = tree.insert(node) {
            log::debug!("Rejected plugin '{display}': {e}");
        }
    }
}

fn plugin_stem<'a>(file_name: &'a str, prefix: &str) -> Option<&'a str> {
    let stem = file_name.strip_prefix(prefix)?;
    let stem = if cfg!(windows) {
        [".exe", ".cmd", ".bat"]
            .iter()
            .find_map(|ext| stem.strip_suffix(ext))
            .unwrap_or(stem)
    } else {
        stem
    };
    (!stem.is_empty()).then_some(stem)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn segments_below(base: &Path, dir: &Path) -> Option<Vec<String>> {
    let relative = dir.strip_prefix(base).ok()?;
    relative
        .components()
        .map(|c| c.as_os_str().to_str().map(String::from))
        .collect()
}

fn has_command_children(dir: &Path) -> bool {
    fs::read_dir(dir).is_ok_and(|entries| {
        entries.flatten().any(|entry| {
            let name = entry.file_name();
            !name.to_string_lossy().starts_with(HELPER_DIR_MARKER)
                && entry.path().join(COMMAND_ENTRY_POINT).is_file()
        })
    })
}

fn local_loader(dir: PathBuf, kind: NodeKind) -> Loader {
    Box::new(move || {
        let manifest_path = dir.join(COMMAND_ENTRY_POINT);
        let invalid = |reason: String| ResolveError::InvalidDefinition {
            path: manifest_path.display().to_string(),
            reason,
        };
        let raw = fs::read_to_string(&manifest_path).map_err(|e| invalid(e.to_string()))?;
        let manifest: CommandManifest = toml::from_str(&raw).map_err(|e| invalid(e.to_string()))?;
        log::debug!("Loaded local command from '{}'", manifest_path.display());

        let body = match (kind, manifest.run) {
            (NodeKind::Group, _) => CommandBody::Group,
            (_, Some(argv)) if !argv.is_empty() => CommandBody::Script {
                argv: resolve_relative_program(&dir, argv),
                dir: dir.clone(),
            },
            _ => return Err(invalid("a leaf command needs a non-empty `run` list".into())),
        };
        Ok(LoadedCommand {
            help: manifest.help,
            features: manifest.features,
            body,
        })
    })
}

/// `./tool` and `../tool` are taken relative to the command directory.
fn resolve_relative_program(dir: &Path, mut argv: Vec<String>) -> Vec<String> {
    if let Some(program) = argv.first_mut()
        && (program.starts_with("./") || program.starts_with("../"))
    {
        *program = canonical(&dir.join(&*program)).to_string_lossy().into_owned();
    }
    argv
}

fn plugin_loader(executable: PathBuf) -> Loader {
    Box::new(move || {
        Ok(LoadedCommand {
            help: t!("resolver.plugin_help").to_string(),
            features: Vec::new(),
            body: CommandBody::Plugin {
                executable: executable.clone(),
            },
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(raw: &str) -> Vec<String> {
        raw.split_whitespace().map(String::from).collect()
    }

    fn write_command(root: &Path, rel: &str, manifest: &str) {
        let dir = root.join(".devx/extend/commands").join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(COMMAND_ENTRY_POINT), manifest).unwrap();
    }

    fn builtin_group(path: &str) -> CommandNode {
        CommandNode::new(
            p(path),
            NodeKind::Group,
            NodeSource::Builtin,
            Box::new(|| {
                Ok(LoadedCommand {
                    help: "built-in".into(),
                    features: Vec::new(),
                    body: CommandBody::Group,
                })
            }),
        )
    }

    #[test]
    fn test_local_commands_become_nodes() {
        // --- Setup ---
        let project = tempfile::tempdir().unwrap();
        write_command(project.path(), "db", "help = \"Database tasks\"\n");
        write_command(
            project.path(),
            "db/seed",
            "help = \"Seed data\"\nfeatures = [\"pg\"]\nrun = [\"./seed.sh\", \"--all\"]\n",
        );
        fs::create_dir_all(project.path().join(".devx/extend/commands/_lib")).unwrap();
        fs::create_dir_all(project.path().join(".devx/extend/commands/Bad-Name")).unwrap();
        fs::write(
            project.path().join(".devx/extend/commands/Bad-Name").join(COMMAND_ENTRY_POINT),
            "",
        )
        .unwrap();
        let mut tree = CommandTree::default();

        // --- Execute ---
        add_local_commands(&mut tree, project.path());

        // --- Assert ---
        assert_eq!(tree.get(&p("db")).unwrap().kind, NodeKind::Group);
        let seed = tree.get(&p("db seed")).unwrap();
        assert_eq!(seed.kind, NodeKind::Leaf);
        assert!(!seed.is_loaded());
        let loaded = seed.load().unwrap();
        assert_eq!(loaded.features, vec!["pg"]);
        match &loaded.body {
            CommandBody::Script { argv, .. } => {
                assert!(argv[0].ends_with("seed.sh"));
                assert!(Path::new(&argv[0]).is_absolute());
                assert_eq!(argv[1], "--all");
            }
            other => panic!("unexpected body {other:?}"),
        }
        assert_eq!(tree.helper_dirs().len(), 1);
        assert!(tree.get(&p("_lib")).is_none());
        assert_eq!(tree.len(), 3);
    }

    #[test]
    fn test_builtins_shadow_local_commands() {
        let project = tempfile::tempdir().unwrap();
        write_command(project.path(), "env", "help = \"local env\"\n");
        write_command(project.path(), "env/extra", "run = [\"true\"]\n");
        let mut tree = CommandTree::default();
        tree.insert(builtin_group("env")).unwrap();

        add_local_commands(&mut tree, project.path());

        let env = tree.get(&p("env")).unwrap();
        assert_eq!(env.source, NodeSource::Builtin);
        assert_eq!(tree.get(&p("env extra")).unwrap().source, NodeSource::LocalScript);
    }

    #[test]
    fn test_leaf_without_run_fails_on_load_only() {
        let project = tempfile::tempdir().unwrap();
        write_command(project.path(), "lint", "help = \"no body\"\n");
        let mut tree = CommandTree::default();

        add_local_commands(&mut tree, project.path());

        let node = tree.get(&p("lint")).unwrap();
        assert!(matches!(node.load(), Err(ResolveError::InvalidDefinition { .. })));
    }

    #[cfg(unix)]
    fn write_plugin(dir: &Path, name: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_plugins_require_existing_group_prefix() {
        // --- Setup ---
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_plugin(first.path(), "devx-deploy");
        write_plugin(second.path(), "devx-deploy");
        write_plugin(first.path(), "devx-env-tunnel");
        write_plugin(first.path(), "devx-ghost-thing");
        write_plugin(first.path(), "devx-deploy-now");
        fs::write(first.path().join("devx-noexec"), "").unwrap();
        let search = env::join_paths([first.path(), second.path()]).unwrap();
        let mut tree = CommandTree::default();
        tree.insert(builtin_group("env")).unwrap();

        // --- Execute ---
        add_plugins(&mut tree, &search);

        // --- Assert ---
        let deploy = tree.get(&p("deploy")).unwrap();
        assert_eq!(deploy.kind, NodeKind::ExternalPlugin);
        match &deploy.load().unwrap().body {
            CommandBody::Plugin { executable } => assert!(executable.starts_with(first.path())),
            other => panic!("unexpected body {other:?}"),
        }
        assert!(tree.get(&p("env tunnel")).is_some());
        assert!(tree.get(&p("ghost thing")).is_none());
        assert!(tree.get(&p("deploy now")).is_none());
        assert!(tree.get(&p("noexec")).is_none());
    }

    #[test]
    fn test_find_project_root_walks_up() {
        let project = tempfile::tempdir().unwrap();
        fs::create_dir_all(project.path().join(".devx")).unwrap();
        let nested = project.path().join("src/deep");
        fs::create_dir_all(&nested).unwrap();

        assert_eq!(find_project_root(&nested).as_deref(), Some(project.path()));
    }
}
