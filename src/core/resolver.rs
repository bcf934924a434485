// src/core/resolver.rs

//! The dispatchable command tree.
//!
//! Nodes are registered up front with a deferred loader; only the node that
//! is actually dispatched (or, for group help, its immediate children) ever
//! runs its loader.

use crate::core::features::{self, DependencySync, FeatureError};
use crate::state::AppContext;
use lazy_static::lazy_static;
use regex::Regex;
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

lazy_static! {
    static ref SEGMENT_RE: Regex = Regex::new(r"^[a-z][a-z0-9_]*$")
        .unwrap_or_else(|_| unreachable!("static segment pattern is valid"));
}

/// Body of a built-in leaf. Receives the arguments after the command path.
pub type NativeHandler = fn(&AppContext, &[String]) -> anyhow::Result<i32>;

/// Deferred factory for a node's body.
pub type Loader = Box<dyn Fn() -> Result<LoadedCommand, ResolveError>>;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("Command '{0}' was not found.")]
    CommandNotFound(String),
    #[error("Required dependency group(s) [{}] could not be installed: {source}", features.join(", "))]
    UnsatisfiedDependency {
        features: Vec<String>,
        #[source]
        source: FeatureError,
    },
    #[error("'{0}' is not a valid command name: use lowercase letters, digits and underscores.")]
    InvalidSegment(String),
    #[error("Command '{0}' has no parent group.")]
    Orphan(String),
    #[error("Command '{0}' is already registered.")]
    Duplicate(String),
    #[error("Local command '{path}' is invalid: {reason}")]
    InvalidDefinition { path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Leaf,
    ExternalPlugin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeSource {
    Builtin,
    LocalScript,
    ExternalPlugin,
}

#[derive(Debug, Clone)]
pub enum CommandBody {
    Group,
    Native(NativeHandler),
    /// A project-local command: `argv` runs from the project root.
    Script { argv: Vec<String>, dir: PathBuf },
    /// An external `devx-*` executable, handed the remaining arguments unchanged.
    Plugin { executable: PathBuf },
}

/// What a loader produces.
#[derive(Debug, Clone)]
pub struct LoadedCommand {
    pub help: String,
    pub features: Vec<String>,
    pub body: CommandBody,
}

impl LoadedCommand {
    /// First line of the help text.
    pub fn summary(&self) -> &str {
        self.help.lines().next().unwrap_or_default()
    }
}

pub struct CommandNode {
    pub path: Vec<String>,
    pub kind: NodeKind,
    pub source: NodeSource,
    /// Dispatchable but never listed.
    pub hidden: bool,
    loader: Loader,
    loaded: OnceCell<LoadedCommand>,
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNode")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("source", &self.source)
            .field("hidden", &self.hidden)
            .field("loaded", &self.loaded.get().is_some())
            .finish()
    }
}

impl CommandNode {
    pub fn new(path: Vec<String>, kind: NodeKind, source: NodeSource, loader: Loader) -> Self {
        Self {
            path,
            kind,
            source,
            hidden: false,
            loader,
            loaded: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn display_path(&self) -> String {
        self.path.join(" ")
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.get().is_some()
    }

    /// Runs the loader on first use and caches the result.
    pub fn load(&self) -> Result<&LoadedCommand, ResolveError> {
        if let Some(loaded) = self.loaded.get() {
            return Ok(loaded);
        }
        let loaded = (self.loader)()?;
        Ok(self.loaded.get_or_init(|| loaded))
    }
}

/// A resolved command path plus the arguments left for the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub path: Vec<String>,
    pub rest: Vec<String>,
}

/// All known commands keyed by path. The root group has the empty path.
pub struct CommandTree {
    nodes: BTreeMap<Vec<String>, CommandNode>,
    helper_dirs: Vec<PathBuf>,
}

impl fmt::Debug for CommandTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandTree")
            .field("nodes", &self.nodes.len())
            .field("helper_dirs", &self.helper_dirs)
            .finish()
    }
}

impl Default for CommandTree {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl CommandTree {
    pub fn new(root_help: String) -> Self {
        let root = CommandNode::new(
            Vec::new(),
            NodeKind::Group,
            NodeSource::Builtin,
            Box::new(move || {
                Ok(LoadedCommand {
                    help: root_help.clone(),
                    features: Vec::new(),
                    body: CommandBody::Group,
                })
            }),
        );
        let mut nodes = BTreeMap::new();
        nodes.insert(Vec::new(), root);
        Self {
            nodes,
            helper_dirs: Vec::new(),
        }
    }

    pub fn is_valid_segment(segment: &str) -> bool {
        SEGMENT_RE.is_match(segment)
    }

    /// Adds a node. The first registration of a path wins, so sources must
    /// be inserted in precedence order.
    pub fn insert(&mut self, node: CommandNode) -> Result<(), ResolveError> {
        let Some((_, parent)) = node.path.split_last() else {
            return Err(ResolveError::Duplicate(String::new()));
        };
        if let Some(bad) = node.path.iter().find(|s| !Self::is_valid_segment(s)) {
            return Err(ResolveError::InvalidSegment(bad.clone()));
        }
        match self.nodes.get(parent) {
            Some(p) if p.kind == NodeKind::Group => {}
            _ => return Err(ResolveError::Orphan(node.display_path())),
        }
        if self.nodes.contains_key(&node.path) {
            return Err(ResolveError::Duplicate(node.display_path()));
        }
        log::trace!("Registered command '{}' ({:?})", node.display_path(), node.source);
        self.nodes.insert(node.path.clone(), node);
        Ok(())
    }

    pub fn get(&self, path: &[String]) -> Option<&CommandNode> {
        self.nodes.get(path)
    }

    pub fn contains(&self, path: &[String]) -> bool {
        self.nodes.contains_key(path)
    }

    pub fn is_group(&self, path: &[String]) -> bool {
        self.get(path).is_some_and(|n| n.kind == NodeKind::Group)
    }

    /// Immediate children of `path`, in name order, hidden ones excluded.
    pub fn children(&self, path: &[String]) -> Vec<&CommandNode> {
        self.nodes
            .values()
            .filter(|n| n.path.len() == path.len() + 1 && n.path.starts_with(path))
            .filter(|n| !n.hidden)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn add_helper_dir(&mut self, dir: PathBuf) {
        if !self.helper_dirs.contains(&dir) {
            self.helper_dirs.push(dir);
        }
    }

    /// Helper directories exposed to local-script commands.
    pub fn helper_dirs(&self) -> &[PathBuf] {
        &self.helper_dirs
    }

    /// Matches the longest command path prefix of `args`.
    ///
    /// Descends through groups only. A group followed by a word that is
    /// neither a child nor a flag is an unknown command.
    pub fn resolve(&self, args: &[String]) -> Result<Resolution, ResolveError> {
        let mut path: Vec<String> = Vec::new();
        let mut consumed = 0;
        for arg in args {
            if !self.is_group(&path) {
                break;
            }
            let mut candidate = path.clone();
            candidate.push(arg.clone());
            if !self.contains(&candidate) {
                break;
            }
            path = candidate;
            consumed += 1;
        }

        let rest = args.get(consumed..).unwrap_or_default().to_vec();
        if self.is_group(&path)
            && let Some(next) = rest.first()
            && !next.starts_with('-')
        {
            let mut wanted = path.clone();
            wanted.push(next.clone());
            return Err(ResolveError::CommandNotFound(wanted.join(" ")));
        }
        Ok(Resolution { path, rest })
    }
}

/// Makes sure every declared dependency group is installed.
///
/// Missing groups get exactly one synchronization attempt.
pub fn ensure_features(sync: &dyn DependencySync, declared: &[String]) -> Result<(), ResolveError> {
    if declared.is_empty() {
        return Ok(());
    }
    let missing = features::missing_features(sync, declared).map_err(|source| {
        ResolveError::UnsatisfiedDependency {
            features: declared.to_vec(),
            source,
        }
    })?;
    if missing.is_empty() {
        return Ok(());
    }

    log::info!("Synchronizing dependency group(s): {}", missing.join(", "));
    sync.synchronize(&missing)
        .map_err(|source| ResolveError::UnsatisfiedDependency {
            features: missing,
            source,
        })
}
