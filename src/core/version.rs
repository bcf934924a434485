// src/core/version.rs

use crate::constants::VERSION_PIN_FILENAMES;
use std::cmp::Ordering;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid version '{0}': expected dotted integers such as 1.4.0")]
pub struct VersionParseError(pub String);

/// A dotted numeric version. Pre-release and build suffixes are ignored and
/// missing components compare as zero, so `1.2` == `1.2.0`.
#[derive(Debug, Clone, Eq)]
pub struct ToolVersion(Vec<u64>);

impl ToolVersion {
    /// The version of this binary.
    pub fn current() -> Self {
        env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or_else(|_| Self(vec![0]))
    }

    fn component(&self, index: usize) -> u64 {
        self.0.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for ToolVersion {
    type Err = VersionParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        let core = trimmed
            .strip_prefix('v')
            .unwrap_or(trimmed)
            .split(['-', '+'])
            .next()
            .unwrap_or_default();
        if core.is_empty() {
            return Err(VersionParseError(raw.to_string()));
        }
        core.split('.')
            .map(|part| part.parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
            .map_err(|_| VersionParseError(raw.to_string()))
    }
}

impl PartialEq for ToolVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for ToolVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ToolVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(u64::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

#[derive(Error, Debug, Clone)]
pub enum PinError {
    #[error("Failed to read version pin '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: Arc<io::Error>,
    },
    #[error("Version pin '{path}' is invalid: {source}")]
    Parse {
        path: String,
        #[source]
        source: VersionParseError,
    },
}

/// A project's pin as read at startup. A broken pin is kept rather than
/// raised, so only the operations that gate on it fail.
pub type VersionPin = Result<Option<ToolVersion>, PinError>;

/// Reads the minimum version a project asks for, if it pins one.
pub fn read_pin(project_root: &Path) -> VersionPin {
    for name in VERSION_PIN_FILENAMES {
        let path = project_root.join(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(source) => {
                return Err(PinError::Read {
                    path: path.display().to_string(),
                    source: Arc::new(source),
                });
            }
        };
        let version = content.parse().map_err(|source| PinError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        log::debug!("Found version pin {} in '{}'", version, path.display());
        return Ok(Some(version));
    }
    Ok(None)
}
