//! # devx
//!
//! An extensible developer-tooling CLI. The command tree is composed from
//! built-in commands, project-local scripts and plugin executables found on
//! `PATH`; built-in commands drive developer environments through a small
//! process execution engine with pseudo-terminal support.

include!(concat!(env!("OUT_DIR"), "/translations.rs"));

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Shared flag raised when the user asks the current invocation to stop.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod state;
pub mod system;
