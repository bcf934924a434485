//! # System Interaction Layer
//!
//! Abstractions over the operating system: spawning and supervising child
//! processes, pseudo-terminals, signal delivery and terminal detection.
//!
//! ## Modules
//!
//! - **`executor`**: the process execution engine (`run`, `capture`, `attach`,
//!   `redirect`, `exit_with`, `spawn_daemon`).
//! - **`pty`**: pseudo-terminal allocation and resizing, with a pipe fallback
//!   on platforms that lack it.
//! - **`signals`**: interrupt and window-resize flags fed by signal handlers.
//! - **`terminal`**: interactivity detection, terminal size, escape stripping.
//! - **`ssh`**: SSH argv construction, derived ports and host config entries.

pub mod executor;
pub mod pty;
pub mod signals;
pub mod ssh;
pub mod terminal;
