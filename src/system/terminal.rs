// src/system/terminal.rs

use crate::constants::INTERACTIVE_ENV;
use lazy_static::lazy_static;
use regex::Regex;
use std::env;
use std::io::IsTerminal;

lazy_static! {
    // CSI sequences, OSC sequences (BEL or ST terminated) and lone two-byte escapes.
    static ref ANSI_ESCAPE: Regex = Regex::new(
        r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]"
    )
    .unwrap_or_else(|_| unreachable!("static ANSI pattern is valid"));
}

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermSize {
    pub cols: u16,
    pub rows: u16,
}

impl Default for TermSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Returns `true` when CI markers are present in the environment.
pub fn running_in_ci() -> bool {
    env::var_os("CI").is_some_and(|v| !v.is_empty())
        || env::var_os("GITHUB_ACTIONS").is_some()
        || env::var_os("BUILDKITE").is_some()
}

/// Decides whether this invocation may talk to a human.
///
/// Both stdin and stdout must be terminals, no CI marker may be set and
/// `DEVX_INTERACTIVE` must not be `0`/`false`. `forced_off` comes from the
/// `--no-interactive` flag.
pub fn detect_interactive(forced_off: bool) -> bool {
    if forced_off || running_in_ci() {
        return false;
    }
    if let Ok(value) = env::var(INTERACTIVE_ENV)
        && matches!(value.trim(), "0" | "false" | "no")
    {
        return false;
    }
    std::io::stdin().is_terminal() && std::io::stdout().is_terminal()
}

/// Current size of the controlling terminal, falling back to
/// `COLUMNS`/`LINES` and finally 80x24.
pub fn terminal_size() -> TermSize {
    #[cfg(unix)]
    {
        if let Some(size) = query_tty_size() {
            return size;
        }
    }

    let from_env = |name: &str| env::var(name).ok().and_then(|v| v.trim().parse::<u16>().ok());
    let fallback = TermSize::default();
    TermSize {
        cols: from_env("COLUMNS").filter(|c| *c > 0).unwrap_or(fallback.cols),
        rows: from_env("LINES").filter(|r| *r > 0).unwrap_or(fallback.rows),
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn query_tty_size() -> Option<TermSize> {
    use std::os::fd::AsRawFd;

    let stdout = std::io::stdout();
    if !stdout.is_terminal() {
        return None;
    }
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: TIOCGWINSZ only writes into the provided, properly sized struct.
    let rc = unsafe { libc::ioctl(stdout.as_raw_fd(), libc::TIOCGWINSZ, &raw mut ws) };
    (rc == 0 && ws.ws_col > 0 && ws.ws_row > 0).then_some(TermSize {
        cols: ws.ws_col,
        rows: ws.ws_row,
    })
}

/// Removes terminal escape sequences and normalizes PTY line endings.
pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE
        .replace_all(text, "")
        .replace("\r\n", "\n")
        .replace('\r', "")
}
