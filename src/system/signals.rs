// src/system/signals.rs

use crate::CancellationToken;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Flags raised asynchronously by signal handlers and polled by the executor.
///
/// `interrupted` doubles as the application's [`CancellationToken`]. A
/// second interrupt while the first is still pending terminates the process
/// with the default disposition, so a wedged child can always be escaped.
#[derive(Debug, Clone, Default)]
pub struct SignalFlags {
    pub interrupted: CancellationToken,
    pub resized: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Creates unregistered flags. Used by tests and by callers that manage
    /// signals themselves.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Registers SIGINT/SIGTERM (and SIGWINCH where available) handlers that
    /// only flip the flags.
    pub fn install() -> io::Result<Self> {
        let flags = Self::default();

        #[cfg(unix)]
        {
            use signal_hook::consts::signal::{SIGINT, SIGTERM, SIGWINCH};
            use signal_hook::flag;

            for signal in [SIGINT, SIGTERM] {
                flag::register_conditional_default(signal, Arc::clone(&flags.interrupted))?;
                flag::register(signal, Arc::clone(&flags.interrupted))?;
            }
            flag::register(SIGWINCH, Arc::clone(&flags.resized))?;
        }

        #[cfg(windows)]
        {
            use signal_hook::consts::signal::{SIGINT, SIGTERM};

            for signal in [SIGINT, SIGTERM] {
                signal_hook::flag::register(signal, Arc::clone(&flags.interrupted))?;
            }
        }

        Ok(flags)
    }

    /// Returns and clears the pending resize notification.
    pub fn take_resize(&self) -> bool {
        self.resized.swap(false, Ordering::Relaxed)
    }

    /// Clears an interrupt that was already delivered to an attached child.
    pub fn clear_interrupt(&self) {
        self.interrupted.store(false, Ordering::Relaxed);
    }

    /// Whether the user asked the current invocation to stop.
    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_resize_resets_flag() {
        // --- Setup ---
        let flags = SignalFlags::detached();
        flags.resized.store(true, Ordering::Relaxed);

        // --- Execute & Assert ---
        assert!(flags.take_resize());
        assert!(!flags.take_resize());
    }

    #[test]
    fn test_clear_interrupt() {
        let flags = SignalFlags::detached();
        flags.interrupted.store(true, Ordering::Relaxed);
        assert!(flags.is_interrupted());

        flags.clear_interrupt();

        assert!(!flags.is_interrupted());
    }
}
