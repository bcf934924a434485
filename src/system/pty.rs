// src/system/pty.rs

//! Pseudo-terminal allocation.
//!
//! Unix uses `openpty(3)` and `TIOCSWINSZ`. Other platforms report
//! [`is_supported`] as `false` and the executor falls back to pipes; on those
//! platforms terminal size is fixed at spawn time, which is a known gap rather
//! than an error.

use crate::system::terminal::TermSize;
use std::fs::File;
use std::io;

/// The two ends of a freshly allocated pseudo-terminal.
#[derive(Debug)]
pub struct PtyPair {
    /// Parent side: read the child's output here, resize through it.
    pub master: File,
    /// Child side: becomes the child's stdout and stderr.
    #[cfg(unix)]
    pub slave: std::os::fd::OwnedFd,
    #[cfg(not(unix))]
    pub slave: File,
}

/// Whether this platform can allocate a pseudo-terminal.
pub const fn is_supported() -> bool {
    cfg!(unix)
}

#[cfg(unix)]
fn to_winsize(size: TermSize) -> nix::pty::Winsize {
    nix::pty::Winsize {
        ws_row: size.rows,
        ws_col: size.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

#[cfg(unix)]
fn set_cloexec(fd: std::os::fd::RawFd) -> io::Result<()> {
    use nix::fcntl::{FcntlArg, FdFlag, fcntl};
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}

/// Opens a pseudo-terminal sized like `size`.
///
/// Both descriptors are close-on-exec so grandchildren never keep the pair
/// alive; the executor dups the slave onto the child's stdio explicitly.
#[cfg(unix)]
pub fn open(size: TermSize) -> io::Result<PtyPair> {
    use std::os::fd::AsRawFd;

    let winsize = to_winsize(size);
    let pair = nix::pty::openpty(&winsize, None::<&nix::sys::termios::Termios>)?;
    set_cloexec(pair.master.as_raw_fd())?;
    set_cloexec(pair.slave.as_raw_fd())?;
    Ok(PtyPair {
        master: File::from(pair.master),
        slave: pair.slave,
    })
}

#[cfg(not(unix))]
pub fn open(_size: TermSize) -> io::Result<PtyPair> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "pseudo-terminals are not supported on this platform",
    ))
}

/// Applies a new window size to the terminal behind `master`.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn resize(master: &File, size: TermSize) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let winsize = to_winsize(size);
    // SAFETY: TIOCSWINSZ only reads the provided, fully initialised struct.
    let rc = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, &raw const winsize) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn resize(_master: &File, _size: TermSize) -> io::Result<()> {
    Ok(())
}
