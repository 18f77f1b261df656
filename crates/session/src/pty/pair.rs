use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::pty::{openpty, Winsize};

use super::{fd, SessionError};

/// Terminal dimensions in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
}

impl WindowSize {
    pub fn new(rows: u16, cols: u16) -> Self {
        Self { rows, cols }
    }

    /// Current size of the terminal behind `fd`.
    pub fn query(fd: BorrowedFd<'_>) -> io::Result<Self> {
        let mut ws = Winsize {
            ws_row: 0,
            ws_col: 0,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        // SAFETY: TIOCGWINSZ writes a `winsize` through the valid pointer.
        if unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCGWINSZ, &mut ws) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
        })
    }

    /// Resize the terminal behind `fd`. The kernel signals the foreground
    /// process group of a pty with SIGWINCH.
    pub fn apply(self, fd: BorrowedFd<'_>) -> io::Result<()> {
        let ws = self.to_winsize();
        // SAFETY: TIOCSWINSZ reads a `winsize` through the valid pointer.
        if unsafe { libc::ioctl(fd.as_raw_fd(), libc::TIOCSWINSZ, &ws) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn to_winsize(self) -> Winsize {
        Winsize {
            ws_row: self.rows,
            ws_col: self.cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        }
    }
}

/// A freshly allocated pseudo-terminal.
///
/// The master is non-blocking; both ends are close-on-exec so neither leaks
/// into the interpreter except through the slave's rebinding onto stdio.
#[derive(Debug)]
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
    pub size: WindowSize,
}

impl PtyPair {
    /// Allocate a pair matching the window size of `terminal`.
    pub fn allocate(terminal: BorrowedFd<'_>) -> Result<Self, SessionError> {
        let size = WindowSize::query(terminal).map_err(SessionError::WindowSize)?;
        Self::with_size(size)
    }

    pub fn with_size(size: WindowSize) -> Result<Self, SessionError> {
        let pty = openpty(Some(&size.to_winsize()), None).map_err(SessionError::PtyAllocation)?;

        fd::set_cloexec(pty.master.as_fd()).map_err(SessionError::DescriptorFlags)?;
        fd::set_cloexec(pty.slave.as_fd()).map_err(SessionError::DescriptorFlags)?;
        fd::set_nonblocking(pty.master.as_fd()).map_err(SessionError::DescriptorFlags)?;

        log::debug!(
            "Allocated pty master={} slave={} ({}x{})",
            pty.master.as_raw_fd(),
            pty.slave.as_raw_fd(),
            size.rows,
            size.cols
        );
        Ok(Self {
            master: pty.master,
            slave: pty.slave,
            size,
        })
    }
}
