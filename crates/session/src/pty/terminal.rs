//! Controlling-terminal attribute capture, raw mode, and restoration.

use std::os::fd::BorrowedFd;

use nix::sys::termios::{
    tcgetattr, tcsetattr, ControlFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices,
    Termios,
};

use super::{fd, SessionError};

/// Attributes of a terminal as they were when captured.
#[derive(Debug, Clone)]
pub struct TerminalSnapshot {
    termios: Termios,
}

impl TerminalSnapshot {
    pub fn capture(fd: BorrowedFd<'_>) -> Result<Self, SessionError> {
        let termios = tcgetattr(fd).map_err(SessionError::TerminalAttributes)?;
        Ok(Self { termios })
    }

    pub fn attributes(&self) -> &Termios {
        &self.termios
    }

    fn apply(&self, fd: BorrowedFd<'_>) -> nix::Result<()> {
        tcsetattr(fd, SetArg::TCSANOW, &self.termios)
    }
}

/// Raw-mode attributes derived from `original`.
///
/// Line editing, echo, and signal generation are turned off so every byte
/// (control characters included) reaches the child, whose own pty does the
/// interpreting. Output post-processing stays on so bare newlines still
/// return the carriage.
pub fn raw_attributes(original: &Termios) -> Termios {
    let mut raw = original.clone();
    raw.local_flags.remove(
        LocalFlags::ICANON
            | LocalFlags::ECHO
            | LocalFlags::ECHOE
            | LocalFlags::ECHOK
            | LocalFlags::ECHONL
            | LocalFlags::ISIG
            | LocalFlags::IEXTEN,
    );
    raw.output_flags.insert(OutputFlags::OPOST | OutputFlags::ONLCR);
    raw.control_flags.remove(ControlFlags::CSIZE);
    raw.control_flags.insert(ControlFlags::CS8);
    raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
    raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;
    raw
}

/// Owns the captured state of the operator's terminal for one session.
///
/// The snapshot is reapplied exactly once: by [`TerminalGuard::restore`], or
/// on drop when the session unwinds before reaching it.
pub struct TerminalGuard<'fd> {
    fd: BorrowedFd<'fd>,
    snapshot: Option<TerminalSnapshot>,
    status_flags: Option<libc::c_int>,
}

impl<'fd> TerminalGuard<'fd> {
    /// Capture the attributes of `fd`. Fails if `fd` is not a terminal.
    pub fn capture(fd: BorrowedFd<'fd>) -> Result<Self, SessionError> {
        let snapshot = TerminalSnapshot::capture(fd)?;
        Ok(Self {
            fd,
            snapshot: Some(snapshot),
            status_flags: None,
        })
    }

    pub fn enter_raw(&mut self) -> Result<(), SessionError> {
        let Some(snapshot) = &self.snapshot else {
            return Ok(());
        };
        let raw = raw_attributes(snapshot.attributes());
        tcsetattr(self.fd, SetArg::TCSANOW, &raw).map_err(SessionError::RawMode)
    }

    /// Make reads from the terminal non-blocking until restored. The
    /// original file-status flags are restored alongside the attributes.
    pub fn set_nonblocking(&mut self) -> Result<(), SessionError> {
        let previous = fd::set_nonblocking(self.fd).map_err(SessionError::DescriptorFlags)?;
        self.status_flags.get_or_insert(previous);
        Ok(())
    }

    pub fn restore(mut self) -> Result<(), SessionError> {
        self.reapply()
    }

    fn reapply(&mut self) -> Result<(), SessionError> {
        let flags_result = match self.status_flags.take() {
            Some(flags) => {
                fd::set_status_flags(self.fd, flags).map_err(SessionError::DescriptorFlags)
            }
            None => Ok(()),
        };
        if let Some(snapshot) = self.snapshot.take() {
            snapshot.apply(self.fd).map_err(SessionError::RestoreTerminal)?;
        }
        flags_result
    }
}

impl Drop for TerminalGuard<'_> {
    fn drop(&mut self) {
        if self.snapshot.is_some() || self.status_flags.is_some() {
            if let Err(e) = self.reapply() {
                log::warn!("Failed to restore terminal: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::pty::openpty;
    use std::os::fd::AsFd;

    fn local_flags(fd: BorrowedFd<'_>) -> LocalFlags {
        tcgetattr(fd).unwrap().local_flags
    }

    #[test]
    fn raw_attributes_disable_line_discipline() {
        let pty = openpty(None, None).unwrap();
        let original = tcgetattr(pty.slave.as_fd()).unwrap();

        let raw = raw_attributes(&original);

        assert!(!raw.local_flags.contains(LocalFlags::ICANON));
        assert!(!raw.local_flags.contains(LocalFlags::ECHO));
        assert!(!raw.local_flags.contains(LocalFlags::ISIG));
        assert!(raw.output_flags.contains(OutputFlags::OPOST | OutputFlags::ONLCR));
        assert!(raw.control_flags.contains(ControlFlags::CS8));
        assert_eq!(raw.control_chars[SpecialCharacterIndices::VMIN as usize], 1);
        assert_eq!(raw.control_chars[SpecialCharacterIndices::VTIME as usize], 0);
        assert_eq!(raw.input_flags, original.input_flags);
    }

    #[test]
    fn capture_fails_on_non_terminal() {
        let file = tempfile::tempfile().unwrap();
        let err = TerminalGuard::capture(file.as_fd()).err().unwrap();
        assert!(matches!(err, SessionError::TerminalAttributes(_)));
    }

    #[test]
    fn restore_reapplies_attributes_and_flags() {
        let pty = openpty(None, None).unwrap();
        let fd = pty.slave.as_fd();
        let before_flags = fd::status_flags(fd).unwrap();
        let before_local = local_flags(fd);
        assert!(before_local.contains(LocalFlags::ICANON));

        let mut guard = TerminalGuard::capture(fd).unwrap();
        guard.enter_raw().unwrap();
        guard.set_nonblocking().unwrap();
        assert!(!local_flags(fd).contains(LocalFlags::ICANON));
        assert_ne!(fd::status_flags(fd).unwrap() & libc::O_NONBLOCK, 0);

        guard.restore().unwrap();

        assert_eq!(local_flags(fd), before_local);
        assert_eq!(fd::status_flags(fd).unwrap(), before_flags);
    }

    #[test]
    fn drop_restores_when_not_restored_explicitly() {
        let pty = openpty(None, None).unwrap();
        let fd = pty.slave.as_fd();
        let before_local = local_flags(fd);

        {
            let mut guard = TerminalGuard::capture(fd).unwrap();
            guard.enter_raw().unwrap();
            assert_ne!(local_flags(fd), before_local);
        }

        assert_eq!(local_flags(fd), before_local);
    }

    #[test]
    fn drop_restores_during_unwind() {
        let pty = openpty(None, None).unwrap();
        let fd = pty.slave.as_fd();
        let before_local = local_flags(fd);

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let mut guard = TerminalGuard::capture(fd).unwrap();
            guard.enter_raw().unwrap();
            panic!("session blew up");
        }));

        assert!(result.is_err());
        assert_eq!(local_flags(fd), before_local);
    }
}
