//! Thin descriptor helpers over `libc` returning `io::Result`.

use std::io;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

pub(crate) fn read(fd: BorrowedFd<'_>, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
    let n = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

pub(crate) fn write(fd: BorrowedFd<'_>, buf: &[u8]) -> io::Result<usize> {
    // SAFETY: `buf` is valid for reads of `buf.len()` bytes.
    let n = unsafe { libc::write(fd.as_raw_fd(), buf.as_ptr().cast(), buf.len()) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

/// Write every byte of `buf`, waiting up to `wait` at a time whenever a
/// non-blocking descriptor reports `WouldBlock`.
pub(crate) fn write_all(fd: BorrowedFd<'_>, mut buf: &[u8], wait: Duration) -> io::Result<()> {
    while !buf.is_empty() {
        match write(fd, buf) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                wait_writable(fd, wait)?;
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub(crate) fn status_flags(fd: BorrowedFd<'_>) -> io::Result<libc::c_int> {
    // SAFETY: F_GETFL takes no argument and only inspects the descriptor.
    let flags = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_GETFL) };
    if flags < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(flags)
    }
}

pub(crate) fn set_status_flags(fd: BorrowedFd<'_>, flags: libc::c_int) -> io::Result<()> {
    // SAFETY: F_SETFL with an integer flag set.
    if unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFL, flags) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Switch `fd` to non-blocking mode, returning the flags it had before.
pub(crate) fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<libc::c_int> {
    let previous = status_flags(fd)?;
    if previous & libc::O_NONBLOCK == 0 {
        set_status_flags(fd, previous | libc::O_NONBLOCK)?;
    }
    Ok(previous)
}

pub(crate) fn set_cloexec(fd: BorrowedFd<'_>) -> io::Result<()> {
    // SAFETY: F_GETFD/F_SETFD only touch the descriptor flags.
    unsafe {
        let flags = libc::fcntl(fd.as_raw_fd(), libc::F_GETFD);
        if flags < 0 || libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, flags | libc::FD_CLOEXEC) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

/// `poll` timeout for `interval`, saturating at the largest timeout the
/// conversion accepts.
pub(crate) fn poll_timeout(interval: Duration) -> PollTimeout {
    PollTimeout::from(u16::try_from(interval.as_millis()).unwrap_or(u16::MAX))
}

/// Events that count as readiness for `wanted`. Hang-up and error are
/// included so the following read or write reports the condition.
pub(crate) fn is_ready(fd: &PollFd<'_>, wanted: PollFlags) -> bool {
    let events = wanted | PollFlags::POLLHUP | PollFlags::POLLERR;
    fd.revents().is_some_and(|revents| revents.intersects(events))
}

fn wait_for(fd: BorrowedFd<'_>, wanted: PollFlags, timeout: Duration) -> io::Result<bool> {
    let mut fds = [PollFd::new(fd, wanted)];
    match poll(&mut fds, poll_timeout(timeout)) {
        Ok(n) => Ok(n > 0 && is_ready(&fds[0], wanted)),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Wait up to `timeout` for `fd` to become readable.
pub(crate) fn wait_readable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    wait_for(fd, PollFlags::POLLIN, timeout)
}

/// Wait up to `timeout` for `fd` to accept more bytes.
pub(crate) fn wait_writable(fd: BorrowedFd<'_>, timeout: Duration) -> io::Result<bool> {
    wait_for(fd, PollFlags::POLLOUT, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsFd;

    #[test]
    fn nonblocking_returns_previous_flags() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_fd();
        let before = status_flags(fd).unwrap();

        let previous = set_nonblocking(fd).unwrap();
        assert_eq!(previous, before);
        assert_ne!(status_flags(fd).unwrap() & libc::O_NONBLOCK, 0);

        set_status_flags(fd, previous).unwrap();
        assert_eq!(status_flags(fd).unwrap(), before);
    }

    #[test]
    fn cloexec_is_set() {
        let file = tempfile::tempfile().unwrap();
        set_cloexec(file.as_fd()).unwrap();
        let flags = unsafe { libc::fcntl(file.as_raw_fd(), libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[test]
    fn regular_files_are_always_ready() {
        let file = tempfile::tempfile().unwrap();
        assert!(wait_writable(file.as_fd(), Duration::from_millis(10)).unwrap());
        assert!(wait_readable(file.as_fd(), Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn poll_timeout_saturates() {
        assert_eq!(poll_timeout(Duration::from_millis(20)), PollTimeout::from(20u16));
        assert_eq!(poll_timeout(Duration::from_secs(3600)), PollTimeout::from(u16::MAX));
    }

    #[test]
    fn write_all_then_read_back() {
        use std::io::{Read, Seek, SeekFrom};

        let mut file = tempfile::tempfile().unwrap();
        write_all(file.as_fd(), b"forwarded bytes", Duration::from_millis(10)).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "forwarded bytes");
    }
}
