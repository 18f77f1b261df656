//! The single-threaded loop relaying bytes between the console and the pty.

use std::io;
use std::os::fd::BorrowedFd;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};

use super::{fd, ChildProcess, ChildState, Console, SessionError, WindowSize};

const CHUNK_SIZE: usize = 4096;

/// How long the drain waits for more output once the master runs dry.
const DRAIN_SETTLE: Duration = Duration::from_millis(50);

#[derive(Debug, Default, Clone, Copy)]
struct Readiness {
    input: bool,
    output: bool,
    writable: bool,
}

/// Relays console input to the pty master and master output to the console
/// until the child terminates.
///
/// Keystrokes the master cannot take yet are queued, and the console is not
/// read again until the queue empties. A direction that hits end-of-file or a
/// hard error is retired for the rest of the session; transient conditions
/// (`EINTR`, `EAGAIN`) are retried on the next iteration.
pub struct Multiplexer<'a> {
    console: Console<'a>,
    master: BorrowedFd<'a>,
    poll_interval: Duration,
    last_size: WindowSize,
    pending: Vec<u8>,
    input_open: bool,
    to_child_open: bool,
    from_child_open: bool,
    output_open: bool,
    bytes_in: usize,
    bytes_out: usize,
}

impl<'a> Multiplexer<'a> {
    pub fn new(
        console: Console<'a>,
        master: BorrowedFd<'a>,
        poll_interval: Duration,
        initial_size: WindowSize,
    ) -> Self {
        Self {
            console,
            master,
            poll_interval,
            last_size: initial_size,
            pending: Vec::new(),
            input_open: true,
            to_child_open: true,
            from_child_open: true,
            output_open: true,
            bytes_in: 0,
            bytes_out: 0,
        }
    }

    /// Run until `child` terminates, then drain whatever output remains.
    ///
    /// Only a failed liveness check ends the loop early.
    pub fn run(&mut self, child: &mut ChildProcess) -> Result<ChildState, SessionError> {
        loop {
            let ready = match self.wait_ready() {
                Ok(ready) => ready,
                Err(e) => {
                    log::warn!("Readiness wait failed: {e}");
                    thread::sleep(self.poll_interval);
                    Readiness::default()
                }
            };

            if ready.input {
                self.forward_input();
            }
            if ready.writable {
                self.flush_pending();
            }
            if ready.output {
                self.forward_output();
            }

            self.propagate_resize();

            let state = child.try_wait()?;
            if !state.is_running() {
                self.drain();
                log::debug!(
                    "Child finished with {state:?}; relayed {} bytes in, {} bytes out",
                    self.bytes_in,
                    self.bytes_out
                );
                return Ok(state);
            }
        }
    }

    fn wait_ready(&self) -> io::Result<Readiness> {
        let watch_input = self.input_open && self.pending.is_empty();
        let watch_output = self.from_child_open;
        let watch_writable = self.to_child_open && !self.pending.is_empty();

        if !(watch_input || watch_output || watch_writable) {
            thread::sleep(self.poll_interval);
            return Ok(Readiness::default());
        }

        let mut fds = Vec::with_capacity(2);
        if watch_input {
            fds.push(PollFd::new(self.console.input, PollFlags::POLLIN));
        }
        let mut master_events = PollFlags::empty();
        if watch_output {
            master_events |= PollFlags::POLLIN;
        }
        if watch_writable {
            master_events |= PollFlags::POLLOUT;
        }
        if !master_events.is_empty() {
            fds.push(PollFd::new(self.master, master_events));
        }

        match poll(&mut fds, fd::poll_timeout(self.poll_interval)) {
            Ok(0) | Err(Errno::EINTR) => Ok(Readiness::default()),
            Ok(_) => {
                let (input, master) = if watch_input {
                    (fds.first(), fds.get(1))
                } else {
                    (None, fds.first())
                };
                Ok(Readiness {
                    input: input.is_some_and(|fd| fd::is_ready(fd, PollFlags::POLLIN)),
                    output: watch_output
                        && master.is_some_and(|fd| fd::is_ready(fd, PollFlags::POLLIN)),
                    writable: watch_writable
                        && master.is_some_and(|fd| fd::is_ready(fd, PollFlags::POLLOUT)),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn forward_input(&mut self) {
        let mut buf = [0u8; CHUNK_SIZE];
        match fd::read(self.console.input, &mut buf) {
            Ok(0) => {
                log::debug!("Console input closed");
                self.input_open = false;
            }
            Ok(n) => {
                if self.to_child_open {
                    self.pending.extend_from_slice(&buf[..n]);
                    self.flush_pending();
                }
            }
            Err(e) if is_transient(&e) => {}
            Err(e) => {
                log::warn!("Failed to read console input: {e}");
                self.input_open = false;
            }
        }
    }

    fn flush_pending(&mut self) {
        while !self.pending.is_empty() {
            match fd::write(self.master, &self.pending) {
                Ok(0) => break,
                Ok(n) => {
                    self.bytes_in += n;
                    self.pending.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!(
                        "Failed to write to pty; dropping {} queued bytes: {e}",
                        self.pending.len()
                    );
                    self.pending.clear();
                    self.to_child_open = false;
                }
            }
        }
    }

    /// Relay one chunk from the master. Returns whether the master is still
    /// producing: `false` once it is dry (`EAGAIN`) or closed.
    fn forward_output(&mut self) -> bool {
        let mut buf = [0u8; CHUNK_SIZE];
        match fd::read(self.master, &mut buf) {
            Ok(0) => {
                self.from_child_open = false;
                false
            }
            Ok(n) => {
                self.emit(&buf[..n]);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
            Err(e) => {
                // EIO once every slave descriptor has closed.
                if e.raw_os_error() != Some(libc::EIO) {
                    log::warn!("Failed to read from pty: {e}");
                }
                self.from_child_open = false;
                false
            }
        }
    }

    fn emit(&mut self, bytes: &[u8]) {
        if !self.output_open {
            return;
        }
        match fd::write_all(self.console.output, bytes, self.poll_interval) {
            Ok(()) => self.bytes_out += bytes.len(),
            Err(e) => {
                log::warn!("Failed to write console output; discarding further output: {e}");
                self.output_open = false;
            }
        }
    }

    fn propagate_resize(&mut self) {
        let Ok(size) = WindowSize::query(self.console.input) else {
            return;
        };
        if size == self.last_size {
            return;
        }
        match size.apply(self.master) {
            Ok(()) => {
                log::debug!(
                    "Window resized {}x{} -> {}x{}",
                    self.last_size.rows,
                    self.last_size.cols,
                    size.rows,
                    size.cols
                );
                self.last_size = size;
            }
            Err(e) => log::warn!("Failed to resize pty: {e}"),
        }
    }

    fn drain(&mut self) {
        while self.from_child_open {
            if self.forward_output() {
                continue;
            }
            if !self.from_child_open {
                break;
            }
            match fd::wait_readable(self.master, DRAIN_SETTLE) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    log::warn!("Readiness wait failed while draining: {e}");
                    break;
                }
            }
        }
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::{raw_attributes, PtyPair};
    use nix::sys::termios::{tcgetattr, tcsetattr, SetArg};
    use std::io::{Read, Seek, SeekFrom};
    use std::os::fd::AsFd;

    #[test]
    fn resize_is_applied_once_per_change() {
        let operator = PtyPair::with_size(WindowSize::new(24, 80)).unwrap();
        let session = PtyPair::with_size(WindowSize::new(24, 80)).unwrap();
        let output = tempfile::tempfile().unwrap();
        let console = Console::new(operator.slave.as_fd(), output.as_fd());
        let mut mux = Multiplexer::new(
            console,
            session.master.as_fd(),
            Duration::from_millis(10),
            session.size,
        );

        mux.propagate_resize();
        assert_eq!(mux.last_size, WindowSize::new(24, 80));

        WindowSize::new(30, 90).apply(operator.master.as_fd()).unwrap();
        mux.propagate_resize();

        assert_eq!(mux.last_size, WindowSize::new(30, 90));
        assert_eq!(
            WindowSize::query(session.slave.as_fd()).unwrap(),
            WindowSize::new(30, 90)
        );
    }

    #[test]
    fn input_is_forwarded_to_master() {
        let operator = PtyPair::with_size(WindowSize::new(24, 80)).unwrap();
        let session = PtyPair::with_size(WindowSize::new(24, 80)).unwrap();
        let output = tempfile::tempfile().unwrap();
        let console = Console::new(operator.slave.as_fd(), output.as_fd());
        let mut mux = Multiplexer::new(
            console,
            session.master.as_fd(),
            Duration::from_millis(10),
            session.size,
        );

        fd::write_all(operator.master.as_fd(), b"typed\n", Duration::from_millis(100)).unwrap();
        assert!(fd::wait_readable(operator.slave.as_fd(), Duration::from_secs(2)).unwrap());
        mux.forward_input();

        assert!(mux.pending.is_empty());
        assert_eq!(mux.bytes_in, 6);
        assert!(fd::wait_readable(session.slave.as_fd(), Duration::from_secs(2)).unwrap());
        let mut buf = [0u8; 64];
        let n = fd::read(session.slave.as_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"typed\n");
    }

    #[test]
    fn unaccepted_input_is_queued_and_console_is_not_read() {
        let operator = PtyPair::with_size(WindowSize::new(24, 80)).unwrap();
        let session = PtyPair::with_size(WindowSize::new(24, 80)).unwrap();
        let raw = raw_attributes(&tcgetattr(session.slave.as_fd()).unwrap());
        tcsetattr(session.slave.as_fd(), SetArg::TCSANOW, &raw).unwrap();
        let output = tempfile::tempfile().unwrap();
        let console = Console::new(operator.slave.as_fd(), output.as_fd());
        let mut mux = Multiplexer::new(
            console,
            session.master.as_fd(),
            Duration::from_millis(10),
            session.size,
        );

        let typed = 1 << 20;
        mux.pending = vec![b'z'; typed];
        mux.flush_pending();

        assert!(!mux.pending.is_empty());
        assert!(mux.to_child_open);
        assert_eq!(mux.bytes_in + mux.pending.len(), typed);

        fd::write_all(operator.master.as_fd(), b"k\n", Duration::from_millis(100)).unwrap();
        assert!(fd::wait_readable(operator.slave.as_fd(), Duration::from_secs(2)).unwrap());
        let ready = mux.wait_ready().unwrap();
        assert!(!ready.input);
    }

    #[test]
    fn output_is_discarded_after_console_failure() {
        let session = PtyPair::with_size(WindowSize::new(24, 80)).unwrap();
        let mut output = tempfile::tempfile().unwrap();
        let console = Console::new(session.slave.as_fd(), output.as_fd());
        let mut mux = Multiplexer::new(
            console,
            session.master.as_fd(),
            Duration::from_millis(10),
            session.size,
        );

        mux.emit(b"first ");
        mux.output_open = false;
        mux.emit(b"second");

        (&output).seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        (&output).read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "first ");
        assert_eq!(mux.bytes_out, 6);
    }

    #[test]
    fn drain_relays_everything_buffered() {
        let session = PtyPair::with_size(WindowSize::new(24, 80)).unwrap();
        let mut output = tempfile::tempfile().unwrap();
        let console = Console::new(session.slave.as_fd(), output.as_fd());
        let mut mux = Multiplexer::new(
            console,
            session.master.as_fd(),
            Duration::from_millis(10),
            session.size,
        );

        fd::write_all(session.slave.as_fd(), b"left over", Duration::from_millis(100)).unwrap();
        mux.drain();

        (&output).seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        (&output).read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "left over");
    }
}
