#![cfg(unix)]
#![allow(dead_code)]

use nix::pty::{openpty, Winsize};
use nix::sys::termios::{tcgetattr, Termios};
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use scriptty_session::pty::{Console, SessionOptions};

pub const POLL: Duration = Duration::from_millis(20);

pub fn options_in(dir: &Path) -> SessionOptions {
    SessionOptions {
        shell: "/bin/sh".to_string(),
        script_path: dir.join("session-run.sh"),
        poll_interval: POLL,
        default_term: "xterm-256color".to_string(),
    }
}

/// A pty standing in for the operator's terminal: the session reads and
/// writes its slave, the test types into and reads from its master.
pub struct OperatorTerminal {
    master: Arc<File>,
    slave: Option<OwnedFd>,
    reader: Option<JoinHandle<Vec<u8>>>,
}

impl OperatorTerminal {
    pub fn new(rows: u16, cols: u16) -> Self {
        let winsize = Winsize {
            ws_row: rows,
            ws_col: cols,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };
        let pty = openpty(Some(&winsize), None).expect("openpty");
        set_cloexec(pty.master.as_fd());
        set_cloexec(pty.slave.as_fd());

        let master = Arc::new(File::from(pty.master));
        let reader_master = Arc::clone(&master);
        let reader = thread::spawn(move || {
            let mut collected = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                match (&*reader_master).read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => collected.extend_from_slice(&buf[..n]),
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    // EIO once the slave is closed.
                    Err(_) => break,
                }
            }
            collected
        });

        Self {
            master,
            slave: Some(pty.slave),
            reader: Some(reader),
        }
    }

    pub fn slave(&self) -> BorrowedFd<'_> {
        self.slave.as_ref().expect("slave already closed").as_fd()
    }

    pub fn console(&self) -> Console<'_> {
        Console::new(self.slave(), self.slave())
    }

    pub fn attributes(&self) -> Termios {
        tcgetattr(self.slave()).expect("tcgetattr")
    }

    pub fn status_flags(&self) -> libc::c_int {
        unsafe { libc::fcntl(self.slave().as_raw_fd(), libc::F_GETFL) }
    }

    /// Type `bytes` after `delay`, as an operator would.
    pub fn type_later<B>(&self, delay: Duration, bytes: B) -> JoinHandle<()>
    where
        B: AsRef<[u8]> + Send + 'static,
    {
        let master = Arc::clone(&self.master);
        thread::spawn(move || {
            thread::sleep(delay);
            (&*master)
                .write_all(bytes.as_ref())
                .expect("type into operator terminal");
        })
    }

    /// Resize the terminal after `delay`.
    pub fn resize_later(&self, delay: Duration, rows: u16, cols: u16) -> JoinHandle<()> {
        let master = Arc::clone(&self.master);
        thread::spawn(move || {
            thread::sleep(delay);
            let ws = libc::winsize {
                ws_row: rows,
                ws_col: cols,
                ws_xpixel: 0,
                ws_ypixel: 0,
            };
            let rc = unsafe { libc::ioctl(master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
            assert_eq!(rc, 0, "resize operator terminal");
        })
    }

    /// Close the operator side and return everything written to it, with
    /// carriage returns removed.
    pub fn finish(mut self) -> String {
        drop(self.slave.take());
        let bytes = self
            .reader
            .take()
            .expect("reader already joined")
            .join()
            .expect("reader thread panicked");
        String::from_utf8_lossy(&bytes).replace('\r', "")
    }
}

fn set_cloexec(fd: BorrowedFd<'_>) {
    let rc = unsafe { libc::fcntl(fd.as_raw_fd(), libc::F_SETFD, libc::FD_CLOEXEC) };
    assert_eq!(rc, 0, "set FD_CLOEXEC");
}

/// Attribute fields a session touches, for before/after comparisons.
pub fn attribute_summary(termios: &Termios) -> String {
    format!(
        "{:?} {:?} {:?} {:?} {:?}",
        termios.input_flags,
        termios.output_flags,
        termios.control_flags,
        termios.local_flags,
        termios.control_chars
    )
}
