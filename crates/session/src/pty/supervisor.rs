//! Launching the interpreter on the slave side of a pty and tracking it.

use std::ffi::{CStr, CString, OsStr, OsString};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::Path;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};

use super::{PtyPair, SessionError};

/// Exit status of a child whose `execve` failed.
pub const EXEC_FAILED: i32 = 127;

const FORCED_COLOR_ENV: [(&str, &str); 4] = [
    ("COLORTERM", "truecolor"),
    ("FORCE_COLOR", "1"),
    ("CLICOLOR", "1"),
    ("CLICOLOR_FORCE", "1"),
];

/// Liveness of the interpreter process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Running,
    Exited(i32),
    Signaled(i32),
    /// Reaped by someone else; the status is unknown.
    Vanished,
}

impl ChildState {
    pub fn is_running(self) -> bool {
        matches!(self, ChildState::Running)
    }

    pub fn success(self) -> bool {
        matches!(self, ChildState::Exited(0))
    }

    /// Shell-style exit code: the exit status, or 128 plus the signal.
    pub fn exit_code(self) -> Option<i32> {
        match self {
            ChildState::Exited(code) => Some(code),
            ChildState::Signaled(signal) => Some(128 + signal),
            ChildState::Running | ChildState::Vanished => None,
        }
    }
}

/// A forked interpreter. Killed and reaped on drop if still running.
#[derive(Debug)]
pub struct ChildProcess {
    pid: Pid,
    state: ChildState,
}

impl ChildProcess {
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Check for termination without blocking.
    pub fn try_wait(&mut self) -> Result<ChildState, SessionError> {
        if !self.state.is_running() {
            return Ok(self.state);
        }
        match waitpid(self.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::Exited(_, code)) => self.state = ChildState::Exited(code),
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                self.state = ChildState::Signaled(signal as i32)
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(Errno::ECHILD) => {
                log::warn!("Child {} was reaped elsewhere", self.pid);
                self.state = ChildState::Vanished;
            }
            Err(source) => {
                return Err(SessionError::Wait {
                    pid: self.pid.as_raw(),
                    source,
                })
            }
        }
        Ok(self.state)
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.state.is_running() {
            log::debug!("Killing child {}", self.pid);
            let _ = kill(self.pid, Signal::SIGKILL);
            let _ = waitpid(self.pid, None);
        }
    }
}

/// Everything the child needs to `execve`, prepared before forking.
#[derive(Debug)]
pub struct LaunchPlan {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
}

impl LaunchPlan {
    /// `<shell> -l <script>` with the inherited environment plus terminal
    /// and color overrides. Bare shell names are resolved through `PATH`.
    pub fn for_script(
        shell: &str,
        script: &Path,
        default_term: &str,
    ) -> Result<Self, SessionError> {
        let program = which::which(shell).map_err(|source| SessionError::ShellNotFound {
            shell: shell.to_string(),
            source,
        })?;

        let argv = vec![
            c_string(shell.as_bytes(), "shell")?,
            c_string(b"-l", "shell")?,
            c_string(script.as_os_str().as_bytes(), "script path")?,
        ];
        let envp = child_environment(std::env::vars_os(), default_term)
            .into_iter()
            .map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                CString::new(entry).map_err(|_| SessionError::InteriorNul {
                    what: "environment",
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            program: c_string(program.as_os_str().as_bytes(), "shell")?,
            argv,
            envp,
        })
    }

    pub fn program(&self) -> &CStr {
        &self.program
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    pub fn envp(&self) -> &[CString] {
        &self.envp
    }
}

fn c_string(bytes: &[u8], what: &'static str) -> Result<CString, SessionError> {
    CString::new(bytes).map_err(|_| SessionError::InteriorNul { what })
}

/// The interpreter's environment: `vars` without the terminal and color
/// variables, then `TERM` (inherited if non-empty, else `default_term`) and
/// the forced color settings.
pub fn child_environment<I>(vars: I, default_term: &str) -> Vec<(OsString, OsString)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut inherited_term = None;
    let mut env: Vec<(OsString, OsString)> = vars
        .into_iter()
        .filter(|(key, value)| {
            if key == "TERM" {
                if !value.is_empty() {
                    inherited_term = Some(value.clone());
                }
                return false;
            }
            !FORCED_COLOR_ENV.iter().any(|(name, _)| key == *name)
        })
        .collect();

    let term = inherited_term.unwrap_or_else(|| OsString::from(default_term));
    env.push((OsString::from("TERM"), term));
    env.extend(
        FORCED_COLOR_ENV
            .iter()
            .map(|(key, value)| (OsString::from(key), OsString::from(value))),
    );
    env
}

/// Fork and exec `plan` with the slave of `pair` as its controlling terminal.
///
/// Returns the child and the master. The slave is closed in the parent; if
/// the fork fails both ends are closed.
pub fn spawn(pair: PtyPair, plan: &LaunchPlan) -> Result<(ChildProcess, OwnedFd), SessionError> {
    let argv = null_terminated(&plan.argv);
    let envp = null_terminated(&plan.envp);
    let PtyPair { master, slave, .. } = pair;

    // SAFETY: the child only makes async-signal-safe calls on data prepared
    // above before it execs or exits.
    match unsafe { fork() }.map_err(SessionError::Fork)? {
        ForkResult::Child => unsafe {
            exec_in_child(
                master.as_raw_fd(),
                slave.as_raw_fd(),
                plan.program.as_ptr(),
                &argv,
                &envp,
            )
        },
        ForkResult::Parent { child } => {
            drop(slave);
            log::debug!(
                "Spawned {} (pid {child})",
                OsStr::from_bytes(plan.program.as_bytes()).to_string_lossy()
            );
            Ok((
                ChildProcess {
                    pid: child,
                    state: ChildState::Running,
                },
                master,
            ))
        }
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

unsafe fn exec_in_child(
    master: RawFd,
    slave: RawFd,
    program: *const libc::c_char,
    argv: &[*const libc::c_char],
    envp: &[*const libc::c_char],
) -> ! {
    libc::close(master);

    if libc::setsid() < 0 || libc::ioctl(slave, libc::TIOCSCTTY as _, 0 as libc::c_int) < 0 {
        libc::_exit(EXEC_FAILED);
    }

    // The parent runtime ignores SIGPIPE and ignored dispositions survive exec.
    libc::signal(libc::SIGPIPE, libc::SIG_DFL);

    for target in 0..=2 {
        if libc::dup2(slave, target) < 0 {
            libc::_exit(EXEC_FAILED);
        }
    }
    if slave > 2 {
        libc::close(slave);
    }

    libc::execve(program, argv.as_ptr(), envp.as_ptr());
    libc::_exit(EXEC_FAILED)
}
