//! Interactive script sessions for scriptty.
//!
//! [`pty`] runs script text on a pseudo-terminal wired to the caller's
//! terminal; [`execution`] is the command-line front end that resolves
//! settings, obtains the script, and hands it to a session.

pub mod execution;
#[cfg(unix)]
pub mod pty;

pub use execution::{run_cli, run_with_cli, Cli, Generator, LogLevel};
#[cfg(unix)]
pub use pty::{Session, SessionError, SessionOptions, SessionOutcome, SessionState};
