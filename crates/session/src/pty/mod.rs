//! Running a script as an interactive pseudo-terminal session.
//!
//! [`Session`] ties the pieces together: the script is written to disk, the
//! operator's terminal is captured and switched to raw mode, a pty sized to
//! the terminal is allocated, the interpreter is forked onto its slave, and
//! [`Multiplexer`] relays bytes until the interpreter exits.

mod console;
mod error;
pub(crate) mod fd;
mod multiplexer;
mod pair;
mod script;
mod session;
mod supervisor;
mod terminal;

pub use console::Console;
pub use error::SessionError;
pub use multiplexer::Multiplexer;
pub use pair::{PtyPair, WindowSize};
pub use script::ScriptFile;
pub use session::{Session, SessionOptions, SessionOutcome, SessionState};
pub use supervisor::{
    child_environment, spawn, ChildProcess, ChildState, LaunchPlan, EXEC_FAILED,
};
pub use terminal::{raw_attributes, TerminalGuard, TerminalSnapshot};
