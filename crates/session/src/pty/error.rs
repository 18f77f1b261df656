use std::io;
use std::path::PathBuf;

/// Failures that abort a session before or around the script run.
///
/// Everything except [`SessionError::Wait`] happens before the child starts,
/// so no part of the script has executed.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to write script to {}", .path.display())]
    ScriptWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to restrict permissions on {}", .path.display())]
    ScriptPermissions {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read terminal attributes; stdin must be a terminal")]
    TerminalAttributes(#[source] nix::Error),

    #[error("failed to switch the terminal to raw mode")]
    RawMode(#[source] nix::Error),

    #[error("failed to restore terminal attributes")]
    RestoreTerminal(#[source] nix::Error),

    #[error("failed to update descriptor flags")]
    DescriptorFlags(#[source] io::Error),

    #[error("failed to query the terminal window size")]
    WindowSize(#[source] io::Error),

    #[error("failed to allocate a pseudo-terminal")]
    PtyAllocation(#[source] nix::Error),

    #[error("interpreter `{shell}` not found")]
    ShellNotFound {
        shell: String,
        #[source]
        source: which::Error,
    },

    #[error("{what} contains an interior NUL byte")]
    InteriorNul { what: &'static str },

    #[error("failed to fork the interpreter")]
    Fork(#[source] nix::Error),

    #[error("failed to wait for child {pid}")]
    Wait {
        pid: i32,
        #[source]
        source: nix::Error,
    },
}
