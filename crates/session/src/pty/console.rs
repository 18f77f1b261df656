use std::os::fd::BorrowedFd;

/// The operator's side of a session: keystrokes are read from `input` and
/// script output is written to `output`. `input` is also the terminal whose
/// attributes and window size the session tracks.
#[derive(Debug, Clone, Copy)]
pub struct Console<'fd> {
    pub input: BorrowedFd<'fd>,
    pub output: BorrowedFd<'fd>,
}

impl<'fd> Console<'fd> {
    pub fn new(input: BorrowedFd<'fd>, output: BorrowedFd<'fd>) -> Self {
        Self { input, output }
    }
}

impl Console<'static> {
    /// The process's own stdin and stdout.
    pub fn stdio() -> Self {
        // SAFETY: the standard descriptors stay open for the life of the process.
        unsafe {
            Self {
                input: BorrowedFd::borrow_raw(libc::STDIN_FILENO),
                output: BorrowedFd::borrow_raw(libc::STDOUT_FILENO),
            }
        }
    }
}
