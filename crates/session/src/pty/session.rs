//! Sequencing a whole script run and guaranteeing teardown.

use std::io::{self, Write};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use scriptty_common::Settings;

use super::{
    supervisor, ChildState, Console, LaunchPlan, Multiplexer, PtyPair, ScriptFile, SessionError,
    TerminalGuard,
};

/// Phases of a session, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Materializing,
    Capturing,
    Allocating,
    Spawning,
    Running,
    Restoring,
    Cleaning,
    Done { success: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub shell: String,
    pub script_path: PathBuf,
    pub poll_interval: Duration,
    pub default_term: String,
}

impl SessionOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            shell: settings.shell.clone(),
            script_path: settings.script_path.clone(),
            poll_interval: settings.poll_interval(),
            default_term: settings.default_term.clone(),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// How the script's interpreter ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    child: ChildState,
}

impl SessionOutcome {
    /// True only when the interpreter exited with status 0.
    pub fn success(&self) -> bool {
        self.child.success()
    }

    pub fn child_state(&self) -> ChildState {
        self.child
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.child.exit_code()
    }
}

/// Runs one script as an interactive session on the operator's terminal.
///
/// Whatever happens after the terminal is captured, its attributes and
/// descriptor flags are restored before `run` returns, and the script file
/// never outlives the call.
#[derive(Debug)]
pub struct Session {
    options: SessionOptions,
    states: Vec<SessionState>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            states: Vec::new(),
        }
    }

    /// States entered by the most recent run.
    pub fn states(&self) -> &[SessionState] {
        &self.states
    }

    /// Run `text` on this process's stdin and stdout.
    pub fn run(&mut self, text: &str) -> Result<SessionOutcome, SessionError> {
        // Anything still buffered must land before the raw relay starts.
        if let Err(e) = io::stdout().flush() {
            log::warn!("Failed to flush stdout before the session: {e}");
        }
        self.run_on(Console::stdio(), text)
    }

    pub fn run_on(
        &mut self,
        console: Console<'_>,
        text: &str,
    ) -> Result<SessionOutcome, SessionError> {
        self.states.clear();

        self.enter(SessionState::Materializing);
        let script =
            match ScriptFile::materialize(&self.options.script_path, &self.options.shell, text) {
                Ok(script) => script,
                Err(e) => return Err(self.abort(None, e)),
            };

        self.enter(SessionState::Capturing);
        let mut terminal = match TerminalGuard::capture(console.input) {
            Ok(terminal) => terminal,
            Err(e) => return Err(self.abort(Some(script), e)),
        };

        let result = self.attach(console, &mut terminal, script.path());

        self.enter(SessionState::Restoring);
        if let Err(e) = terminal.restore() {
            log::warn!("{e}");
        }

        self.enter(SessionState::Cleaning);
        clean(script);

        let success = matches!(&result, Ok(state) if state.success());
        self.enter(SessionState::Done { success });
        result.map(|child| SessionOutcome { child })
    }

    fn attach(
        &mut self,
        console: Console<'_>,
        terminal: &mut TerminalGuard<'_>,
        script: &Path,
    ) -> Result<ChildState, SessionError> {
        terminal.enter_raw()?;
        terminal.set_nonblocking()?;

        self.enter(SessionState::Allocating);
        let pair = PtyPair::allocate(console.input)?;
        let size = pair.size;

        self.enter(SessionState::Spawning);
        let plan = LaunchPlan::for_script(&self.options.shell, script, &self.options.default_term)?;
        let (mut child, master) = supervisor::spawn(pair, &plan)?;

        self.enter(SessionState::Running);
        Multiplexer::new(console, master.as_fd(), self.options.poll_interval, size).run(&mut child)
    }

    /// Teardown for failures before the terminal was captured.
    fn abort(&mut self, script: Option<ScriptFile>, error: SessionError) -> SessionError {
        self.enter(SessionState::Cleaning);
        if let Some(script) = script {
            clean(script);
        }
        self.enter(SessionState::Done { success: false });
        error
    }

    fn enter(&mut self, state: SessionState) {
        log::debug!("Session state -> {state:?}");
        self.states.push(state);
    }
}

fn clean(script: ScriptFile) {
    let path = script.path().to_path_buf();
    if let Err(e) = script.remove() {
        log::warn!("Failed to remove script {}: {e}", path.display());
    }
}
