mod cli;
mod generator;
mod invocation;

pub use cli::*;
pub use generator::{chat_prompt, Generator};
pub use invocation::{resolve_settings, run_cli, run_with_cli};
