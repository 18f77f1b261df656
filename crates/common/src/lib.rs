//! Shared utilities for scriptty components

pub mod fences;
pub mod paths;
pub mod settings;

pub use fences::extract_script;
pub use settings::{GeneratorSettings, Settings};

/// Environment variables that override values from the settings file.
pub mod env_keys {
    pub const HOME: &str = "SCRIPTTY_HOME";
    pub const SHELL: &str = "SCRIPTTY_SHELL";
    pub const SCRIPT_PATH: &str = "SCRIPTTY_SCRIPT_PATH";
    pub const POLL_MS: &str = "SCRIPTTY_POLL_MS";
}
