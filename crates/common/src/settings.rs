//! User settings loaded from `config.toml` with environment overrides.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{env_keys, paths};

pub const DEFAULT_SHELL: &str = "/bin/bash";
pub const DEFAULT_TERM: &str = "xterm-256color";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_MODEL: &str = "qwen2.5-0.5b-instruct-fp16.gguf";
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a linux command assistant. For every request, \
reply with a bash script made of the shell commands that accomplish it, using recommended \
arguments and no explanation. The reply must be a working, executable bash file; double check \
every line for validity.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Interpreter used to run scripts, invoked as a login shell.
    pub shell: String,
    /// Where the script is materialized before it runs.
    pub script_path: PathBuf,
    /// Upper bound on a single readiness wait, in milliseconds.
    pub poll_interval_ms: u64,
    /// `TERM` given to the script when the caller has none.
    pub default_term: String,
    pub generator: GeneratorSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            shell: DEFAULT_SHELL.to_string(),
            script_path: paths::default_script_path(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            default_term: DEFAULT_TERM.to_string(),
            generator: GeneratorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorSettings {
    /// Argument vector of the generation command; supports `{prompt}`,
    /// `{system}`, `{chat}`, `{model}` and `{tokens}` placeholders.
    pub command: Vec<String>,
    pub system: String,
    /// Model name or file handed to the command as `{model}`.
    pub model: String,
    /// Response length limit handed to the command as `{tokens}`.
    pub max_tokens: u32,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl Settings {
    /// Load settings from `explicit`, or from the default config file when
    /// present, then apply environment overrides.
    ///
    /// A missing default config file yields defaults; a missing explicit one
    /// is an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = paths::config_file()?;
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    Self::default()
                }
            }
        };
        settings.apply_overrides_from(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("Failed to parse settings: {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize settings")
    }

    /// Apply `SCRIPTTY_*` overrides; `lookup` stands in for the process
    /// environment.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(shell) = non_empty(env_keys::SHELL) {
            self.shell = shell.trim().to_string();
        }
        if let Some(path) = non_empty(env_keys::SCRIPT_PATH) {
            self.script_path = PathBuf::from(path.trim());
        }
        if let Some(poll) = non_empty(env_keys::POLL_MS) {
            self.poll_interval_ms = poll
                .trim()
                .parse()
                .with_context(|| format!("{} must be a number of milliseconds", env_keys::POLL_MS))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.shell.trim().is_empty() {
            bail!("shell must not be empty");
        }
        if self.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }
        if self.script_path.as_os_str().is_empty() {
            bail!("script_path must not be empty");
        }
        if self.generator.max_tokens == 0 {
            bail!("generator.max_tokens must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}
