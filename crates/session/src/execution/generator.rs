//! Client for the external command that turns a request into script text.

use anyhow::{bail, Context, Result};
use std::process::{Command, Stdio};

use scriptty_common::GeneratorSettings;

/// Runs a configured command with `{prompt}`, `{system}`, `{chat}`,
/// `{model}` and `{tokens}` substituted into its arguments and returns what
/// it prints.
#[derive(Debug, Clone)]
pub struct Generator {
    command: Vec<String>,
    model: String,
    max_tokens: u32,
}

impl Generator {
    /// A generator running `command` with the default model and token limit.
    pub fn new(command: Vec<String>) -> Self {
        Self::from_settings(&GeneratorSettings {
            command,
            ..GeneratorSettings::default()
        })
    }

    pub fn from_settings(settings: &GeneratorSettings) -> Self {
        Self {
            command: settings.command.clone(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
        }
    }

    pub fn generate(&self, prompt: &str, system: &str) -> Result<String> {
        if self.command.is_empty() {
            bail!("no generator configured; set `command` under [generator] in the settings file");
        }

        let chat = chat_prompt(prompt, system);
        let tokens = self.max_tokens.to_string();
        let placeholders = [
            ("{prompt}", prompt),
            ("{system}", system),
            ("{chat}", chat.as_str()),
            ("{model}", self.model.as_str()),
            ("{tokens}", tokens.as_str()),
        ];
        let argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| expand(arg, &placeholders))
            .collect();
        let (program, args) = argv
            .split_first()
            .context("generator command is empty")?;

        log::info!("Generating script with `{program}`");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stderr(Stdio::inherit())
            .output()
            .with_context(|| format!("Failed to run generator `{program}`"))?;

        if !output.status.success() {
            bail!("Generator `{program}` failed with {}", output.status);
        }
        String::from_utf8(output.stdout).context("Generator output is not valid UTF-8")
    }
}

/// ChatML framing of a system instruction and a user request, left open for
/// the assistant's turn.
pub fn chat_prompt(prompt: &str, system: &str) -> String {
    format!(
        "<|im_start|>system {system}<|im_end|><|im_start|>user {prompt}<|im_end|><|im_start|>assistant"
    )
}

/// Substitute placeholders in one pass; substituted text is never rescanned.
fn expand(template: &str, placeholders: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match placeholders
            .iter()
            .find(|(name, _)| tail.starts_with(name))
        {
            Some((name, value)) => {
                out.push_str(value);
                rest = &tail[name.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}
