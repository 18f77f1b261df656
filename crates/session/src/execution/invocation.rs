use super::cli::{Cli, LogLevel};
use super::generator::Generator;
use anyhow::{bail, Context, Result};
use clap::Parser;
use scriptty_common::{extract_script, Settings};
use std::fs;

pub fn run_cli() -> Result<i32> {
    run_with_cli(Cli::parse())
}

pub fn run_with_cli(cli: Cli) -> Result<i32> {
    init_logging(cli.log);

    let settings = resolve_settings(&cli)?;
    if cli.show_config {
        print!("{}", settings.to_toml_string()?);
        return Ok(0);
    }

    let text = source_text(&cli, &settings)?;
    let script = extract_script(&text);
    if script.trim().is_empty() {
        bail!("no script to run");
    }

    if cli.dry_run {
        print!("{script}");
        return Ok(0);
    }

    run_session(&settings, &script)
}

fn init_logging(level: LogLevel) {
    let env = env_logger::Env::default().default_filter_or(level.as_filter());
    // A second initialisation (tests driving several invocations) is harmless.
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .try_init();
}

/// Settings file, then `SCRIPTTY_*` environment, then command-line flags.
pub fn resolve_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;

    if let Some(shell) = &cli.shell {
        settings.shell = shell.clone();
    }
    if let Some(path) = &cli.script_path {
        settings.script_path = path.clone();
    }
    if let Some(poll_ms) = cli.poll_ms {
        settings.poll_interval_ms = poll_ms;
    }
    if let Some(system) = &cli.system {
        settings.generator.system = system.clone();
    }
    if let Some(model) = &cli.model {
        settings.generator.model = model.clone();
    }
    if let Some(tokens) = cli.tokens {
        settings.generator.max_tokens = tokens;
    }

    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

fn source_text(cli: &Cli, settings: &Settings) -> Result<String> {
    if let Some(prompt) = &cli.prompt {
        return Generator::from_settings(&settings.generator)
            .generate(prompt, &settings.generator.system)
            .context("Failed to generate a script");
    }
    if let Some(command) = &cli.command {
        return Ok(command.clone());
    }
    if let Some(path) = &cli.script {
        return fs::read_to_string(path)
            .with_context(|| format!("Failed to read script: {}", path.display()));
    }
    bail!("one of --prompt, --command or --file is required")
}

#[cfg(unix)]
fn run_session(settings: &Settings, script: &str) -> Result<i32> {
    use crate::pty::{Session, SessionOptions};

    let mut session = Session::new(SessionOptions::from_settings(settings));
    let outcome = session.run(script).context("Script session failed")?;
    log::debug!("Session finished: {:?}", outcome.child_state());

    if outcome.success() {
        Ok(0)
    } else {
        Ok(outcome.exit_code().unwrap_or(1))
    }
}

#[cfg(not(unix))]
fn run_session(_settings: &Settings, _script: &str) -> Result<i32> {
    bail!("interactive script sessions require a Unix terminal")
}
