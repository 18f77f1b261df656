use clap::{ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, ValueEnum, PartialEq, Eq)]
#[value(rename_all = "kebab-case")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Off => "off",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "scriptty")]
#[command(version, about = "Run a shell script as an interactive terminal session", long_about = None)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["prompt", "command", "script", "show_config"])
))]
pub struct Cli {
    /// Generate a script from a natural-language request and run it
    #[arg(short = 'p', long = "prompt", value_name = "TEXT")]
    pub prompt: Option<String>,

    /// Run the given script text
    #[arg(short = 'c', long = "command", value_name = "SCRIPT")]
    pub command: Option<String>,

    /// Read the script from a file
    #[arg(short = 'f', long = "file", value_name = "PATH")]
    pub script: Option<PathBuf>,

    /// System instruction passed to the generator
    #[arg(short = 's', long = "system", value_name = "TEXT")]
    pub system: Option<String>,

    /// Model passed to the generator as `{model}`
    #[arg(short = 'm', long = "model", value_name = "NAME")]
    pub model: Option<String>,

    /// Response length limit passed to the generator as `{tokens}`
    #[arg(short = 't', long = "tokens", value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    pub tokens: Option<u32>,

    /// Interpreter for the script, started as a login shell
    #[arg(long = "shell", value_name = "PATH")]
    pub shell: Option<String>,

    /// Where to write the script before running it
    #[arg(long = "script-path", value_name = "PATH")]
    pub script_path: Option<PathBuf>,

    /// Upper bound on each readiness wait, in milliseconds
    #[arg(long = "poll-ms", value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_ms: Option<u64>,

    /// Settings file (defaults to $SCRIPTTY_HOME/config.toml)
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the extracted script instead of running it
    #[arg(long = "dry-run")]
    pub dry_run: bool,

    /// Print the effective settings as TOML and exit
    #[arg(long = "show-config")]
    pub show_config: bool,

    /// Log level; RUST_LOG takes precedence when set
    #[arg(short = 'l', long = "log", value_name = "LEVEL", value_enum, default_value_t = LogLevel::Warn)]
    pub log: LogLevel,
}
