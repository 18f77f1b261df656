use anyhow::Result;
use std::path::PathBuf;

use crate::env_keys;

pub const SCRIPTTY_DIR_NAME: &str = ".scriptty";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const SCRIPT_FILE_NAME: &str = "scriptty-run.sh";

pub fn scriptty_home() -> Result<PathBuf> {
    if let Ok(override_home) = std::env::var(env_keys::HOME) {
        let trimmed = override_home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("No home directory found"))?
        .join(SCRIPTTY_DIR_NAME))
}

pub fn config_file() -> Result<PathBuf> {
    Ok(scriptty_home()?.join(CONFIG_FILE_NAME))
}

/// Fixed location the session writes its script to unless configured otherwise.
pub fn default_script_path() -> PathBuf {
    std::env::temp_dir().join(SCRIPT_FILE_NAME)
}
