//! Materializes script text as an executable file.

use std::fs::{self, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use super::SessionError;

const SCRIPT_MODE: u32 = 0o700;
const FAIL_FAST: &str = "set -e";

/// A script on disk. Removed by [`ScriptFile::remove`], or on drop if that
/// never happened.
#[derive(Debug)]
pub struct ScriptFile {
    path: PathBuf,
    removed: bool,
}

impl ScriptFile {
    /// Write `text` to `path` behind an interpreter line for `shell` and a
    /// fail-fast line, with owner-only permissions.
    ///
    /// Anything already at `path` is unlinked first and the file is created
    /// exclusively, so a stale file or planted symlink is never written
    /// through.
    pub fn materialize(path: &Path, shell: &str, text: &str) -> Result<Self, SessionError> {
        let contents = render(shell, text);
        let write_error = |source| SessionError::ScriptWrite {
            path: path.to_path_buf(),
            source,
        };

        match fs::remove_file(path) {
            Ok(()) => log::debug!("Replaced stale script at {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(write_error(e)),
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(SCRIPT_MODE)
            .open(path)
            .map_err(write_error)?;
        let script = Self {
            path: path.to_path_buf(),
            removed: false,
        };
        file.write_all(contents.as_bytes()).map_err(write_error)?;
        drop(file);

        // The creation mode is filtered through the umask; set it explicitly.
        fs::set_permissions(path, Permissions::from_mode(SCRIPT_MODE)).map_err(|source| {
            SessionError::ScriptPermissions {
                path: path.to_path_buf(),
                source,
            }
        })?;

        log::debug!("Materialized {} bytes at {}", contents.len(), path.display());
        Ok(script)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the file. A file that is already gone counts as removed.
    pub fn remove(mut self) -> io::Result<()> {
        self.removed = true;
        remove_if_present(&self.path)
    }
}

impl Drop for ScriptFile {
    fn drop(&mut self) {
        if !self.removed {
            if let Err(e) = remove_if_present(&self.path) {
                log::warn!("Failed to remove script {}: {e}", self.path.display());
            }
        }
    }
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// File contents for `text`: interpreter line, fail-fast line, then the text
/// verbatim, newline-terminated.
fn render(shell: &str, text: &str) -> String {
    let interpreter = if shell.starts_with('/') {
        format!("#!{shell}")
    } else {
        format!("#!/usr/bin/env {shell}")
    };

    let mut contents = format!("{interpreter}\n{FAIL_FAST}\n{text}");
    if !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents
}
