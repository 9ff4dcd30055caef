//! Utility functions for directory management
//!
//! This module provides helper functions following the XDG Base Directory specification
//! for portable configuration and state storage across Linux distributions.
//!
//! # Directory Structure
//!
//! - Config: `~/.config/nfsync/` - `config.json` with the device path
//! - State: `~/.local/state/nfsync/` - Runtime state (audit log)

use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "nfsync", "nfsync")
}

pub fn get_config_dir() -> Option<PathBuf> {
    project_dirs().map(|pd| pd.config_dir().to_path_buf())
}

pub fn get_state_dir() -> Option<PathBuf> {
    project_dirs().and_then(|pd| pd.state_dir().map(std::path::Path::to_path_buf))
}

/// Default location of the config file, if a home directory is known.
pub fn default_config_path() -> Option<PathBuf> {
    get_config_dir().map(|dir| dir.join("config.json"))
}

pub fn ensure_dirs() -> std::io::Result<()> {
    use std::fs::DirBuilder;
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = DirBuilder::new();
    builder.mode(0o700); // User read/write/execute only
    builder.recursive(true);

    if let Some(dir) = get_config_dir() {
        builder.create(dir)?;
    }
    if let Some(dir) = get_state_dir() {
        builder.create(dir)?;
    }

    Ok(())
}
