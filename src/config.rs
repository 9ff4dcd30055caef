use crate::core::error::{Error, Result};
use crate::utils::default_config_path;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Device path used when nothing else is configured
pub const DEFAULT_DEVICE_PATH: &str = "/dev/authon_netfilter";

/// Environment variable overriding the configured device path
pub const DEVICE_ENV_VAR: &str = "NFSYNC_DEVICE";

/// Settings for opening the driver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Options {
    /// Path of the netfilter character device
    #[serde(default = "default_path")]
    pub path: PathBuf,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            path: default_path(),
        }
    }
}

fn default_path() -> PathBuf {
    PathBuf::from(DEFAULT_DEVICE_PATH)
}

impl fmt::Display for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

impl Options {
    /// Replaces the device path with a non-empty environment override.
    pub fn with_env_override(mut self, value: Option<String>) -> Self {
        if let Some(path) = value.filter(|v| !v.is_empty()) {
            debug!("Device path overridden by {DEVICE_ENV_VAR}: {path}");
            self.path = PathBuf::from(path);
        }
        self
    }
}

/// Reads options from a JSON file.
///
/// # Errors
///
/// Returns `Err` if the file cannot be read or parsed.
pub fn read_options(path: &Path) -> Result<Options> {
    let json = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&json)?)
}

/// Resolves the effective options.
///
/// An explicit config file must exist and parse. Otherwise the user config
/// file is used if present and valid, falling back to defaults. The
/// `NFSYNC_DEVICE` environment variable is applied last.
///
/// # Errors
///
/// Returns `Err` only for an explicit config file that cannot be loaded.
pub fn load_options(explicit: Option<&Path>) -> Result<Options> {
    let options = match explicit {
        Some(path) => read_options(path)?,
        None => default_config_path()
            .filter(|path| path.exists())
            .and_then(|path| match read_options(&path) {
                Ok(options) => Some(options),
                Err(e) => {
                    warn!("Ignoring unreadable config {}: {e}", path.display());
                    None
                }
            })
            .unwrap_or_default(),
    };
    Ok(options.with_env_override(std::env::var(DEVICE_ENV_VAR).ok()))
}

/// Saves options to `path` using an atomic write pattern.
/// 1. Writes to a temporary file created with mode 0o600.
/// 2. Flushes it to disk.
/// 3. Atomically renames it to the target path.
///
/// # Errors
///
/// Returns `Err` if the file cannot be written or renamed.
pub fn save_options(options: &Options, path: &Path) -> Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let json = serde_json::to_string_pretty(options)?;
    let temp_path = path.with_extension("json.tmp");

    // Create file with restrictive permissions from the start
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;

    std::fs::rename(&temp_path, path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::StorageFull {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::StorageFull,
                "Disk full: cannot save configuration. Free up space and try again.",
            ))
        } else {
            Error::Io(e)
        }
    })
}
