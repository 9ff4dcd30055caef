use crate::core::driver::DriverOp;
use crate::core::rule::Family;
use nix::errno::Errno;
use std::path::PathBuf;
use thiserror::Error;

/// Core error types for nfsync
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Input could not be projected onto the IPv4 or IPv6 rule layout
    #[error("Unsupported rule type: {0}")]
    UnsupportedRuleType(String),

    /// The driver rejected a control request
    #[error("Driver {op} request for {family} rules failed: {errno}")]
    Driver {
        op: DriverOp,
        family: Family,
        errno: Errno,
    },

    /// The device file could not be opened
    #[error("Cannot open device {}: {source}", path.display())]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn unsupported(message: impl Into<String>) -> Self {
        Error::UnsupportedRuleType(message.into())
    }

    /// Raw error code returned by the driver, if this is a driver failure.
    pub fn driver_code(&self) -> Option<i32> {
        match self {
            Error::Driver { errno, .. } => Some(*errno as i32),
            _ => None,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Maps driver error codes to user-facing explanations.
pub struct DriverErrorPattern;

impl DriverErrorPattern {
    /// Returns a translation for the error code a driver request failed with.
    pub fn match_errno(op: DriverOp, errno: Errno) -> ErrorTranslation {
        match errno {
            Errno::EACCES | Errno::EPERM => {
                ErrorTranslation::new("Insufficient permissions to talk to the netfilter driver")
                    .with_suggestion("Run nfsync as root")
                    .with_suggestion("Check the device node permissions: ls -l /dev/authon_netfilter")
                    .with_suggestion("Check if CAP_NET_ADMIN capability is available")
            }
            Errno::ENOENT if matches!(op, DriverOp::Delete) => {
                ErrorTranslation::new("The driver does not hold the rule being deleted")
                    .with_suggestion("Another process may have removed it concurrently")
                    .with_suggestion("List installed rules with: nfsync list --family <family>")
            }
            Errno::ENOENT | Errno::ENODEV | Errno::ENXIO => {
                ErrorTranslation::new("The netfilter driver is not loaded")
                    .with_suggestion("Check the kernel module: lsmod | grep authon")
                    .with_suggestion("Verify the configured device path exists")
            }
            Errno::ENOTTY | Errno::EINVAL => {
                ErrorTranslation::new(format!("The driver rejected the {op} command"))
                    .with_suggestion("The driver may not support this command code")
                    .with_suggestion("Check that the device path points at the netfilter driver")
                    .with_suggestion("Confirm the driver version matches this tool")
            }
            Errno::EEXIST => ErrorTranslation::new("The driver already holds this rule")
                .with_suggestion("Another process may have added it concurrently")
                .with_suggestion("Re-run the operation; existing rules are skipped"),
            Errno::EBUSY | Errno::EAGAIN => ErrorTranslation::new("The netfilter driver is busy")
                .with_suggestion("Another process may be modifying the rule set")
                .with_suggestion("Wait a moment and try again"),
            Errno::ENOMEM | Errno::ENOSPC => {
                ErrorTranslation::new("The driver has no room for more rules")
                    .with_suggestion("Remove unused rules first")
                    .with_suggestion("Check kernel memory pressure: free -m")
            }
            Errno::EFAULT => ErrorTranslation::new("The driver could not access the rule buffer")
                .with_suggestion("The rule layout may not match the driver version")
                .with_suggestion("The installed rule count may have changed mid-read; retry"),
            _ => ErrorTranslation::new(format!("Driver error during {op}: {errno}"))
                .with_suggestion("Check the kernel log for details: dmesg | tail"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
