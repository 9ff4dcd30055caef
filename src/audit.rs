//! Audit logging for driver mutations
//!
//! This module provides structured logging of every create, delete and
//! self-sync run against the driver, successful or not.

use crate::core::reconcile::{Operation, Summary};
use crate::core::rule::Family;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// Operation that was run
    pub event_type: Operation,

    /// Whether the operation succeeded
    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: Operation,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates an audit log in the state directory
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    pub fn at(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(line.as_bytes())?;
        file.sync_all()
    }

    /// Reads the most recent events from the log, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = std::fs::read_to_string(&self.log_path)?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }
}

/// Builds the event for one finished operation.
pub fn operation_event(
    operation: Operation,
    family: Family,
    requested: usize,
    outcome: Result<&Summary, &crate::Error>,
) -> AuditEvent {
    match outcome {
        Ok(summary) => AuditEvent::new(
            operation,
            true,
            serde_json::json!({
                "family": family,
                "requested": requested,
                "installed_before": summary.installed_before,
                "added": summary.added,
                "deleted": summary.deleted,
            }),
            None,
        ),
        Err(e) => AuditEvent::new(
            operation,
            false,
            serde_json::json!({
                "family": family,
                "requested": requested,
                "driver_code": e.driver_code(),
            }),
            Some(e.to_string()),
        ),
    }
}

/// Logs a finished operation to the default audit log
///
/// Failures to write are reported as warnings and otherwise ignored.
pub fn log_operation(
    operation: Operation,
    family: Family,
    requested: usize,
    outcome: Result<&Summary, &crate::Error>,
) {
    let event = operation_event(operation, family, requested, outcome);
    match AuditLog::new() {
        Ok(audit) => {
            if let Err(e) = audit.log(&event) {
                tracing::warn!("Failed to write audit log: {}", e);
            }
        }
        Err(e) => tracing::warn!("Audit log unavailable: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::driver::DriverOp;
    use nix::errno::Errno;

    fn summary() -> Summary {
        Summary {
            operation: Operation::Create,
            family: Family::Ipv4,
            installed_before: 2,
            added: 1,
            deleted: 0,
        }
    }

    #[test]
    fn test_success_event() {
        let event = operation_event(Operation::Create, Family::Ipv4, 2, Ok(&summary()));

        assert!(event.success);
        assert!(event.error.is_none());
        assert_eq!(event.details["added"], 1);
        assert_eq!(event.details["family"], "ipv4");
    }

    #[test]
    fn test_failure_event_carries_driver_code() {
        let err = crate::Error::Driver {
            op: DriverOp::Delete,
            family: Family::Ipv6,
            errno: Errno::EBUSY,
        };
        let event = operation_event(Operation::SelfSync, Family::Ipv6, 0, Err(&err));

        assert!(!event.success);
        assert_eq!(event.details["driver_code"], nix::libc::EBUSY);
        assert!(event.error.unwrap().contains("EBUSY"));
    }

    #[test]
    fn test_event_serialization() {
        let event = operation_event(Operation::SelfSync, Family::Ipv4, 0, Ok(&summary()));
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("self_sync"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"timestamp":"2024-01-01T00:00:00Z","event_type":"delete","success":true,"details":{},"error":null}"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();

        assert!(event.success);
        assert!(matches!(event.event_type, Operation::Delete));
    }

    #[test]
    fn test_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::at(dir.path().join("audit.log"));

        audit
            .log(&operation_event(Operation::Create, Family::Ipv4, 2, Ok(&summary())))
            .unwrap();
        audit
            .log(&operation_event(Operation::Delete, Family::Ipv4, 1, Ok(&summary())))
            .unwrap();

        let recent = audit.read_recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(matches!(recent[0].event_type, Operation::Delete));
    }
}
