//! nfsync - netfilter driver rule reconciliation
//!
//! Keeps the rule tables of the authon netfilter character device in line
//! with a caller's desired IPv4/IPv6 rule set.
//!
//! # Architecture
//!
//! - [`core`] - Rule layouts, projection, driver channel, reconciliation engine
//! - [`audit`] - Audit logging for every driver mutation
//! - [`config`] - Device path configuration
//! - [`utils`] - Utility functions (XDG directories)
//!
//! # Operations
//!
//! - **create**: add desired rules that are not installed yet
//! - **delete**: remove desired rules that are installed
//! - **self-sync**: remove installed rules that are not desired (never adds)
//!
//! Each operation reads the driver's installed rules first; the driver is
//! the only source of truth. Operations are not transactional: the first
//! failing driver call aborts the operation and earlier changes stay.

#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod utils;

// Re-export commonly used types
pub use core::error::{Error, Result};
pub use core::projector::{RuleBatch, RuleRecord};
pub use core::reconcile::{Operation, Summary};
pub use core::rule::{Family, Rule4, Rule6};
pub use core::session::Session;
