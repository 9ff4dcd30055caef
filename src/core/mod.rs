//! Core driver control functionality
//!
//! This module contains the types and logic for reconciling rule sets with
//! the netfilter driver. It provides:
//!
//! - [`rule`]: IPv4/IPv6 rule layouts shared with the driver
//! - [`projector`]: Conversion of caller input into typed rule batches
//! - [`driver`]: The control channel and its command codes
//! - [`reconcile`]: Create, delete and self-sync planning and application
//! - [`session`]: Device lifecycle and per-session locking
//! - [`error`]: Error types for driver operations

pub mod driver;
pub mod error;
pub mod projector;
pub mod reconcile;
pub mod rule;
pub mod session;

#[cfg(test)]
pub mod test_helpers;
