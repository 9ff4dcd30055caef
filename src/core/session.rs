//! Session: one driver channel plus the lock that serializes its use
//!
//! A [`Session`] owns exactly one open descriptor. Every public operation
//! projects its input, then holds the session lock for the whole
//! count → read → compare → mutate sequence, so two operations on the same
//! session never interleave. Nothing is cached between calls; each operation
//! starts from a fresh read of the driver.
//!
//! The lock does not extend beyond the session: other sessions or other
//! processes talking to the same device are not serialized against it.
//!
//! # Example
//!
//! ```no_run
//! use nfsync::config::Options;
//! use nfsync::core::rule::Rule4;
//! use nfsync::core::session::Session;
//! use std::net::Ipv4Addr;
//!
//! # fn example() -> nfsync::Result<()> {
//! let session = Session::open(&Options::default())?;
//! let any = Ipv4Addr::UNSPECIFIED;
//! session.create(vec![Rule4::new(any, 0, any, 1897, 6)])?;
//! session.close();
//! # Ok(())
//! # }
//! ```

use crate::config::Options;
use crate::core::driver::{DeviceChannel, Driver};
use crate::core::error::Result;
use crate::core::projector::{IntoRuleBatch, RuleBatch};
use crate::core::reconcile::{self, Operation, Plan, Summary};
use crate::core::rule::{DriverRule, Family};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Rules an operation would add or delete, computed without mutating
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Changes {
    pub operation: Operation,
    pub family: Family,
    pub installed: u32,
    pub add: RuleBatch,
    pub delete: RuleBatch,
}

impl<R: DriverRule> From<Plan<R>> for Changes
where
    RuleBatch: From<Vec<R>>,
{
    fn from(plan: Plan<R>) -> Self {
        Self {
            operation: plan.operation,
            family: R::FAMILY,
            installed: plan.installed,
            add: plan.add.into(),
            delete: plan.delete.into(),
        }
    }
}

/// A driver channel with its exclusive operation lock
pub struct Session<D: Driver = DeviceChannel> {
    driver: Mutex<D>,
}

impl Session<DeviceChannel> {
    /// Opens the configured device.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Open`] if the device cannot be opened.
    pub fn open(options: &Options) -> Result<Self> {
        let channel = DeviceChannel::open(&options.path)?;
        Ok(Self::with_driver(channel))
    }

    /// Releases the descriptor.
    ///
    /// A failed close is logged; it does not affect operations that already
    /// completed.
    pub fn close(self) {
        let channel = self.into_driver();
        let path = channel.path().to_path_buf();
        match channel.close() {
            Ok(()) => debug!("Closed netfilter device {}", path.display()),
            Err(e) => warn!("Failed to close netfilter device {}: {e}", path.display()),
        }
    }
}

impl<D: Driver> Session<D> {
    pub fn with_driver(driver: D) -> Self {
        Self {
            driver: Mutex::new(driver),
        }
    }

    pub fn into_driver(self) -> D {
        self.driver
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // The driver, not this process, holds the rule state, so a poisoned lock
    // leaves nothing inconsistent behind.
    fn lock(&self) -> MutexGuard<'_, D> {
        self.driver.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds every rule not already installed.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the input cannot be projected or a driver call fails.
    pub fn create(&self, rules: impl IntoRuleBatch) -> Result<Summary> {
        self.run(Operation::Create, rules)
    }

    /// Deletes every given rule that is installed.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the input cannot be projected or a driver call fails.
    pub fn delete(&self, rules: impl IntoRuleBatch) -> Result<Summary> {
        self.run(Operation::Delete, rules)
    }

    /// Deletes every installed rule of the input's family that is not in
    /// `rules`. Never adds. An empty batch removes all rules of its family.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the input cannot be projected or a driver call fails.
    pub fn self_sync(&self, rules: impl IntoRuleBatch) -> Result<Summary> {
        self.run(Operation::SelfSync, rules)
    }

    /// Runs `operation` for `rules`.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the input cannot be projected or a driver call fails.
    pub fn run(&self, operation: Operation, rules: impl IntoRuleBatch) -> Result<Summary> {
        let batch = rules.into_rule_batch()?;
        let mut driver = self.lock();
        match &batch {
            RuleBatch::Ipv4(rules) => reconcile::reconcile(&mut *driver, operation, rules),
            RuleBatch::Ipv6(rules) => reconcile::reconcile(&mut *driver, operation, rules),
        }
    }

    /// Computes what `operation` would change, reading but not mutating.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the input cannot be projected or a driver call fails.
    pub fn plan(&self, operation: Operation, rules: impl IntoRuleBatch) -> Result<Changes> {
        let batch = rules.into_rule_batch()?;
        let mut driver = self.lock();
        match &batch {
            RuleBatch::Ipv4(rules) => {
                reconcile::plan(&mut *driver, operation, rules).map(Changes::from)
            }
            RuleBatch::Ipv6(rules) => {
                reconcile::plan(&mut *driver, operation, rules).map(Changes::from)
            }
        }
    }

    /// Returns the rules of `family` currently installed.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a driver call fails.
    pub fn installed(&self, family: Family) -> Result<RuleBatch> {
        let mut driver = self.lock();
        let count = driver.rule_count(family)?;
        if count == 0 {
            return Ok(RuleBatch::empty(family));
        }
        Ok(match family {
            Family::Ipv4 => RuleBatch::Ipv4(reconcile::read_installed(&mut *driver, count)?),
            Family::Ipv6 => RuleBatch::Ipv6(reconcile::read_installed(&mut *driver, count)?),
        })
    }
}
