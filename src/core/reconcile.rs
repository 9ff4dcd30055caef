//! Reconciliation of a desired rule set against the driver's installed set
//!
//! The driver is the system of record. Each operation reads the installed
//! rules of one family, computes which driver calls are needed, and issues
//! them one by one:
//!
//! - [`Operation::Create`]: add every desired rule that is not installed.
//!   When nothing is installed, every desired rule is added without a read.
//! - [`Operation::Delete`]: delete every desired rule that is installed.
//!   Absent rules are skipped.
//! - [`Operation::SelfSync`]: delete every installed rule that is not
//!   desired. Missing desired rules are *not* added; an empty desired set
//!   drains the family.
//!
//! Delete and self-sync stop after the count when it is zero, so a
//! zero-length read is never issued.
//!
//! # Failure model
//!
//! Nothing is retried and nothing is rolled back. The first failing driver
//! call aborts the operation and its error is returned; changes already made
//! stay in place. A warning is logged when that happens after partial
//! progress.
//!
//! # Races
//!
//! The count, the read and the mutations are separate driver calls. Another
//! process changing the same driver between them can make the read stale:
//! the buffer may hold fewer live rules than the count promised, or a rule
//! may vanish before its delete. Such changes surface as driver errors or as
//! unnecessary calls; they are not detected here.

use crate::core::driver::Driver;
use crate::core::error::{Error, Result};
use crate::core::rule::{DriverRule, Family};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};

/// A public reconciliation operation
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Create,
    Delete,
    SelfSync,
}

/// Driver calls an operation will make, in the order it makes them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan<R> {
    pub operation: Operation,
    /// Installed rule count reported by the driver before planning.
    pub installed: u32,
    pub add: Vec<R>,
    pub delete: Vec<R>,
}

impl<R: DriverRule> Plan<R> {
    fn new(operation: Operation, installed: u32) -> Self {
        Self {
            operation,
            installed,
            add: Vec::new(),
            delete: Vec::new(),
        }
    }
}

/// Outcome of a completed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub operation: Operation,
    pub family: Family,
    pub installed_before: u32,
    pub added: usize,
    pub deleted: usize,
}

/// Reads `count` installed rules into a freshly allocated buffer.
///
/// `count` must be non-zero.
pub fn read_installed<R: DriverRule, D: Driver>(driver: &mut D, count: u32) -> Result<Vec<R>> {
    debug_assert!(count > 0, "zero-length lookup");
    let mut installed = vec![R::default(); count as usize];
    driver.lookup(&mut installed)?;
    debug!("Read {} installed {} rules", installed.len(), R::FAMILY);
    Ok(installed)
}

/// Desired rules with no equal rule in `installed`, in desired order.
pub fn missing<R: DriverRule>(desired: &[R], installed: &[R]) -> Vec<R> {
    let index: HashSet<R::Key> = installed.iter().map(DriverRule::key).collect();
    desired
        .iter()
        .filter(|rule| !index.contains(&rule.key()))
        .copied()
        .collect()
}

/// Desired rules that are installed, each repeated once per installed copy.
pub fn present<R: DriverRule>(desired: &[R], installed: &[R]) -> Vec<R> {
    let mut copies: HashMap<R::Key, usize> = HashMap::new();
    for rule in installed {
        *copies.entry(rule.key()).or_default() += 1;
    }
    desired
        .iter()
        .flat_map(|rule| {
            let n = copies.get(&rule.key()).copied().unwrap_or(0);
            std::iter::repeat_n(*rule, n)
        })
        .collect()
}

/// Installed rules with no equal rule in `desired`, in installed order.
pub fn extraneous<R: DriverRule>(desired: &[R], installed: &[R]) -> Vec<R> {
    missing(installed, desired)
}

/// Computes the driver calls `operation` needs, without mutating anything.
///
/// Issues the count and, if anything is installed, one lookup.
pub fn plan<R: DriverRule, D: Driver>(
    driver: &mut D,
    operation: Operation,
    desired: &[R],
) -> Result<Plan<R>> {
    let count = driver.rule_count(R::FAMILY)?;
    debug!("Driver reports {count} installed {} rules", R::FAMILY);

    let mut plan = Plan::new(operation, count);
    if count == 0 {
        if operation == Operation::Create {
            plan.add = desired.to_vec();
        }
        return Ok(plan);
    }

    let installed = read_installed(driver, count)?;
    match operation {
        Operation::Create => plan.add = missing(desired, &installed),
        Operation::Delete => plan.delete = present(desired, &installed),
        Operation::SelfSync => plan.delete = extraneous(desired, &installed),
    }
    debug!(
        "Planned {operation} for {}: {} to add, {} to delete",
        R::FAMILY,
        plan.add.len(),
        plan.delete.len()
    );
    Ok(plan)
}

fn log_abort(plan_op: Operation, family: Family, done: usize, total: usize, err: &Error) {
    if done > 0 {
        warn!(
            "{plan_op} on {family} rules aborted after {done} of {total} changes; \
             applied changes were not rolled back: {err}"
        );
    }
}

/// Issues the calls in `plan`, stopping at the first failure.
pub fn apply<R: DriverRule, D: Driver>(driver: &mut D, plan: &Plan<R>) -> Result<Summary> {
    let family = R::FAMILY;
    let total = plan.add.len() + plan.delete.len();
    let mut done = 0;

    for rule in &plan.add {
        driver
            .add(rule)
            .inspect_err(|e| log_abort(plan.operation, family, done, total, e))?;
        info!("Added {family} rule {rule}");
        done += 1;
    }

    for rule in &plan.delete {
        driver
            .delete(rule)
            .inspect_err(|e| log_abort(plan.operation, family, done, total, e))?;
        info!("Deleted {family} rule {rule}");
        done += 1;
    }

    Ok(Summary {
        operation: plan.operation,
        family,
        installed_before: plan.installed,
        added: plan.add.len(),
        deleted: plan.delete.len(),
    })
}

/// Plans and applies `operation` for `desired`.
pub fn reconcile<R: DriverRule, D: Driver>(
    driver: &mut D,
    operation: Operation,
    desired: &[R],
) -> Result<Summary> {
    let plan = plan(driver, operation, desired)?;
    apply(driver, &plan)
}
