//! Shared test utilities for core module tests
//!
//! Provides an in-memory stand-in for the netfilter driver. This module is
//! only compiled in test mode.

use crate::core::driver::{Driver, DriverOp};
use crate::core::error::{Error, Result};
use crate::core::rule::{DriverRule, Family, Rule4, Rule6};
use nix::errno::Errno;
use std::any::Any;
use std::net::{Ipv4Addr, Ipv6Addr};

/// One recorded driver call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Call {
    pub op: DriverOp,
    pub family: Family,
}

/// In-memory driver holding both rule tables.
///
/// Add appends (duplicates allowed), Delete removes the first equal rule or
/// fails with `ENOENT`, Lookup copies as many rules as fit.
#[derive(Debug, Default)]
pub struct MemoryDriver {
    pub v4: Vec<Rule4>,
    pub v6: Vec<Rule6>,
    pub calls: Vec<Call>,
    /// Fail the nth (0-based) call of this operation with this errno.
    pub fail: Option<(DriverOp, usize, Errno)>,
}

impl MemoryDriver {
    pub fn with_v4(rules: &[Rule4]) -> Self {
        Self {
            v4: rules.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_v6(rules: &[Rule6]) -> Self {
        Self {
            v6: rules.to_vec(),
            ..Self::default()
        }
    }

    pub fn failing(mut self, op: DriverOp, nth: usize, errno: Errno) -> Self {
        self.fail = Some((op, nth, errno));
        self
    }

    pub fn count_calls(&self, op: DriverOp) -> usize {
        self.calls.iter().filter(|c| c.op == op).count()
    }

    pub fn touched(&self, family: Family) -> bool {
        self.calls.iter().any(|c| c.family == family)
    }

    fn record(&mut self, op: DriverOp, family: Family) -> Result<()> {
        let nth = self.count_calls(op);
        self.calls.push(Call { op, family });
        match self.fail {
            Some((fail_op, fail_nth, errno)) if fail_op == op && fail_nth == nth => {
                Err(Error::Driver { op, family, errno })
            }
            _ => Ok(()),
        }
    }

    fn table<R: DriverRule>(&mut self) -> &mut Vec<R> {
        let table: &mut dyn Any = match R::FAMILY {
            Family::Ipv4 => &mut self.v4,
            Family::Ipv6 => &mut self.v6,
        };
        table
            .downcast_mut::<Vec<R>>()
            .expect("rule type matches its family table")
    }
}

impl Driver for MemoryDriver {
    fn rule_count(&mut self, family: Family) -> Result<u32> {
        self.record(DriverOp::Count, family)?;
        let count = match family {
            Family::Ipv4 => self.v4.len(),
            Family::Ipv6 => self.v6.len(),
        };
        Ok(count as u32)
    }

    fn lookup<R: DriverRule>(&mut self, buf: &mut [R]) -> Result<()> {
        assert!(!buf.is_empty(), "zero-length lookup issued");
        self.record(DriverOp::Lookup, R::FAMILY)?;
        let table = self.table::<R>();
        let n = buf.len().min(table.len());
        buf[..n].copy_from_slice(&table[..n]);
        Ok(())
    }

    fn add<R: DriverRule>(&mut self, rule: &R) -> Result<()> {
        self.record(DriverOp::Add, R::FAMILY)?;
        self.table::<R>().push(*rule);
        Ok(())
    }

    fn delete<R: DriverRule>(&mut self, rule: &R) -> Result<()> {
        self.record(DriverOp::Delete, R::FAMILY)?;
        let table = self.table::<R>();
        let Some(pos) = table.iter().position(|r| r == rule) else {
            return Err(Error::Driver {
                op: DriverOp::Delete,
                family: R::FAMILY,
                errno: Errno::ENOENT,
            });
        };
        table.remove(pos);
        Ok(())
    }
}

/// IPv4 rule `(0, 0, 0, dest_port, protocol)` with the extern mask set, the
/// shape most rules take in practice.
pub fn v4(dest_port: u16, protocol: u16) -> Rule4 {
    Rule4::new(Ipv4Addr::UNSPECIFIED, 0, Ipv4Addr::UNSPECIFIED, dest_port, protocol)
        .with_extern(0xFFFF, 0, 0xFFFF, 0)
}

pub fn v6(dest_port: u16, protocol: u16) -> Rule6 {
    Rule6::new(
        Ipv6Addr::UNSPECIFIED,
        0,
        "2001:db8::1".parse().expect("valid address"),
        dest_port,
        protocol,
    )
}
