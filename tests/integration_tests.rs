//! Integration tests for nfsync
//!
//! These tests drive the public API end to end against an in-memory driver:
//! projection of JSON rule files, session operations, config loading and the
//! audit trail.
//!
//! The real character device is only touched by the open test, which
//! expects it to be absent.

#![allow(clippy::uninlined_format_args)]

use nfsync::core::driver::{Driver, DriverOp};
use nfsync::core::projector::{self, RuleRecord};
use nfsync::core::rule::DriverRule;
use nfsync::{Error, Family, Operation, Rule4, Rule6, RuleBatch, Session, audit, config};
use nix::errno::Errno;
use std::any::Any;
use std::net::Ipv4Addr;

/// Driver double that keeps both tables in memory and logs every call.
#[derive(Default)]
struct TableDriver {
    v4: Vec<Rule4>,
    v6: Vec<Rule6>,
    log: Vec<(DriverOp, Family)>,
    refuse: Option<(DriverOp, Errno)>,
}

impl TableDriver {
    fn ops(&self, op: DriverOp) -> usize {
        self.log.iter().filter(|(o, _)| *o == op).count()
    }

    fn call(&mut self, op: DriverOp, family: Family) -> nfsync::Result<()> {
        self.log.push((op, family));
        match self.refuse {
            Some((refused, errno)) if refused == op => Err(Error::Driver { op, family, errno }),
            _ => Ok(()),
        }
    }

    fn rules<R: DriverRule>(&mut self) -> &mut Vec<R> {
        let table: &mut dyn Any = match R::FAMILY {
            Family::Ipv4 => &mut self.v4,
            Family::Ipv6 => &mut self.v6,
        };
        table.downcast_mut().expect("table matches rule family")
    }
}

impl Driver for TableDriver {
    fn rule_count(&mut self, family: Family) -> nfsync::Result<u32> {
        self.call(DriverOp::Count, family)?;
        Ok(match family {
            Family::Ipv4 => self.v4.len() as u32,
            Family::Ipv6 => self.v6.len() as u32,
        })
    }

    fn lookup<R: DriverRule>(&mut self, buf: &mut [R]) -> nfsync::Result<()> {
        self.call(DriverOp::Lookup, R::FAMILY)?;
        let rules = self.rules::<R>();
        let n = buf.len().min(rules.len());
        buf[..n].copy_from_slice(&rules[..n]);
        Ok(())
    }

    fn add<R: DriverRule>(&mut self, rule: &R) -> nfsync::Result<()> {
        self.call(DriverOp::Add, R::FAMILY)?;
        self.rules::<R>().push(*rule);
        Ok(())
    }

    fn delete<R: DriverRule>(&mut self, rule: &R) -> nfsync::Result<()> {
        self.call(DriverOp::Delete, R::FAMILY)?;
        let rules = self.rules::<R>();
        if let Some(pos) = rules.iter().position(|r| r == rule) {
            rules.remove(pos);
        }
        Ok(())
    }
}

fn port_rule(dest_port: u16, protocol: u16) -> Rule4 {
    let any = Ipv4Addr::UNSPECIFIED;
    Rule4::new(any, 0, any, dest_port, protocol).with_extern(0xFFFF, 0, 0xFFFF, 0)
}

fn records(json: &str) -> Vec<RuleRecord> {
    serde_json::from_str(json).unwrap()
}

#[test]
fn test_create_from_positional_records() {
    let installed = vec![port_rule(1897, 6), port_rule(999, 17)];
    let session = Session::with_driver(TableDriver {
        v4: installed,
        ..TableDriver::default()
    });

    let desired = records(
        r"[[0, 65535, 0, 0, 65535, 0, 0, 1897, 6],
           [0, 65535, 0, 0, 65535, 0, 0, 555, 6]]",
    );
    let summary = session.create(desired).unwrap();

    assert_eq!(summary.added, 1);
    assert_eq!(summary.deleted, 0);
    assert_eq!(summary.installed_before, 2);

    let driver = session.into_driver();
    assert_eq!(driver.v4.len(), 3);
    assert!(driver.v4.contains(&port_rule(555, 6)));
    assert_eq!(driver.ops(DriverOp::Add), 1);
}

#[test]
fn test_self_sync_prunes_extraneous_rules() {
    let session = Session::with_driver(TableDriver {
        v4: vec![port_rule(1897, 6), port_rule(999, 17)],
        ..TableDriver::default()
    });

    let summary = session.self_sync(vec![port_rule(1897, 6), port_rule(555, 6)]).unwrap();

    assert_eq!(summary.deleted, 1);
    assert_eq!(summary.added, 0);
    assert_eq!(session.into_driver().v4, vec![port_rule(1897, 6)]);
}

#[test]
fn test_self_sync_with_empty_file_drains_family() {
    let session = Session::with_driver(TableDriver {
        v4: vec![port_rule(22, 6), port_rule(53, 17)],
        ..TableDriver::default()
    });

    let batch = projector::project(&records("[]"), Some(Family::Ipv4)).unwrap();
    let summary = session.run(Operation::SelfSync, batch).unwrap();

    assert_eq!(summary.deleted, 2);
    let driver = session.into_driver();
    assert!(driver.v4.is_empty());
    assert!(driver.log.iter().all(|(_, family)| *family == Family::Ipv4));
}

#[test]
fn test_create_then_delete_leaves_nothing() {
    let session = Session::with_driver(TableDriver::default());
    let rules = [port_rule(22, 6), port_rule(443, 6)];

    assert_eq!(session.create(rules).unwrap().added, 2);
    assert_eq!(session.delete(rules).unwrap().deleted, 2);

    let installed = session.installed(Family::Ipv4).unwrap();
    assert!(installed.is_empty());
}

#[test]
fn test_mixed_families_rejected_before_any_driver_call() {
    let session = Session::with_driver(TableDriver::default());
    let mixed = records(
        r"[[0, 0, 0, 0, 0, 0, 0, 22, 6],
           [0, 0, 0, 0, 0, 0, 0, 0, 0, 53, 17]]",
    );

    let err = session.create(mixed).unwrap_err();

    assert!(matches!(err, Error::UnsupportedRuleType(_)));
    assert!(session.into_driver().log.is_empty());
}

#[test]
fn test_plan_does_not_mutate() {
    let session = Session::with_driver(TableDriver {
        v4: vec![port_rule(999, 17)],
        ..TableDriver::default()
    });

    let changes = session
        .plan(Operation::SelfSync, vec![port_rule(22, 6)])
        .unwrap();

    assert_eq!(changes.installed, 1);
    assert!(changes.add.is_empty());
    assert_eq!(changes.delete, RuleBatch::Ipv4(vec![port_rule(999, 17)]));

    let driver = session.into_driver();
    assert_eq!(driver.ops(DriverOp::Add) + driver.ops(DriverOp::Delete), 0);
}

#[test]
fn test_driver_error_is_surfaced_with_translation() {
    let session = Session::with_driver(TableDriver {
        refuse: Some((DriverOp::Count, Errno::EACCES)),
        ..TableDriver::default()
    });

    let err = session.create(vec![port_rule(22, 6)]).unwrap_err();

    assert_eq!(err.driver_code(), Some(nix::libc::EACCES));
    let Error::Driver { op, errno, .. } = &err else {
        panic!("expected a driver error, got {err:?}");
    };
    let translation = nfsync::core::error::DriverErrorPattern::match_errno(*op, *errno);
    assert!(!translation.suggestions.is_empty());
}

#[test]
fn test_rule_file_round_trip_through_json_objects() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.json");
    std::fs::write(
        &path,
        r#"[{"source_ip": 0, "dest_ip": 0, "source_port": 0, "dest_port": 22, "protocol": 6}]"#,
    )
    .unwrap();

    let batch = projector::project(&projector::read_records(&path).unwrap(), None).unwrap();

    assert_eq!(batch.family(), Family::Ipv4);
    assert_eq!(batch, RuleBatch::Ipv4(vec![port_rule(22, 6)]));
}

#[test]
fn test_open_missing_device() {
    let dir = tempfile::tempdir().unwrap();
    let options = config::Options {
        path: dir.path().join("authon_netfilter"),
    };

    assert!(matches!(Session::open(&options), Err(Error::Open { .. })));
}

#[test]
fn test_config_file_selects_device() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    let options = config::Options {
        path: dir.path().join("netfilter"),
    };
    config::save_options(&options, &path).unwrap();

    let loaded = config::read_options(&path).unwrap();

    assert_eq!(loaded, options);
}

#[test]
fn test_audit_records_failed_operation() {
    let dir = tempfile::tempdir().unwrap();
    let log = audit::AuditLog::at(dir.path().join("audit.log"));
    let err = Error::Driver {
        op: DriverOp::Add,
        family: Family::Ipv4,
        errno: Errno::ENOMEM,
    };

    log.log(&audit::operation_event(Operation::Create, Family::Ipv4, 3, Err(&err)))
        .unwrap();

    let events = log.read_recent(1).unwrap();
    assert_eq!(events.len(), 1);
    assert!(!events[0].success);
    assert_eq!(events[0].details["requested"], 3);
}
