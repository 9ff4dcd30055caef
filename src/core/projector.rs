//! Projection of caller input onto typed rule batches
//!
//! Every public operation starts by turning its input into a [`RuleBatch`]:
//! a homogeneous list of either IPv4 or IPv6 rules. The batch's variant is
//! the family the whole operation works on.
//!
//! Statically typed callers hand over `Vec<Rule4>`, `Vec<Rule6>`, slices or
//! arrays; those convert without any checks. Dynamic input (rule files, the
//! CLI) arrives as [`RuleRecord`]s and goes through [`project`], which
//! detects the family from the record shape and validates every field width.
//!
//! # Record shapes
//!
//! - Positional arrays, by declared field order: 9 integers for IPv4
//!   (`source_ip, source_ip_extern, source_ip_extern_flag, dest_ip,
//!   dest_ip_extern, dest_ip_extern_flag, source_port, dest_port, protocol`),
//!   11 for IPv6 (`source_ip_part1..4, dest_ip_part1..4, source_port,
//!   dest_port, protocol`).
//! - Objects using the canonical field names of [`Rule4`] or [`Rule6`].
//!
//! Anything else is rejected with [`Error::UnsupportedRuleType`].

use crate::core::error::{Error, Result};
use crate::core::rule::{Family, Rule4, Rule6};
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// A homogeneous, ordered list of rules of one family
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "family", content = "rules", rename_all = "lowercase")]
pub enum RuleBatch {
    Ipv4(Vec<Rule4>),
    Ipv6(Vec<Rule6>),
}

impl RuleBatch {
    pub fn empty(family: Family) -> Self {
        match family {
            Family::Ipv4 => RuleBatch::Ipv4(Vec::new()),
            Family::Ipv6 => RuleBatch::Ipv6(Vec::new()),
        }
    }

    pub fn family(&self) -> Family {
        match self {
            RuleBatch::Ipv4(_) => Family::Ipv4,
            RuleBatch::Ipv6(_) => Family::Ipv6,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RuleBatch::Ipv4(rules) => rules.len(),
            RuleBatch::Ipv6(rules) => rules.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rules rendered with their `Display` form, in batch order.
    pub fn display_lines(&self) -> Vec<String> {
        match self {
            RuleBatch::Ipv4(rules) => rules.iter().map(ToString::to_string).collect(),
            RuleBatch::Ipv6(rules) => rules.iter().map(ToString::to_string).collect(),
        }
    }
}

impl From<Vec<Rule4>> for RuleBatch {
    fn from(rules: Vec<Rule4>) -> Self {
        RuleBatch::Ipv4(rules)
    }
}

impl From<Vec<Rule6>> for RuleBatch {
    fn from(rules: Vec<Rule6>) -> Self {
        RuleBatch::Ipv6(rules)
    }
}

/// One caller-supplied rule record of not-yet-known family
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleRecord {
    Positional(Vec<i64>),
    V4(Rule4),
    V6(Rule6),
    Other(serde_json::Value),
}

/// Conversion into a [`RuleBatch`], performed at the start of every operation.
pub trait IntoRuleBatch {
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedRuleType`] if the input is not a
    /// homogeneous list of a recognized rule shape.
    fn into_rule_batch(self) -> Result<RuleBatch>;
}

impl IntoRuleBatch for RuleBatch {
    fn into_rule_batch(self) -> Result<RuleBatch> {
        Ok(self)
    }
}

impl IntoRuleBatch for Vec<Rule4> {
    fn into_rule_batch(self) -> Result<RuleBatch> {
        Ok(RuleBatch::Ipv4(self))
    }
}

impl IntoRuleBatch for Vec<Rule6> {
    fn into_rule_batch(self) -> Result<RuleBatch> {
        Ok(RuleBatch::Ipv6(self))
    }
}

impl IntoRuleBatch for &[Rule4] {
    fn into_rule_batch(self) -> Result<RuleBatch> {
        Ok(RuleBatch::Ipv4(self.to_vec()))
    }
}

impl IntoRuleBatch for &[Rule6] {
    fn into_rule_batch(self) -> Result<RuleBatch> {
        Ok(RuleBatch::Ipv6(self.to_vec()))
    }
}

impl<const N: usize> IntoRuleBatch for [Rule4; N] {
    fn into_rule_batch(self) -> Result<RuleBatch> {
        Ok(RuleBatch::Ipv4(self.to_vec()))
    }
}

impl<const N: usize> IntoRuleBatch for [Rule6; N] {
    fn into_rule_batch(self) -> Result<RuleBatch> {
        Ok(RuleBatch::Ipv6(self.to_vec()))
    }
}

impl IntoRuleBatch for Vec<RuleRecord> {
    fn into_rule_batch(self) -> Result<RuleBatch> {
        project(&self, None)
    }
}

/// Projects dynamic records onto a typed batch.
///
/// The family is taken from the first record; every other record must have
/// the same shape. `hint` supplies the family for an empty list and, when
/// given, must agree with the records.
///
/// # Errors
///
/// Returns [`Error::UnsupportedRuleType`] if:
/// - a record matches neither layout
/// - a positional value does not fit its field's width
/// - records of both families are mixed
/// - the list is empty and no hint is given
/// - the records disagree with `hint`
pub fn project(records: &[RuleRecord], hint: Option<Family>) -> Result<RuleBatch> {
    let Some(first) = records.first() else {
        return hint.map(RuleBatch::empty).ok_or_else(|| {
            Error::unsupported("cannot infer the address family of an empty rule list")
        });
    };

    let family = record_family(0, first)?;
    if let Some(requested) = hint
        && requested != family
    {
        return Err(Error::unsupported(format!(
            "records are {family} rules but {requested} was requested"
        )));
    }

    match family {
        Family::Ipv4 => records
            .iter()
            .enumerate()
            .map(|(index, record)| to_rule4(index, record))
            .collect::<Result<Vec<_>>>()
            .map(RuleBatch::Ipv4),
        Family::Ipv6 => records
            .iter()
            .enumerate()
            .map(|(index, record)| to_rule6(index, record))
            .collect::<Result<Vec<_>>>()
            .map(RuleBatch::Ipv6),
    }
}

/// Reads a JSON array of records from `path` (`-` reads standard input).
///
/// # Errors
///
/// Returns `Err` if the file cannot be read or is not a JSON array.
pub fn read_records(path: &Path) -> Result<Vec<RuleRecord>> {
    let json = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        std::fs::read_to_string(path)?
    };
    Ok(serde_json::from_str(&json)?)
}

fn record_family(index: usize, record: &RuleRecord) -> Result<Family> {
    match record {
        RuleRecord::V4(_) => Ok(Family::Ipv4),
        RuleRecord::V6(_) => Ok(Family::Ipv6),
        RuleRecord::Positional(values) if values.len() == Family::Ipv4.field_count() => {
            Ok(Family::Ipv4)
        }
        RuleRecord::Positional(values) if values.len() == Family::Ipv6.field_count() => {
            Ok(Family::Ipv6)
        }
        RuleRecord::Positional(values) => Err(Error::unsupported(format!(
            "record {index} has {} fields, expected {} (ipv4) or {} (ipv6)",
            values.len(),
            Family::Ipv4.field_count(),
            Family::Ipv6.field_count()
        ))),
        RuleRecord::Other(value) => Err(Error::unsupported(format!(
            "record {index} is not a rule: {value}"
        ))),
    }
}

fn mixed(index: usize, expected: Family, found: Family) -> Error {
    Error::unsupported(format!(
        "record {index} is an {found} rule in a list of {expected} rules"
    ))
}

fn field<T: TryFrom<i64>>(index: usize, values: &[i64], pos: usize, width: &str) -> Result<T> {
    let value = values[pos];
    T::try_from(value).map_err(|_| {
        Error::unsupported(format!(
            "record {index} field {pos}: {value} does not fit {width}"
        ))
    })
}

fn to_rule4(index: usize, record: &RuleRecord) -> Result<Rule4> {
    let values = match record {
        RuleRecord::V4(rule) => return Ok(*rule),
        RuleRecord::Positional(values) if values.len() == Family::Ipv4.field_count() => values,
        other => {
            let found = record_family(index, other)?;
            return Err(mixed(index, Family::Ipv4, found));
        }
    };

    Ok(Rule4 {
        source_ip: field(index, values, 0, "u32")?,
        source_ip_extern: field(index, values, 1, "u32")?,
        source_ip_extern_flag: field(index, values, 2, "u32")?,
        dest_ip: field(index, values, 3, "u32")?,
        dest_ip_extern: field(index, values, 4, "u32")?,
        dest_ip_extern_flag: field(index, values, 5, "i32")?,
        source_port: field(index, values, 6, "u16")?,
        dest_port: field(index, values, 7, "u16")?,
        protocol: field(index, values, 8, "u16")?,
        link: 0,
    })
}

fn to_rule6(index: usize, record: &RuleRecord) -> Result<Rule6> {
    let values = match record {
        RuleRecord::V6(rule) => return Ok(*rule),
        RuleRecord::Positional(values) if values.len() == Family::Ipv6.field_count() => values,
        other => {
            let found = record_family(index, other)?;
            return Err(mixed(index, Family::Ipv6, found));
        }
    };

    Ok(Rule6 {
        source_ip_part1: field(index, values, 0, "u32")?,
        source_ip_part2: field(index, values, 1, "u32")?,
        source_ip_part3: field(index, values, 2, "u32")?,
        source_ip_part4: field(index, values, 3, "u32")?,
        dest_ip_part1: field(index, values, 4, "u32")?,
        dest_ip_part2: field(index, values, 5, "u32")?,
        dest_ip_part3: field(index, values, 6, "u32")?,
        dest_ip_part4: field(index, values, 7, "u32")?,
        source_port: field(index, values, 8, "u16")?,
        dest_port: field(index, values, 9, "u16")?,
        protocol: field(index, values, 10, "u16")?,
        link: 0,
    })
}
