//! Rule data structures shared with the netfilter driver
//!
//! [`Rule4`] and [`Rule6`] are laid out exactly as the driver expects them:
//! `#[repr(C)]`, fields in declaration order, followed by a pointer-sized
//! linkage slot the kernel module uses for its own rule list. User space
//! never reads that slot and always passes it as zero.
//!
//! # Equality
//!
//! Rules are compared by their *key*, not by every field:
//!
//! - IPv4: `(source_ip, source_port, dest_ip, dest_port, protocol)`. The
//!   extern mask/flag fields travel with the rule but do not affect identity.
//! - IPv6: all four words of both addresses, both ports, and the protocol.
//!
//! `PartialEq`, `Eq` and `Hash` are implemented on the key so rules can be
//! indexed in hash sets during reconciliation.
//!
//! # Example
//!
//! ```
//! use nfsync::core::rule::Rule4;
//! use std::net::Ipv4Addr;
//!
//! let ssh = Rule4::new(Ipv4Addr::UNSPECIFIED, 0, Ipv4Addr::UNSPECIFIED, 22, 6);
//! let masked = ssh.with_extern(0xFFFF, 0, 0xFFFF, 0);
//! assert_eq!(ssh, masked);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Address family of a rule set
///
/// Rules of different families are never compared, read, or mutated together.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    #[strum(to_string = "ipv4", serialize = "v4", serialize = "4")]
    Ipv4,
    #[strum(to_string = "ipv6", serialize = "v6", serialize = "6")]
    Ipv6,
}

impl Family {
    /// Number of fields in the positional record layout for this family
    /// (the linkage slot excluded).
    pub const fn field_count(self) -> usize {
        match self {
            Family::Ipv4 => 9,
            Family::Ipv6 => 11,
        }
    }
}

/// A rule type the driver understands.
///
/// Implemented by [`Rule4`] and [`Rule6`] only. The associated [`Family`]
/// selects the command codes used for every driver call on this type.
pub trait DriverRule:
    Copy + Default + Eq + Hash + fmt::Debug + fmt::Display + Send + 'static
{
    const FAMILY: Family;

    /// The fields that define rule identity.
    type Key: Copy + Eq + Hash + fmt::Debug;

    fn key(&self) -> Self::Key;
}

/// IPv4 rule in driver layout
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule4 {
    pub source_ip: u32,
    #[serde(default)]
    pub source_ip_extern: u32,
    #[serde(default)]
    pub source_ip_extern_flag: u32,
    pub dest_ip: u32,
    #[serde(default)]
    pub dest_ip_extern: u32,
    #[serde(default)]
    pub dest_ip_extern_flag: i32,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: u16,
    #[serde(skip)]
    pub(crate) link: usize,
}

impl Rule4 {
    pub fn new(
        source: Ipv4Addr,
        source_port: u16,
        dest: Ipv4Addr,
        dest_port: u16,
        protocol: u16,
    ) -> Self {
        Self {
            source_ip: u32::from(source),
            dest_ip: u32::from(dest),
            source_port,
            dest_port,
            protocol,
            ..Self::default()
        }
    }

    /// Sets the extern mask/flag fields, which the driver interprets but
    /// which do not take part in rule identity.
    pub fn with_extern(
        mut self,
        source_extern: u32,
        source_flag: u32,
        dest_extern: u32,
        dest_flag: i32,
    ) -> Self {
        self.source_ip_extern = source_extern;
        self.source_ip_extern_flag = source_flag;
        self.dest_ip_extern = dest_extern;
        self.dest_ip_extern_flag = dest_flag;
        self
    }

    pub fn source_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.source_ip)
    }

    pub fn dest_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.dest_ip)
    }
}

impl DriverRule for Rule4 {
    const FAMILY: Family = Family::Ipv4;
    type Key = (u32, u16, u32, u16, u16);

    fn key(&self) -> Self::Key {
        (
            self.source_ip,
            self.source_port,
            self.dest_ip,
            self.dest_port,
            self.protocol,
        )
    }
}

impl PartialEq for Rule4 {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Rule4 {}

impl Hash for Rule4 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Rule4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto {}",
            self.source_addr(),
            self.source_port,
            self.dest_addr(),
            self.dest_port,
            self.protocol
        )
    }
}

/// IPv6 rule in driver layout
///
/// Each address is split into four 32-bit words, most significant first.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Rule6 {
    pub source_ip_part1: u32,
    pub source_ip_part2: u32,
    pub source_ip_part3: u32,
    pub source_ip_part4: u32,
    pub dest_ip_part1: u32,
    pub dest_ip_part2: u32,
    pub dest_ip_part3: u32,
    pub dest_ip_part4: u32,
    pub source_port: u16,
    pub dest_port: u16,
    pub protocol: u16,
    #[serde(skip)]
    pub(crate) link: usize,
}

fn split_words(addr: Ipv6Addr) -> [u32; 4] {
    let bits = u128::from(addr);
    [
        (bits >> 96) as u32,
        (bits >> 64) as u32,
        (bits >> 32) as u32,
        bits as u32,
    ]
}

fn join_words(words: [u32; 4]) -> Ipv6Addr {
    let bits = words
        .iter()
        .fold(0u128, |acc, &w| (acc << 32) | u128::from(w));
    Ipv6Addr::from(bits)
}

impl Rule6 {
    pub fn new(
        source: Ipv6Addr,
        source_port: u16,
        dest: Ipv6Addr,
        dest_port: u16,
        protocol: u16,
    ) -> Self {
        let [s1, s2, s3, s4] = split_words(source);
        let [d1, d2, d3, d4] = split_words(dest);
        Self {
            source_ip_part1: s1,
            source_ip_part2: s2,
            source_ip_part3: s3,
            source_ip_part4: s4,
            dest_ip_part1: d1,
            dest_ip_part2: d2,
            dest_ip_part3: d3,
            dest_ip_part4: d4,
            source_port,
            dest_port,
            protocol,
            link: 0,
        }
    }

    pub fn source_words(&self) -> [u32; 4] {
        [
            self.source_ip_part1,
            self.source_ip_part2,
            self.source_ip_part3,
            self.source_ip_part4,
        ]
    }

    pub fn dest_words(&self) -> [u32; 4] {
        [
            self.dest_ip_part1,
            self.dest_ip_part2,
            self.dest_ip_part3,
            self.dest_ip_part4,
        ]
    }

    pub fn source_addr(&self) -> Ipv6Addr {
        join_words(self.source_words())
    }

    pub fn dest_addr(&self) -> Ipv6Addr {
        join_words(self.dest_words())
    }
}

impl DriverRule for Rule6 {
    const FAMILY: Family = Family::Ipv6;
    type Key = ([u32; 4], u16, [u32; 4], u16, u16);

    fn key(&self) -> Self::Key {
        (
            self.source_words(),
            self.source_port,
            self.dest_words(),
            self.dest_port,
            self.protocol,
        )
    }
}

impl PartialEq for Rule6 {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Rule6 {}

impl Hash for Rule6 {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Rule6 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]:{} -> [{}]:{} proto {}",
            self.source_addr(),
            self.source_port,
            self.dest_addr(),
            self.dest_port,
            self.protocol
        )
    }
}
