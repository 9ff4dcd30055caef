//! Control channel to the netfilter character device
//!
//! Every interaction with the driver goes through one request primitive:
//! `ioctl(fd, command_code, argument)`. The command code depends on the
//! operation and the address family:
//!
//! | Operation | IPv4 | IPv6 |
//! |-----------|------|------|
//! | Add       | 0    | 110  |
//! | Delete    | 1    | 111  |
//! | Lookup    | 10   | 1000 |
//! | Count     | 100  | 1010 |
//!
//! Add and Delete pass a pointer to one rule, Lookup passes a pointer to the
//! first element of a buffer sized to the current rule count, and Count
//! passes no argument and returns the count as the request's result.
//!
//! The [`Driver`] trait is the seam between the reconciliation engine and the
//! device; [`DeviceChannel`] is the implementation backed by a real file
//! descriptor.

use crate::core::error::{Error, Result};
use crate::core::rule::{DriverRule, Family};
use nix::errno::Errno;
use nix::libc::{self, c_int, c_void};
use nix::sys::ioctl::ioctl_num_type;
use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use tracing::debug;

/// A control operation understood by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum DriverOp {
    Add,
    Delete,
    Lookup,
    Count,
}

impl DriverOp {
    /// Returns the command code for this operation on `family`.
    pub const fn code(self, family: Family) -> u32 {
        match (family, self) {
            (Family::Ipv4, DriverOp::Add) => 0,
            (Family::Ipv4, DriverOp::Delete) => 1,
            (Family::Ipv4, DriverOp::Lookup) => 10,
            (Family::Ipv4, DriverOp::Count) => 100,
            (Family::Ipv6, DriverOp::Add) => 110,
            (Family::Ipv6, DriverOp::Delete) => 111,
            (Family::Ipv6, DriverOp::Lookup) => 1000,
            (Family::Ipv6, DriverOp::Count) => 1010,
        }
    }
}

/// The four control operations the reconciliation engine needs.
///
/// Every call is synchronous and single-shot: it either completes or fails
/// with the driver's error code. Implementations never retry.
pub trait Driver {
    /// Number of rules of `family` currently installed.
    fn rule_count(&mut self, family: Family) -> Result<u32>;

    /// Fills `buf` with installed rules of `R`'s family.
    ///
    /// `buf` is sized by the caller from a preceding [`Driver::rule_count`];
    /// callers never pass an empty buffer.
    fn lookup<R: DriverRule>(&mut self, buf: &mut [R]) -> Result<()>;

    /// Installs one rule.
    fn add<R: DriverRule>(&mut self, rule: &R) -> Result<()>;

    /// Removes one rule.
    fn delete<R: DriverRule>(&mut self, rule: &R) -> Result<()>;
}

/// An open descriptor on the netfilter device
#[derive(Debug)]
pub struct DeviceChannel {
    fd: OwnedFd,
    path: PathBuf,
}

impl DeviceChannel {
    /// Opens the device read/write.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Open`] if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| Error::Open {
                path: path.to_path_buf(),
                source,
            })?;

        debug!("Opened netfilter device {}", path.display());
        Ok(Self {
            fd: file.into(),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Issues one control request.
    ///
    /// # Safety
    ///
    /// `arg` must be null (Count) or point to memory valid for the access the
    /// driver performs for `op`: one `R` for Add/Delete, the whole buffer for
    /// Lookup.
    unsafe fn request(&self, op: DriverOp, family: Family, arg: *mut c_void) -> Result<c_int> {
        let code = op.code(family);
        // SAFETY: the descriptor is open for the lifetime of `self`; the
        // argument contract is upheld by the caller.
        let ret = unsafe { libc::ioctl(self.fd.as_raw_fd(), code as ioctl_num_type, arg) };
        Errno::result(ret).map_err(|errno| Error::Driver { op, family, errno })
    }

    /// Releases the descriptor, reporting a failed close.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if `close(2)` fails.
    pub fn close(self) -> Result<()> {
        nix::unistd::close(self.fd).map_err(|errno| Error::Io(errno.into()))
    }
}

/// Converts the Count request's return value into a rule count.
///
/// `Errno::result` only treats -1 as failure; any other negative value is
/// still not a count and is reported as `ERANGE`.
fn count_from_ret(family: Family, ret: c_int) -> Result<u32> {
    u32::try_from(ret).map_err(|_| Error::Driver {
        op: DriverOp::Count,
        family,
        errno: Errno::ERANGE,
    })
}

impl Driver for DeviceChannel {
    fn rule_count(&mut self, family: Family) -> Result<u32> {
        // SAFETY: Count takes no argument.
        let ret = unsafe { self.request(DriverOp::Count, family, std::ptr::null_mut())? };
        count_from_ret(family, ret)
    }

    fn lookup<R: DriverRule>(&mut self, buf: &mut [R]) -> Result<()> {
        // A zero-length buffer has no first element to hand the driver.
        if buf.is_empty() {
            return Ok(());
        }
        // SAFETY: `buf` is a live, exclusively borrowed `#[repr(C)]` slice.
        // The driver ABI is assumed to write at most `buf.len()` rules, even
        // when its table grew after the count (see the race note in
        // `reconcile`).
        unsafe { self.request(DriverOp::Lookup, R::FAMILY, buf.as_mut_ptr().cast())? };
        Ok(())
    }

    fn add<R: DriverRule>(&mut self, rule: &R) -> Result<()> {
        // SAFETY: the driver only reads one `R` from the pointer.
        unsafe {
            self.request(
                DriverOp::Add,
                R::FAMILY,
                std::ptr::from_ref(rule).cast_mut().cast(),
            )?;
        }
        Ok(())
    }

    fn delete<R: DriverRule>(&mut self, rule: &R) -> Result<()> {
        // SAFETY: the driver only reads one `R` from the pointer.
        unsafe {
            self.request(
                DriverOp::Delete,
                R::FAMILY,
                std::ptr::from_ref(rule).cast_mut().cast(),
            )?;
        }
        Ok(())
    }
}
