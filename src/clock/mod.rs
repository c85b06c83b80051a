//! Clock handles and the `ClockAdjust` boundary trait.
//!
//! A `ClockHandle` names either the kernel's realtime clock or a PHC device
//! opened from `/dev/ptpN`. `ClockAdjust` is the single external seam the
//! rest of the crate goes through to read time, change frequency, step, or
//! toggle the kernel leap-pending flag — swapped out for a mock in tests.

#[cfg(unix)]
pub mod linux;

use crate::error::SessionError;
use std::fs::{File, OpenOptions};
#[cfg(unix)]
use std::os::unix::io::{AsRawFd, RawFd};

/// POSIX dynamic clockid encoding used by PHC file descriptors.
/// See `clock_gettime(2)`: `((~fd) << 3) | CLOCKFD`.
const CLOCKFD: libc::clockid_t = 3;

pub fn fd_to_clockid(fd: RawFd) -> libc::clockid_t {
    ((!(fd as libc::clockid_t)) << 3) | CLOCKFD
}

/// An opaque time source or sink: either the kernel realtime clock, or a PHC
/// device opened at startup and held for the life of the process.
#[derive(Debug)]
pub enum ClockHandle {
    SystemRealtime,
    Phc(File),
}

impl ClockHandle {
    /// Opens `device` the way `phc2sys -c`/`-s` accept clock names: an
    /// absolute device path, or the literal (case-insensitive) name of the
    /// system realtime clock.
    pub fn open(device: &str) -> Result<Self, SessionError> {
        if device.starts_with('/') {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(device)
                .map_err(|e| {
                    SessionError::ConfigurationInvalid(format!(
                        "cannot open clock device {device}: {e}"
                    ))
                })?;
            Ok(ClockHandle::Phc(file))
        } else if device.eq_ignore_ascii_case("CLOCK_REALTIME") {
            Ok(ClockHandle::SystemRealtime)
        } else {
            Err(SessionError::ConfigurationInvalid(format!(
                "unrecognized clock name '{device}', expected a /dev/ptpN path or CLOCK_REALTIME"
            )))
        }
    }

    pub fn is_system_realtime(&self) -> bool {
        matches!(self, ClockHandle::SystemRealtime)
    }

    pub fn clockid(&self) -> libc::clockid_t {
        match self {
            ClockHandle::SystemRealtime => libc::CLOCK_REALTIME,
            ClockHandle::Phc(f) => fd_to_clockid(f.as_raw_fd()),
        }
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            ClockHandle::SystemRealtime => None,
            ClockHandle::Phc(f) => Some(f.as_raw_fd()),
        }
    }
}

/// The boundary the control loop adjusts clocks through. Every method takes
/// the raw `clockid_t` rather than a `&ClockHandle` so the same implementation
/// serves both the slave and any master PHC a sampler needs to read.
#[cfg_attr(test, mockall::automock)]
pub trait ClockAdjust {
    fn read_ns(&self, clockid: libc::clockid_t) -> Result<i64, SessionError>;
    fn get_freq_ppb(&self, clockid: libc::clockid_t) -> Result<f64, SessionError>;
    fn set_freq_ppb(&self, clockid: libc::clockid_t, ppb: f64) -> Result<(), SessionError>;
    fn step_clock(&self, clockid: libc::clockid_t, offset_ns: i64) -> Result<(), SessionError>;
    /// `direction`: +1 schedules an insertion, -1 a deletion, 0 clears any pending leap.
    fn set_leap(&self, clockid: libc::clockid_t, direction: i8) -> Result<(), SessionError>;
}
