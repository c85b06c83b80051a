//! Linux implementation of [`ClockAdjust`] plus the raw ioctl wrappers the
//! samplers need (`PTP_SYS_OFFSET`, `PPS_FETCH`).
//!
//! `clock_adjtime(2)` is used instead of the libc `adjtimex` wrapper for
//! every operation, since it is the only entry point that accepts a PHC's
//! dynamic `clockid_t` as well as `CLOCK_REALTIME` — `adjtimex` only ever
//! targets the latter. The `timex` bit flags it needs are not reliably
//! exposed by the `libc` crate across targets, so they are defined locally.

use super::ClockAdjust;
use crate::error::SessionError;
use std::mem;
use std::os::unix::io::RawFd;

const ADJ_FREQUENCY: libc::c_uint = 0x0002;
const ADJ_STATUS: libc::c_uint = 0x0010;
const ADJ_SETOFFSET: libc::c_uint = 0x0100;
const ADJ_NANO: libc::c_uint = 0x2000;
const STA_PLL: libc::c_int = 0x0001;
const STA_INS: libc::c_int = 0x0010;
const STA_DEL: libc::c_int = 0x0020;

/// 2^16, the fixed-point scale `timex.freq` uses (ppm * 65536).
const FREQ_SCALE: f64 = 65536.0;

fn clock_adjtime(clockid: libc::clockid_t, tx: &mut libc::timex) -> Result<(), SessionError> {
    let ret = unsafe { libc::syscall(libc::SYS_clock_adjtime, clockid, tx as *mut libc::timex) };
    if ret < 0 {
        return Err(SessionError::AdjustmentFailed(format!(
            "clock_adjtime failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

pub struct LinuxClockAdjust;

impl LinuxClockAdjust {
    pub fn new() -> Self {
        LinuxClockAdjust
    }
}

impl Default for LinuxClockAdjust {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockAdjust for LinuxClockAdjust {
    fn read_ns(&self, clockid: libc::clockid_t) -> Result<i64, SessionError> {
        let mut ts: libc::timespec = unsafe { mem::zeroed() };
        let ret = unsafe { libc::clock_gettime(clockid, &mut ts) };
        if ret < 0 {
            return Err(SessionError::SampleTransient(format!(
                "clock_gettime({clockid}) failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64)
    }

    fn get_freq_ppb(&self, clockid: libc::clockid_t) -> Result<f64, SessionError> {
        let mut tx: libc::timex = unsafe { mem::zeroed() };
        clock_adjtime(clockid, &mut tx)?;
        Ok(tx.freq as f64 / FREQ_SCALE * 1000.0)
    }

    fn set_freq_ppb(&self, clockid: libc::clockid_t, ppb: f64) -> Result<(), SessionError> {
        let ppm = ppb / 1000.0;
        let mut tx: libc::timex = unsafe { mem::zeroed() };
        tx.modes = ADJ_FREQUENCY;
        tx.freq = (ppm * FREQ_SCALE) as i64;
        clock_adjtime(clockid, &mut tx)
    }

    fn step_clock(&self, clockid: libc::clockid_t, offset_ns: i64) -> Result<(), SessionError> {
        let mut tx: libc::timex = unsafe { mem::zeroed() };
        tx.modes = ADJ_SETOFFSET | ADJ_NANO;
        tx.time.tv_sec = (offset_ns.div_euclid(1_000_000_000)) as libc::time_t;
        tx.time.tv_usec = offset_ns.rem_euclid(1_000_000_000) as libc::suseconds_t;
        clock_adjtime(clockid, &mut tx)
    }

    fn set_leap(&self, clockid: libc::clockid_t, direction: i8) -> Result<(), SessionError> {
        let mut tx: libc::timex = unsafe { mem::zeroed() };
        tx.modes = ADJ_STATUS;
        tx.status = match direction {
            1 => STA_PLL | STA_INS,
            -1 => STA_PLL | STA_DEL,
            _ => STA_PLL,
        };
        clock_adjtime(clockid, &mut tx)
    }
}

// ============================================================================
// PTP_SYS_OFFSET (kernel atomic PHC/system cross-sample)
// ============================================================================

const PTP_CLK_MAGIC: u8 = b'=';
const PTP_MAX_SAMPLES: usize = 25;

#[repr(C)]
#[derive(Clone, Copy)]
struct PtpClockTime {
    sec: i64,
    nsec: u32,
    reserved: u32,
}

#[repr(C)]
struct PtpSysOffset {
    n_samples: u32,
    rsv: [u32; 3],
    ts: [PtpClockTime; 2 * PTP_MAX_SAMPLES + 1],
}

nix::ioctl_readwrite!(ptp_sys_offset_ioctl, PTP_CLK_MAGIC, 5, PtpSysOffset);

/// Result of a successful `PTP_SYS_OFFSET` call: offset of the PHC from the
/// system clock (PHC - sys), the system timestamp of the measurement, and
/// the bounding system-clock read interval (the "delay").
pub struct SysOffsetReading {
    pub offset_ns: i64,
    pub sys_ts_ns: i64,
    pub delay_ns: i64,
}

/// Probes whether `PTP_SYS_OFFSET` is supported on `fd`, returning the
/// reading from the probe call itself when it is.
pub fn sysoff_measure(fd: RawFd, n_samples: u32) -> Result<SysOffsetReading, SessionError> {
    let n_samples = n_samples.min(PTP_MAX_SAMPLES as u32).max(1);
    let mut req: PtpSysOffset = unsafe { mem::zeroed() };
    req.n_samples = n_samples;

    unsafe { ptp_sys_offset_ioctl(fd, &mut req) }.map_err(|e| {
        SessionError::SampleTransient(format!("PTP_SYS_OFFSET ioctl failed: {e}"))
    })?;

    let n = req.n_samples as usize;
    let mut best_interval = i64::MAX;
    let mut best = (0i64, 0i64, i64::MAX);

    for i in 0..n {
        let t1 = &req.ts[2 * i];
        let tphc = &req.ts[2 * i + 1];
        let t2 = &req.ts[2 * i + 2];

        let t1_ns = t1.sec * 1_000_000_000 + t1.nsec as i64;
        let tphc_ns = tphc.sec * 1_000_000_000 + tphc.nsec as i64;
        let t2_ns = t2.sec * 1_000_000_000 + t2.nsec as i64;

        let interval = t2_ns - t1_ns;
        if interval < best_interval {
            best_interval = interval;
            best = (t1_ns - tphc_ns + interval / 2, t2_ns, interval);
        }
    }

    Ok(SysOffsetReading {
        offset_ns: best.0,
        sys_ts_ns: best.1,
        delay_ns: best.2,
    })
}

// ============================================================================
// PPS_FETCH
// ============================================================================

const PPS_MAGIC: u8 = b'1';

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct PpsKtime {
    sec: i64,
    nsec: i32,
    flags: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct PpsKinfo {
    assert_sequence: u32,
    clear_sequence: u32,
    assert_tu: PpsKtime,
    clear_tu: PpsKtime,
    current_mode: i32,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct PpsFdata {
    info: PpsKinfo,
    timeout: PpsKtime,
}

nix::ioctl_readwrite!(pps_fetch_ioctl, PPS_MAGIC, 0xa4, PpsFdata);

/// Blocks (up to the kernel-enforced 10s cap encoded in `timeout`) until the
/// next PPS assertion edge, returning its raw nanosecond timestamp.
pub fn read_pps(fd: RawFd) -> Result<i64, SessionError> {
    let mut data = PpsFdata {
        timeout: PpsKtime {
            sec: 10,
            nsec: 0,
            flags: 0,
        },
        ..Default::default()
    };

    unsafe { pps_fetch_ioctl(fd, &mut data) }
        .map_err(|e| SessionError::SampleTransient(format!("PPS_FETCH ioctl failed: {e}")))?;

    let t = data.info.assert_tu;
    Ok(t.sec * 1_000_000_000 + t.nsec as i64)
}
