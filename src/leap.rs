//! UTC/TAI offset and leap-second coordination.
//!
//! Only the system realtime clock can be leaped by the kernel; PHCs run on a
//! TAI-like monotone timeline and never leap. This module decides, from a
//! wall-clock reading and the management channel's pending-leap report,
//! whether the kernel leap flag should change and whether the current sample
//! is too close to the leap boundary to trust.

use crate::clock::ClockAdjust;
use crate::error::SessionError;
use chrono::{DateTime, Datelike, Timelike, Utc};

const NS_PER_SEC: i64 = 1_000_000_000;
pub const MGMT_REFRESH_INTERVAL_NS: i64 = 60 * NS_PER_SEC;

fn ns_to_datetime(ts_ns: i64) -> DateTime<Utc> {
    let secs = ts_ns.div_euclid(NS_PER_SEC);
    let nanos = ts_ns.rem_euclid(NS_PER_SEC) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap_or_else(|| DateTime::from_timestamp(0, 0).unwrap())
}

/// Leap seconds are only ever scheduled for the midnight that ends 30 June
/// or 31 December (IERS convention); any other day's midnight is never
/// ambiguous regardless of `leap_pending`.
fn is_leap_eve(dt: &DateTime<Utc>) -> bool {
    matches!((dt.month(), dt.day()), (6, 30) | (12, 31))
}

/// `true` for `ts` in the final second before a leap-eligible midnight,
/// while a leap is actually pending.
pub fn is_utc_ambiguous(ts_ns: i64, leap_pending: i8) -> bool {
    if leap_pending == 0 {
        return false;
    }
    let dt = ns_to_datetime(ts_ns);
    is_leap_eve(&dt) && dt.hour() == 23 && dt.minute() == 59 && dt.second() == 59
}

/// Canonical kernel leap state for `ts` given the management channel's
/// current report: armed throughout the leap-eve day, clear otherwise —
/// including the instant the day rolls over, which is how a completed leap
/// gets unlatched without needing a second mgmt round-trip.
fn target_leap(ts_ns: i64, leap_pending: i8) -> i8 {
    if leap_pending != 0 && is_leap_eve(&ns_to_datetime(ts_ns)) {
        leap_pending
    } else {
        0
    }
}

/// `true` once a management refresh is due: at least [`MGMT_REFRESH_INTERVAL_NS`]
/// since the last successful round, checked every iteration regardless of
/// sampler rate so it can't starve under a fast PHC/SYS sampler.
pub fn mgmt_refresh_due(now_ns: i64, mgmt_last_ok_ns: i64) -> bool {
    now_ns - mgmt_last_ok_ns >= MGMT_REFRESH_INTERVAL_NS
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeapOutcome {
    Proceed,
    /// The sample falls in the ambiguous second; the control loop must
    /// discard it without calling the servo.
    Suspend,
}

pub struct LeapCoordinator {
    kernel_leap_enabled: bool,
}

impl LeapCoordinator {
    pub fn new(kernel_leap_enabled: bool) -> Self {
        LeapCoordinator { kernel_leap_enabled }
    }

    /// Runs one round of leap bookkeeping ahead of a servo update.
    ///
    /// `wall_ts_ns` is the caller's best wall-clock reading for this
    /// iteration: a direct system-clock read when the slave isn't
    /// `SystemRealtime`, or — when it is, and the servo is about to step —
    /// the *target* wall time `sample_ts - corrected_offset`, since the
    /// slave's own clock hasn't moved there yet.
    pub fn process<C: ClockAdjust>(
        &self,
        clock: &C,
        realtime_clockid: libc::clockid_t,
        slave_is_realtime: bool,
        wall_ts_ns: i64,
        leap_pending: i8,
        leap_applied: &mut i8,
        sync_offset_seconds: &mut i32,
    ) -> Result<LeapOutcome, SessionError> {
        if leap_pending == 0 && *leap_applied == 0 {
            return Ok(LeapOutcome::Proceed);
        }

        if is_utc_ambiguous(wall_ts_ns, leap_pending) {
            return Ok(LeapOutcome::Suspend);
        }

        let target = target_leap(wall_ts_ns, leap_pending);
        if target != *leap_applied {
            if *leap_applied != 0 && target == 0 {
                *sync_offset_seconds += *leap_applied as i32;
            }
            if slave_is_realtime && self.kernel_leap_enabled {
                clock.set_leap(realtime_clockid, target)?;
            }
            *leap_applied = target;
        }

        Ok(LeapOutcome::Proceed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClockAdjust;

    fn ymd_hms_ns(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> i64 {
        let dt = chrono::NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, s)
            .unwrap();
        dt.and_utc().timestamp_nanos_opt().unwrap()
    }

    #[test]
    fn ambiguous_only_on_leap_eve_last_second() {
        let ts = ymd_hms_ns(2016, 12, 31, 23, 59, 59);
        assert!(is_utc_ambiguous(ts, 1));

        let ts_one_before = ymd_hms_ns(2016, 12, 31, 23, 59, 58);
        assert!(!is_utc_ambiguous(ts_one_before, 1));

        let ordinary_midnight = ymd_hms_ns(2016, 3, 31, 23, 59, 59);
        assert!(!is_utc_ambiguous(ordinary_midnight, 1));
    }

    #[test]
    fn not_ambiguous_when_no_leap_pending() {
        let ts = ymd_hms_ns(2016, 12, 31, 23, 59, 59);
        assert!(!is_utc_ambiguous(ts, 0));
    }

    #[test]
    fn target_leap_armed_throughout_eve_day_clear_after() {
        let thirty_s_before = ymd_hms_ns(2016, 12, 31, 23, 59, 30);
        assert_eq!(target_leap(thirty_s_before, 1), 1);

        let next_day = ymd_hms_ns(2017, 1, 1, 0, 0, 0);
        assert_eq!(target_leap(next_day, 1), 0);
    }

    #[test]
    fn refresh_due_after_interval_elapses() {
        assert!(!mgmt_refresh_due(59 * NS_PER_SEC, 0));
        assert!(mgmt_refresh_due(60 * NS_PER_SEC, 0));
    }

    #[test]
    fn no_op_when_nothing_pending_or_applied() {
        let clock = MockClockAdjust::new();
        let coord = LeapCoordinator::new(true);
        let mut leap_applied = 0i8;
        let mut sync_offset_seconds = 37i32;
        let outcome = coord
            .process(
                &clock,
                libc::CLOCK_REALTIME,
                true,
                ymd_hms_ns(2016, 6, 1, 12, 0, 0),
                0,
                &mut leap_applied,
                &mut sync_offset_seconds,
            )
            .unwrap();
        assert_eq!(outcome, LeapOutcome::Proceed);
        assert_eq!(leap_applied, 0);
        assert_eq!(sync_offset_seconds, 37);
    }

    #[test]
    fn leap_insertion_sequence_arms_suspends_and_unlatches() {
        let coord = LeapCoordinator::new(true);
        let mut leap_applied = 0i8;
        let mut sync_offset_seconds = 37i32;

        // 30s before midnight: flag armed.
        let mut clock = MockClockAdjust::new();
        clock
            .expect_set_leap()
            .withf(|_, dir| *dir == 1)
            .times(1)
            .returning(|_, _| Ok(()));
        let outcome = coord
            .process(
                &clock,
                libc::CLOCK_REALTIME,
                true,
                ymd_hms_ns(2016, 12, 31, 23, 59, 30),
                1,
                &mut leap_applied,
                &mut sync_offset_seconds,
            )
            .unwrap();
        assert_eq!(outcome, LeapOutcome::Proceed);
        assert_eq!(leap_applied, 1);

        // The ambiguous second: discard.
        let clock = MockClockAdjust::new();
        let outcome = coord
            .process(
                &clock,
                libc::CLOCK_REALTIME,
                true,
                ymd_hms_ns(2016, 12, 31, 23, 59, 59),
                1,
                &mut leap_applied,
                &mut sync_offset_seconds,
            )
            .unwrap();
        assert_eq!(outcome, LeapOutcome::Suspend);
        assert_eq!(leap_applied, 1);

        // After midnight, management has cleared leap_pending: unlatch and
        // preserve continuity by folding the elapsed leap into the offset.
        let mut clock = MockClockAdjust::new();
        clock
            .expect_set_leap()
            .withf(|_, dir| *dir == 0)
            .times(1)
            .returning(|_, _| Ok(()));
        let outcome = coord
            .process(
                &clock,
                libc::CLOCK_REALTIME,
                true,
                ymd_hms_ns(2017, 1, 1, 0, 0, 0),
                0,
                &mut leap_applied,
                &mut sync_offset_seconds,
            )
            .unwrap();
        assert_eq!(outcome, LeapOutcome::Proceed);
        assert_eq!(leap_applied, 0);
        assert_eq!(sync_offset_seconds, 38);
    }

    #[test]
    fn idempotent_when_applied_twice_with_same_inputs() {
        let mut clock = MockClockAdjust::new();
        clock.expect_set_leap().times(1).returning(|_, _| Ok(()));
        let coord = LeapCoordinator::new(true);
        let mut leap_applied = 0i8;
        let mut sync_offset_seconds = 37i32;
        let ts = ymd_hms_ns(2016, 12, 31, 12, 0, 0);

        coord
            .process(&clock, libc::CLOCK_REALTIME, true, ts, 1, &mut leap_applied, &mut sync_offset_seconds)
            .unwrap();
        // Second call with identical inputs must not call set_leap again
        // (mockall's `times(1)` on the first clock enforces that), and must
        // leave leap_applied unchanged.
        coord
            .process(&clock, libc::CLOCK_REALTIME, true, ts, 1, &mut leap_applied, &mut sync_offset_seconds)
            .unwrap();
        assert_eq!(leap_applied, 1);
    }

    #[test]
    fn phc_slave_never_touches_kernel_leap_flag() {
        let clock = MockClockAdjust::new(); // no expectations: must not be called
        let coord = LeapCoordinator::new(true);
        let mut leap_applied = 0i8;
        let mut sync_offset_seconds = 37i32;
        coord
            .process(
                &clock,
                libc::CLOCK_REALTIME,
                false,
                ymd_hms_ns(2016, 12, 31, 23, 59, 30),
                1,
                &mut leap_applied,
                &mut sync_offset_seconds,
            )
            .unwrap();
        // Not SystemRealtime: leap_applied still tracks the canonical target
        // so sync_offset_seconds bookkeeping stays correct even though no
        // kernel call was made.
        assert_eq!(leap_applied, 1);
    }
}
