//! `SyncSession` owns all state that persists across iterations; `ControlLoop`
//! is the orchestrator that drives a sampler, the leap coordinator and the
//! servo through one iteration at a time.

use crate::clock::ClockAdjust;
use crate::error::SessionError;
use crate::leap::{mgmt_refresh_due, LeapCoordinator, LeapOutcome};
use crate::mgmt::{ManagementClient, ManagementTransport};
use crate::sampler::{Outcome, SampleTuple, Sampler};
use crate::servo::{Servo, ServoState};
use crate::stats::StatsAggregator;
use std::rc::Rc;

const NS_PER_SEC: i64 = 1_000_000_000;

/// Per-iteration result the caller (typically `main`'s event loop) uses to
/// decide whether to log a stats summary and whether to keep running.
pub enum StepOutcome {
    /// A sample was fully consumed: `(freq_ppb, servo_state)`.
    Applied(f64, ServoState),
    /// The sample was discarded (sampler failure, leap ambiguity, mgmt
    /// round still pending); the loop should simply try again.
    Skipped,
}

pub struct SyncSession {
    pub source_label: &'static str,
    pub servo: Servo,
    pub servo_state: ServoState,
    pub sync_offset_seconds: i32,
    pub sync_offset_direction: i8,
    pub leap_pending: i8,
    pub leap_applied: i8,
    pub kernel_leap_enabled: bool,
    pub stats: StatsAggregator,
    pub mgmt: Option<ManagementClient<Box<dyn ManagementTransport>>>,
    pub mgmt_last_ok_ns: i64,
}

impl SyncSession {
    pub fn new(
        source_label: &'static str,
        servo: Servo,
        sync_offset_seconds: i32,
        sync_offset_direction: i8,
        kernel_leap_enabled: bool,
        stats_window: u32,
        mgmt: Option<ManagementClient<Box<dyn ManagementTransport>>>,
    ) -> Self {
        SyncSession {
            source_label,
            servo,
            servo_state: ServoState::Unlocked,
            sync_offset_seconds,
            sync_offset_direction,
            leap_pending: 0,
            leap_applied: 0,
            kernel_leap_enabled,
            stats: StatsAggregator::new(stats_window),
            mgmt,
            mgmt_last_ok_ns: 0,
        }
    }

    fn corrected_offset(&self, raw_offset_ns: i64) -> i64 {
        raw_offset_ns
            + (self.sync_offset_seconds as i64) * NS_PER_SEC * (self.sync_offset_direction as i64)
    }
}

pub struct ControlLoop {
    pub session: SyncSession,
    sampler: Box<dyn Sampler>,
    clock: Rc<dyn ClockAdjust>,
    leap: LeapCoordinator,
    slave_clockid: libc::clockid_t,
    slave_is_realtime: bool,
    mgmt_poll_timeout_ms: i32,
}

impl ControlLoop {
    pub fn new(
        session: SyncSession,
        sampler: Box<dyn Sampler>,
        clock: Rc<dyn ClockAdjust>,
        slave_clockid: libc::clockid_t,
        slave_is_realtime: bool,
        kernel_leap_enabled: bool,
    ) -> Self {
        ControlLoop {
            session,
            sampler,
            clock,
            leap: LeapCoordinator::new(kernel_leap_enabled),
            slave_clockid,
            slave_is_realtime,
            mgmt_poll_timeout_ms: 0,
        }
    }

    /// Runs the bootstrap sequence described in the control loop's startup
    /// notes: read the slave's current frequency and re-apply it (some
    /// drivers silently reset to 0 on open), and clear any stale kernel leap
    /// flag left over from a previous run.
    pub fn bootstrap(&mut self) -> Result<(), SessionError> {
        let current_freq = self.clock.get_freq_ppb(self.slave_clockid)?;
        self.clock.set_freq_ppb(self.slave_clockid, current_freq)?;
        if self.slave_is_realtime {
            self.clock.set_leap(self.slave_clockid, 0)?;
        }
        Ok(())
    }

    /// Runs the management refresh check (§4.7 "Refresh"): at most one
    /// non-blocking round per call, independent of sampler rate.
    fn refresh_management(&mut self, now_ns: i64) {
        let Some(mgmt) = self.session.mgmt.as_mut() else {
            return;
        };
        if !mgmt_refresh_due(now_ns, self.session.mgmt_last_ok_ns) {
            return;
        }
        match mgmt.poll_round(self.mgmt_poll_timeout_ms) {
            Ok(true) => {
                self.session.mgmt_last_ok_ns = now_ns;
                self.session.leap_pending = mgmt.time_properties.leap_pending;
                if mgmt.time_properties.sync_offset_seconds != 0 {
                    self.session.sync_offset_seconds = mgmt.time_properties.sync_offset_seconds;
                }
            }
            Ok(false) => {}
            Err(e) => log::warn!("management refresh failed: {e}"),
        }
    }

    /// Runs one iteration. Does not sleep or rate-limit; callers drive their
    /// own pacing (blocking PPS fetch, or a fixed-rate sleep between calls).
    pub fn step(&mut self) -> Result<StepOutcome, SessionError> {
        let tuple: SampleTuple = match self.sampler.sample() {
            Outcome::Proceed(t) => t,
            Outcome::Skip => return Ok(StepOutcome::Skipped),
            Outcome::Fatal(e) => return Err(e),
        };

        if let Err(e) = self.refresh_management_checked(tuple.timestamp_ns) {
            log::warn!("management refresh error: {e}");
        }

        let corrected_offset = self.session.corrected_offset(tuple.offset_ns);

        let wall_ts_ns = if !self.slave_is_realtime {
            self.clock.read_ns(libc::CLOCK_REALTIME)?
        } else if self.session.servo_state == ServoState::Unlocked {
            tuple.timestamp_ns - corrected_offset
        } else {
            tuple.timestamp_ns
        };

        let leap_outcome = self.leap.process(
            &*self.clock,
            self.slave_clockid,
            self.slave_is_realtime,
            wall_ts_ns,
            self.session.leap_pending,
            &mut self.session.leap_applied,
            &mut self.session.sync_offset_seconds,
        )?;

        if leap_outcome == LeapOutcome::Suspend {
            log::info!("sample discarded: ambiguous UTC second at {wall_ts_ns}ns");
            return Ok(StepOutcome::Skipped);
        }

        let (freq_ppb, state) = self.session.servo.sample(corrected_offset);
        self.session.servo_state = state;

        match state {
            ServoState::Jump => {
                self.clock.step_clock(self.slave_clockid, -corrected_offset)?;
                self.clock.set_freq_ppb(self.slave_clockid, -freq_ppb)?;
            }
            ServoState::Locked => {
                self.clock.set_freq_ppb(self.slave_clockid, -freq_ppb)?;
            }
            ServoState::Unlocked => {}
        }

        if let Some(summary) = self.session.stats.push(corrected_offset, freq_ppb, tuple.delay_ns) {
            log::info!(
                "{} stats: rms_offset={:.1}ns max|offset|={:.1}ns mean_freq={:.1}ppb stddev_freq={:.1}ppb",
                self.session.source_label,
                summary.rms_offset_ns,
                summary.max_abs_offset_ns,
                summary.mean_freq_ppb,
                summary.stddev_freq_ppb,
            );
        } else if !self.session.stats.enabled() {
            log::info!(
                "{} offset={}ns freq={:.1}ppb state={:?}",
                self.session.source_label,
                corrected_offset,
                freq_ppb,
                state
            );
        }

        Ok(StepOutcome::Applied(freq_ppb, state))
    }

    fn refresh_management_checked(&mut self, now_ns: i64) -> Result<(), SessionError> {
        self.refresh_management(now_ns);
        Ok(())
    }
}
