//! Proportional-integral servo with an explicit step/lock state machine.
//!
//! Unlike a bare PI loop, a catastrophic offset must not be chased by
//! frequency steering alone — it needs a clock step. `Servo::sample` makes
//! that decision explicit via [`ServoState`] instead of letting the caller
//! infer it from the magnitude of the returned frequency.

use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoState {
    /// No sample has been processed yet.
    Unlocked,
    /// This sample's offset exceeded the step threshold; the caller must
    /// step the clock by `-offset_ns` and apply the returned frequency.
    Jump,
    /// Steady-state frequency steering.
    Locked,
}

#[derive(Debug, Clone, Copy)]
pub struct ServoConfig {
    pub kp: f64,
    pub ki: f64,
    pub max_ppb: f64,
    /// Nanoseconds; 0 disables stepping entirely (pure frequency steering).
    pub step_threshold_ns: i64,
}

impl Default for ServoConfig {
    fn default() -> Self {
        ServoConfig {
            kp: 0.7,
            ki: 0.3,
            max_ppb: 512_000.0,
            step_threshold_ns: 0,
        }
    }
}

pub struct Servo {
    config: ServoConfig,
    initial_freq_ppb: f64,
    integral_ppb: f64,
    state: ServoState,
}

impl Servo {
    /// `initial_freq_ppb` seeds the integrator with the slave's
    /// already-configured frequency, so a restart doesn't yank the clock
    /// back to 0 ppb before the first sample arrives.
    pub fn new(config: ServoConfig, initial_freq_ppb: f64) -> Self {
        Servo {
            config,
            initial_freq_ppb,
            integral_ppb: initial_freq_ppb,
            state: ServoState::Unlocked,
        }
    }

    pub fn state(&self) -> ServoState {
        self.state
    }

    pub fn reset(&mut self) {
        self.integral_ppb = self.initial_freq_ppb;
        self.state = ServoState::Unlocked;
    }

    /// `offset_ns`: positive means the slave is ahead of the master, i.e.
    /// must move backwards to align.
    pub fn sample(&mut self, offset_ns: i64) -> (f64, ServoState) {
        if self.config.step_threshold_ns > 0 && offset_ns.abs() >= self.config.step_threshold_ns {
            self.integral_ppb = self.initial_freq_ppb;
            self.state = ServoState::Jump;
            let freq = self.clamp(self.integral_ppb);
            debug!("servo: offset={offset_ns}ns >= step threshold, jump, freq={freq:.1}ppb");
            return (freq, self.state);
        }

        let error = -(offset_ns as f64);
        let proportional = error * self.config.kp;
        let candidate_integral = self.integral_ppb + error * self.config.ki;
        let raw_freq = proportional + candidate_integral;
        let freq = self.clamp(raw_freq);

        // Anti-windup: only commit the integral step when the output isn't saturated.
        if freq == raw_freq {
            self.integral_ppb = candidate_integral;
        }

        self.state = ServoState::Locked;
        debug!(
            "servo: offset={offset_ns}ns P={proportional:.1} I={:.1} freq={freq:.1}ppb",
            self.integral_ppb
        );
        (freq, self.state)
    }

    fn clamp(&self, freq: f64) -> f64 {
        freq.clamp(-self.config.max_ppb, self.config.max_ppb)
    }
}
