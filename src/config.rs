//! Command surface and the validated session configuration it produces.
//!
//! `Args` is what `clap` parses straight from `env::args()`; it is never
//! passed any deeper than [`SessionConfig::from_args`]. Everything past that
//! function sees only the validated, typed configuration — so a unit test
//! can exercise every rejection path without touching a process boundary.

use crate::error::SessionError;
use crate::servo::ServoConfig;
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "phcsyncd", about = "Synchronizes a slave clock to a PHC, PPS, or master clock")]
pub struct Args {
    /// Slave clock: a /dev/ptpN path or the name of the realtime system clock.
    #[arg(short = 'c', long, default_value = "CLOCK_REALTIME")]
    pub slave: String,

    /// Master clock: a /dev/ptpN path or the name of the realtime system clock.
    #[arg(short = 's', long)]
    pub master: Option<String>,

    /// PPS character device to discipline the slave from.
    #[arg(short = 'd', long = "master-pps")]
    pub master_pps: Option<String>,

    /// Network interface whose PHC should be used as master.
    #[arg(short = 'i', long)]
    pub interface: Option<String>,

    /// Proportional gain.
    #[arg(short = 'P', long, default_value_t = ServoConfig::default().kp)]
    pub kp: f64,

    /// Integral gain.
    #[arg(short = 'I', long, default_value_t = ServoConfig::default().ki)]
    pub ki: f64,

    /// Step threshold in seconds; 0 disables stepping (pure frequency steering).
    #[arg(short = 'S', long, default_value_t = 0.0)]
    pub step: f64,

    /// Sampling rate in Hz for rate-limited samplers.
    #[arg(short = 'R', long, default_value_t = 1)]
    pub rate: u32,

    /// Number of cross-sampling trials per measurement.
    #[arg(short = 'N', long, default_value_t = 5)]
    pub readings: u32,

    /// Forces the UTC offset (seconds) and disables management-derived updates.
    #[arg(short = 'O', long)]
    pub offset: Option<i32>,

    /// Stats aggregation window, in samples; 0 disables (per-sample logging instead).
    #[arg(short = 'u', long = "stats-window", default_value_t = 0)]
    pub stats_window: u32,

    /// Wait for the management channel to report a synchronized port before running.
    #[arg(short = 'w', long = "wait-sync", default_value_t = false)]
    pub wait_sync: bool,

    /// Let the servo absorb leap seconds instead of the kernel.
    #[arg(short = 'x', long = "servo-leap", default_value_t = false)]
    pub servo_leap: bool,

    /// Minimum log level.
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    pub log_level: String,

    /// Increase log verbosity; may be repeated.
    #[arg(short = 'm', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress the systemd/syslog readiness notification.
    #[arg(short = 'q', long = "no-syslog", default_value_t = false)]
    pub no_syslog: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerMode {
    Pps,
    ClockCross,
}

#[derive(Debug, Clone)]
pub struct SamplerConfig {
    pub mode: SamplerMode,
    pub rate: u32,
    pub readings: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct StatsConfig {
    pub stats_window: u32,
}

#[derive(Debug, Clone)]
pub struct ManagementConfig {
    pub wait_sync: bool,
    pub forced_offset_seconds: Option<i32>,
    pub socket_path: String,
}

#[derive(Debug, Clone)]
pub struct ClockConfig {
    pub slave: String,
    pub master: Option<String>,
    pub master_pps: Option<String>,
    pub interface: Option<String>,
    pub kernel_leap_enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub servo: ServoConfig,
    pub sampler: SamplerConfig,
    pub stats: StatsConfig,
    pub management: ManagementConfig,
    pub clock: ClockConfig,
    pub log_level: String,
    pub verbose: u8,
    pub no_syslog: bool,
}

const DEFAULT_MGMT_SOCKET: &str = "/var/run/phcsyncd";

impl SessionConfig {
    /// Pure validation: no filesystem or device access, just the rules in
    /// the external interfaces section. Every rejection returns
    /// `ConfigurationInvalid` naming the offending combination.
    pub fn from_args(args: Args) -> Result<Self, SessionError> {
        if args.master.is_none() && args.master_pps.is_none() && args.interface.is_none() {
            return Err(SessionError::ConfigurationInvalid(
                "at least one of --master, --master-pps or --interface must be given".into(),
            ));
        }

        if args.master_pps.is_some() && !args.slave.eq_ignore_ascii_case("CLOCK_REALTIME") {
            return Err(SessionError::ConfigurationInvalid(
                "--master-pps requires the slave to be the realtime system clock".into(),
            ));
        }

        if args.master_pps.is_some() && args.interface.is_some() {
            return Err(SessionError::ConfigurationInvalid(
                "--master-pps and --interface are mutually exclusive".into(),
            ));
        }

        if args.readings < 1 {
            return Err(SessionError::ConfigurationInvalid("--readings must be >= 1".into()));
        }

        if args.rate < 1 {
            return Err(SessionError::ConfigurationInvalid("--rate must be >= 1".into()));
        }

        let mode = if args.master_pps.is_some() {
            SamplerMode::Pps
        } else {
            SamplerMode::ClockCross
        };

        let step_threshold_ns = (args.step * 1e9).round() as i64;

        Ok(SessionConfig {
            servo: ServoConfig {
                kp: args.kp,
                ki: args.ki,
                max_ppb: ServoConfig::default().max_ppb,
                step_threshold_ns,
            },
            sampler: SamplerConfig {
                mode,
                rate: args.rate,
                readings: args.readings,
            },
            stats: StatsConfig {
                stats_window: args.stats_window,
            },
            management: ManagementConfig {
                wait_sync: args.wait_sync,
                forced_offset_seconds: args.offset,
                socket_path: DEFAULT_MGMT_SOCKET.to_string(),
            },
            clock: ClockConfig {
                slave: args.slave,
                master: args.master,
                master_pps: args.master_pps,
                interface: args.interface,
                // `servo_leap` inverts the default (kernel handles leaps).
                kernel_leap_enabled: !args.servo_leap,
            },
            log_level: args.log_level,
            verbose: args.verbose,
            no_syslog: args.no_syslog,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            slave: "CLOCK_REALTIME".to_string(),
            master: Some("/dev/ptp0".to_string()),
            master_pps: None,
            interface: None,
            kp: 0.7,
            ki: 0.3,
            step: 0.0,
            rate: 1,
            readings: 5,
            offset: None,
            stats_window: 0,
            wait_sync: false,
            servo_leap: false,
            log_level: "info".to_string(),
            verbose: 0,
            no_syslog: false,
        }
    }

    #[test]
    fn rejects_no_master_source() {
        let mut args = base_args();
        args.master = None;
        let err = SessionConfig::from_args(args).unwrap_err();
        assert!(matches!(err, SessionError::ConfigurationInvalid(_)));
    }

    #[test]
    fn accepts_minimal_valid_config() {
        let cfg = SessionConfig::from_args(base_args()).unwrap();
        assert_eq!(cfg.sampler.mode, SamplerMode::ClockCross);
        assert!(cfg.clock.kernel_leap_enabled);
    }

    #[test]
    fn master_pps_requires_realtime_slave() {
        let mut args = base_args();
        args.master = None;
        args.master_pps = Some("/dev/pps0".to_string());
        args.slave = "/dev/ptp1".to_string();
        let err = SessionConfig::from_args(args).unwrap_err();
        assert!(matches!(err, SessionError::ConfigurationInvalid(_)));
    }

    #[test]
    fn master_pps_with_realtime_slave_selects_pps_mode() {
        let mut args = base_args();
        args.master = None;
        args.master_pps = Some("/dev/pps0".to_string());
        let cfg = SessionConfig::from_args(args).unwrap();
        assert_eq!(cfg.sampler.mode, SamplerMode::Pps);
    }

    #[test]
    fn master_pps_and_interface_are_mutually_exclusive() {
        let mut args = base_args();
        args.master = None;
        args.master_pps = Some("/dev/pps0".to_string());
        args.interface = Some("eth0".to_string());
        let err = SessionConfig::from_args(args).unwrap_err();
        assert!(matches!(err, SessionError::ConfigurationInvalid(_)));
    }

    #[test]
    fn rejects_zero_readings_and_rate() {
        let mut args = base_args();
        args.readings = 0;
        assert!(SessionConfig::from_args(args).is_err());

        let mut args = base_args();
        args.rate = 0;
        assert!(SessionConfig::from_args(args).is_err());
    }

    #[test]
    fn servo_leap_flag_inverts_kernel_leap_enabled() {
        let mut args = base_args();
        args.servo_leap = true;
        let cfg = SessionConfig::from_args(args).unwrap();
        assert!(!cfg.clock.kernel_leap_enabled);
    }

    #[test]
    fn step_seconds_converted_to_nanoseconds() {
        let mut args = base_args();
        args.step = 0.5;
        let cfg = SessionConfig::from_args(args).unwrap();
        assert_eq!(cfg.servo.step_threshold_ns, 500_000_000);
    }

    #[test]
    fn forced_offset_is_carried_through() {
        let mut args = base_args();
        args.offset = Some(37);
        let cfg = SessionConfig::from_args(args).unwrap();
        assert_eq!(cfg.management.forced_offset_seconds, Some(37));
    }
}
