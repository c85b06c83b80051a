use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use phcsyncd::clock::linux::LinuxClockAdjust;
use phcsyncd::clock::{ClockAdjust, ClockHandle};
use phcsyncd::config::{Args, SamplerMode, SessionConfig};
use phcsyncd::error::SessionError;
use phcsyncd::ifdiscovery;
use phcsyncd::mgmt::{ManagementClient, ManagementTransport};
use phcsyncd::mgmt_transport::UdsManagementTransport;
use phcsyncd::sampler::{PhcCrossSampler, PpsSampler, Sampler, SysOffSampler};
use phcsyncd::servo::Servo;
use phcsyncd::session::{ControlLoop, StepOutcome, SyncSession};
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn init_logging(log_level: &str, verbose: u8) {
    let base = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);
    let level = match verbose {
        0 => base,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();
}

fn notify_ready(no_syslog: bool) {
    if no_syslog {
        return;
    }
    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        // Harmless outside a systemd unit (ENOENT: no NOTIFY_SOCKET).
        log::debug!("sd_notify readiness signal skipped: {e}");
    }
}

/// Opens the PPS character device and leaks its file descriptor for the
/// process lifetime; `phcsyncd` is a single long-lived daemon, never a
/// short-lived tool, so there is no point it should ever want to close this.
fn open_pps_fd(path: &str) -> Result<i32, SessionError> {
    let file = File::open(path).map_err(|e| {
        SessionError::ConfigurationInvalid(format!("cannot open PPS device {path}: {e}"))
    })?;
    let fd = file.as_raw_fd();
    std::mem::forget(file);
    Ok(fd)
}

/// `-1`/`0`/`+1` sign by which `sync_offset_seconds` corrects a raw offset,
/// auto-detected from which end is the kernel's UTC-backed realtime clock
/// and which is a TAI-like PHC. Zero when neither end is `SystemRealtime`
/// (both are PHCs, or pure PPS where there's no master wall-clock side).
fn detect_sync_offset_direction(slave_is_realtime: bool, master_is_realtime: Option<bool>) -> i8 {
    match master_is_realtime {
        None => 0,
        Some(master_rt) => {
            if slave_is_realtime && !master_rt {
                1
            } else if !slave_is_realtime && master_rt {
                -1
            } else {
                0
            }
        }
    }
}

enum ChosenSampler {
    Pps(PpsSampler<LinuxClockAdjust>),
    SysOff(SysOffSampler<LinuxClockAdjust>),
    PhcCross(PhcCrossSampler<LinuxClockAdjust>),
}

impl Sampler for ChosenSampler {
    fn sample(&mut self) -> phcsyncd::sampler::Outcome<phcsyncd::sampler::SampleTuple> {
        match self {
            ChosenSampler::Pps(s) => s.sample(),
            ChosenSampler::SysOff(s) => s.sample(),
            ChosenSampler::PhcCross(s) => s.sample(),
        }
    }
}

/// Resolves which device string to open as the master clock for a
/// non-PPS sampler: an explicit `--master` wins, otherwise `--interface`
/// is auto-discovered to its backing PHC.
fn resolve_master_device(cfg: &SessionConfig) -> Result<String, SessionError> {
    if let Some(master) = &cfg.clock.master {
        return Ok(master.clone());
    }
    if let Some(interface) = &cfg.clock.interface {
        return ifdiscovery::discover_phc_device(interface);
    }
    Err(SessionError::ConfigurationInvalid(
        "no master clock source resolved".into(),
    ))
}

fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = SessionConfig::from_args(args).context("invalid configuration")?;

    init_logging(&cfg.log_level, cfg.verbose);

    let clock = Rc::new(LinuxClockAdjust::new());
    let clock_dyn: Rc<dyn ClockAdjust> = clock.clone();

    let slave = ClockHandle::open(&cfg.clock.slave).context("opening slave clock")?;
    let slave_is_realtime = slave.is_system_realtime();
    let slave_id = slave.clockid();

    let (sampler, source_label, master_is_realtime): (ChosenSampler, &'static str, Option<bool>) =
        match cfg.sampler.mode {
            SamplerMode::Pps => {
                let pps_path = cfg
                    .clock
                    .master_pps
                    .as_deref()
                    .expect("validated: PPS mode implies master_pps is set");
                let fd = open_pps_fd(pps_path)?;

                match &cfg.clock.master {
                    Some(master_dev) => {
                        let master = ClockHandle::open(master_dev)
                            .context("opening auxiliary PHC for hybrid PPS")?;
                        let sampler = PpsSampler::hybrid(
                            fd,
                            clock.clone(),
                            master.clockid(),
                            slave_id,
                            cfg.sampler.readings,
                        );
                        (ChosenSampler::Pps(sampler), "pps", Some(master.is_system_realtime()))
                    }
                    None => {
                        let sampler = PpsSampler::pure(fd);
                        // Pure PPS has no master wall-clock reference; the
                        // sync offset is meaningless without one.
                        (ChosenSampler::Pps(sampler), "pps", None)
                    }
                }
            }
            SamplerMode::ClockCross => {
                let master_device = resolve_master_device(&cfg)?;
                let master = ClockHandle::open(&master_device).context("opening master clock")?;
                let master_is_realtime = master.is_system_realtime();

                if slave_is_realtime && !master_is_realtime {
                    if let Some(master_fd) = master.raw_fd() {
                        let sysoff = SysOffSampler::probe(
                            clock.clone(),
                            master_fd,
                            cfg.sampler.readings,
                            master.clockid(),
                            slave_id,
                        );
                        let label = sysoff.source_label();
                        (ChosenSampler::SysOff(sysoff), label, Some(master_is_realtime))
                    } else {
                        let sampler = PhcCrossSampler::new(
                            clock.clone(),
                            master.clockid(),
                            slave_id,
                            cfg.sampler.readings,
                        );
                        (ChosenSampler::PhcCross(sampler), "phc", Some(master_is_realtime))
                    }
                } else {
                    let sampler =
                        PhcCrossSampler::new(clock.clone(), master.clockid(), slave_id, cfg.sampler.readings);
                    (ChosenSampler::PhcCross(sampler), "phc", Some(master_is_realtime))
                }
            }
        };

    let get_utc_offset = cfg.management.forced_offset_seconds.is_none();
    let wait_sync = cfg.management.wait_sync;

    // A forced `-O` offset always corrects in the negative direction
    // (matches phc2sys.c's `case 'O':` hardcoding `sync_offset_direction =
    // -1`); otherwise auto-detection only ever runs as part of the
    // wait-sync path, and an unforced offset with no wait-sync leaves the
    // direction at 0 (no correction applied).
    let sync_offset_direction = if cfg.management.forced_offset_seconds.is_some() {
        -1
    } else if wait_sync {
        detect_sync_offset_direction(slave_is_realtime, master_is_realtime)
    } else {
        0
    };

    let mgmt: Option<ManagementClient<Box<dyn ManagementTransport>>> = if wait_sync || get_utc_offset {
        let transport = UdsManagementTransport::connect(&cfg.management.socket_path)
            .context("connecting to management socket")?;
        Some(ManagementClient::new(
            Box::new(transport) as Box<dyn ManagementTransport>,
            wait_sync,
            get_utc_offset,
        ))
    } else {
        None
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
        })
        .context("installing signal handler")?;
    }

    let mut mgmt = mgmt;
    if wait_sync {
        info!("waiting for management channel to report a synchronized port");
        if let Some(client) = mgmt.as_mut() {
            loop {
                if shutdown.load(Ordering::SeqCst) {
                    return Ok(());
                }
                match client.poll_round(1000) {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(SessionError::MgmtTimeout) => {}
                    Err(e) => warn!("management wait-sync round failed: {e}"),
                }
            }
        }
    }

    let sync_offset_seconds = cfg.management.forced_offset_seconds.unwrap_or(0);
    let initial_freq = clock_dyn
        .get_freq_ppb(slave_id)
        .context("reading slave clock's current frequency")?;
    let servo = Servo::new(cfg.servo, initial_freq);

    let session = SyncSession::new(
        source_label,
        servo,
        sync_offset_seconds,
        sync_offset_direction,
        cfg.clock.kernel_leap_enabled,
        cfg.stats.stats_window,
        mgmt,
    );

    let mut control_loop = ControlLoop::new(
        session,
        Box::new(sampler),
        clock_dyn.clone(),
        slave_id,
        slave_is_realtime,
        cfg.clock.kernel_leap_enabled,
    );
    control_loop.bootstrap().context("startup bootstrap")?;

    notify_ready(cfg.no_syslog);
    info!("{source_label} sync running, slave={}", cfg.clock.slave);

    let rate_limited = !matches!(cfg.sampler.mode, SamplerMode::Pps);
    let sleep_dur = Duration::from_secs_f64(1.0 / cfg.sampler.rate as f64);

    while !shutdown.load(Ordering::SeqCst) {
        if rate_limited {
            thread::sleep(sleep_dur);
        }
        match control_loop.step() {
            Ok(StepOutcome::Applied(_, _)) | Ok(StepOutcome::Skipped) => {}
            Err(e) if e.is_fatal() => {
                error!("fatal error, exiting: {e}");
                break;
            }
            Err(e) => {
                error!("recoverable error, continuing: {e}");
            }
        }
    }

    if slave_is_realtime && cfg.clock.kernel_leap_enabled && control_loop.session.leap_applied != 0 {
        if let Err(e) = clock_dyn.set_leap(slave_id, 0) {
            warn!("failed to clear kernel leap flag on exit: {e}");
        }
    }

    Ok(())
}
