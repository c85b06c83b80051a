//! Kernel-assisted atomic PHC/system cross-sample (`PTP_SYS_OFFSET`), with a
//! fallback to [`PhcCrossSampler`] on kernels/drivers that don't support it.

use super::{Outcome, PhcCrossSampler, SampleTuple, Sampler};
use crate::clock::linux::sysoff_measure;
use crate::clock::ClockAdjust;
use crate::error::SessionError;
use std::os::unix::io::RawFd;
use std::rc::Rc;

enum Strategy<C: ClockAdjust> {
    Ioctl { fd: RawFd, n_samples: u32 },
    Fallback(PhcCrossSampler<C>),
}

pub struct SysOffSampler<C: ClockAdjust> {
    strategy: Strategy<C>,
}

impl<C: ClockAdjust> SysOffSampler<C> {
    /// `"sys"` when the kernel ioctl is in use, `"phc"` once it has fallen
    /// back to cross-sampling — lets the caller report an accurate
    /// `source_label` without duplicating the probe.
    pub fn source_label(&self) -> &'static str {
        match &self.strategy {
            Strategy::Ioctl { .. } => "sys",
            Strategy::Fallback(_) => "phc",
        }
    }

    /// Probes `fd` once; if the ioctl is unsupported, builds the PHC
    /// cross-sampling fallback instead. `master_id`/`slave_id` are only used
    /// by the fallback path.
    pub fn probe(
        clock: Rc<C>,
        fd: RawFd,
        n_samples: u32,
        master_id: libc::clockid_t,
        slave_id: libc::clockid_t,
    ) -> Self {
        match sysoff_measure(fd, n_samples) {
            Ok(_) => SysOffSampler {
                strategy: Strategy::Ioctl { fd, n_samples },
            },
            Err(_) => {
                log::info!("PTP_SYS_OFFSET unsupported, falling back to PHC cross-sampling");
                SysOffSampler {
                    strategy: Strategy::Fallback(PhcCrossSampler::new(
                        clock, master_id, slave_id, n_samples,
                    )),
                }
            }
        }
    }

    fn read_once(&self) -> Result<SampleTuple, SessionError> {
        match &self.strategy {
            Strategy::Ioctl { fd, n_samples } => {
                let reading = sysoff_measure(*fd, *n_samples)?;
                Ok(SampleTuple {
                    offset_ns: reading.offset_ns,
                    timestamp_ns: reading.sys_ts_ns,
                    delay_ns: reading.delay_ns,
                })
            }
            Strategy::Fallback(phc) => phc.read_once(),
        }
    }
}

impl<C: ClockAdjust> Sampler for SysOffSampler<C> {
    fn sample(&mut self) -> Outcome<SampleTuple> {
        match self.read_once() {
            Ok(tuple) => Outcome::Proceed(tuple),
            Err(e) => {
                log::warn!("sysoff sample failed: {e}");
                Outcome::Skip
            }
        }
    }
}
