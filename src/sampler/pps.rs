//! PPS edge sampling, pure or hybrid with an auxiliary PHC for whole-second
//! recovery.

use super::{Outcome, PhcCrossSampler, SampleTuple, Sampler};
use crate::clock::linux::read_pps;
use crate::clock::ClockAdjust;
use crate::error::SessionError;
use std::os::unix::io::RawFd;
use std::rc::Rc;

const NS_PER_SEC: i64 = 1_000_000_000;
/// Maximum disagreement, in ns, tolerated between the PPS edge and the
/// auxiliary PHC's view of the current second before a hybrid sample is
/// discarded.
pub const PHC_PPS_OFFSET_LIMIT: i64 = 10_000_000;

pub struct PpsSampler<C: ClockAdjust> {
    fd: RawFd,
    aux_phc: Option<PhcCrossSampler<C>>,
}

impl<C: ClockAdjust> PpsSampler<C> {
    pub fn pure(fd: RawFd) -> Self {
        PpsSampler { fd, aux_phc: None }
    }

    pub fn hybrid(
        fd: RawFd,
        clock: Rc<C>,
        phc_id: libc::clockid_t,
        slave_id: libc::clockid_t,
        readings: u32,
    ) -> Self {
        PpsSampler {
            fd,
            aux_phc: Some(PhcCrossSampler::new(clock, phc_id, slave_id, readings)),
        }
    }

    pub fn is_pure(&self) -> bool {
        self.aux_phc.is_none()
    }

    fn read_once(&self) -> Result<Option<SampleTuple>, SessionError> {
        let ts_pps = read_pps(self.fd)?;

        let mut offset = ts_pps.rem_euclid(NS_PER_SEC);
        if offset > NS_PER_SEC / 2 {
            offset -= NS_PER_SEC;
        }

        let Some(aux) = &self.aux_phc else {
            return Ok(Some(SampleTuple {
                offset_ns: offset,
                timestamp_ns: ts_pps,
                delay_ns: -1,
            }));
        };

        let phc = aux.read_once()?;
        let phc_ts_in_phc = phc.timestamp_ns - phc.offset_ns;
        let second_phase = phc_ts_in_phc.rem_euclid(NS_PER_SEC);

        if second_phase > PHC_PPS_OFFSET_LIMIT {
            log::warn!(
                "PPS/PHC second mismatch: {second_phase}ns > {PHC_PPS_OFFSET_LIMIT}ns, skipping"
            );
            return Ok(None);
        }

        let phc_ts_floor = (phc_ts_in_phc.div_euclid(NS_PER_SEC)) * NS_PER_SEC;
        Ok(Some(SampleTuple {
            offset_ns: ts_pps - phc_ts_floor,
            timestamp_ns: ts_pps,
            delay_ns: -1,
        }))
    }
}

impl<C: ClockAdjust> Sampler for PpsSampler<C> {
    fn sample(&mut self) -> Outcome<SampleTuple> {
        match self.read_once() {
            Ok(Some(tuple)) => Outcome::Proceed(tuple),
            Ok(None) => Outcome::Skip,
            Err(e) => {
                log::warn!("pps sample failed: {e}");
                Outcome::Skip
            }
        }
    }
}
