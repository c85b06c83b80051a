//! Interleaved cross-sampling of a master and slave clock.

use super::{Outcome, SampleTuple, Sampler};
use crate::clock::ClockAdjust;
use std::rc::Rc;

/// Reads `slave -> master -> slave` for each of `N` trials and keeps the one
/// with the tightest `t2 - t1` bracket, following the read_phc() algorithm:
/// `offset = t1 - t_master + interval/2`, `ts = t2`.
pub struct PhcCrossSampler<C: ClockAdjust> {
    clock: Rc<C>,
    master_id: libc::clockid_t,
    slave_id: libc::clockid_t,
    readings: u32,
}

impl<C: ClockAdjust> PhcCrossSampler<C> {
    pub fn new(clock: Rc<C>, master_id: libc::clockid_t, slave_id: libc::clockid_t, readings: u32) -> Self {
        PhcCrossSampler {
            clock,
            master_id,
            slave_id,
            readings: readings.max(1),
        }
    }

    pub fn read_once(&self) -> Result<SampleTuple, crate::error::SessionError> {
        let mut best_interval = i64::MAX;
        let mut best: Option<SampleTuple> = None;

        for _ in 0..self.readings {
            let t1 = self.clock.read_ns(self.slave_id)?;
            let tm = self.clock.read_ns(self.master_id)?;
            let t2 = self.clock.read_ns(self.slave_id)?;

            let interval = t2 - t1;
            if interval < best_interval {
                best_interval = interval;
                best = Some(SampleTuple {
                    offset_ns: t1 - tm + interval / 2,
                    timestamp_ns: t2,
                    delay_ns: interval,
                });
            }
        }

        best.ok_or_else(|| {
            crate::error::SessionError::SampleTransient("no PHC cross-sample trial completed".into())
        })
    }
}

impl<C: ClockAdjust> Sampler for PhcCrossSampler<C> {
    fn sample(&mut self) -> Outcome<SampleTuple> {
        match self.read_once() {
            Ok(tuple) => Outcome::Proceed(tuple),
            Err(e) => {
                log::warn!("phc cross-sample failed: {e}");
                Outcome::Skip
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClockAdjust;

    #[test]
    fn picks_trial_with_tightest_interval() {
        let mut mock = MockClockAdjust::new();
        // Trial 1: slave t1=100, master tm=1000000000, slave t2=300 -> interval 200
        // Trial 2: slave t1=400, master tm=1000000100, slave t2=450 -> interval 50 (tighter)
        let mut calls = vec![
            100i64, 1_000_000_000, 300, // trial 1: t1, tm, t2
            400, 1_000_000_100, 450, // trial 2
        ]
        .into_iter();
        mock.expect_read_ns().returning(move |_| Ok(calls.next().unwrap()));

        let mut sampler = PhcCrossSampler::new(Rc::new(mock), 0, 1, 2);
        match sampler.sample() {
            Outcome::Proceed(tuple) => {
                let interval = 50;
                assert_eq!(tuple.timestamp_ns, 450);
                assert_eq!(tuple.offset_ns, 400 - 1_000_000_100 + interval / 2);
            }
            _ => panic!("expected Proceed"),
        }
    }

    #[test]
    fn read_error_skips_the_sample() {
        let mut mock = MockClockAdjust::new();
        mock.expect_read_ns()
            .returning(|_| Err(crate::error::SessionError::SampleTransient("boom".into())));

        let mut sampler = PhcCrossSampler::new(Rc::new(mock), 0, 1, 3);
        assert!(matches!(sampler.sample(), Outcome::Skip));
    }
}
