//! Measurement strategies: each produces a [`SampleTuple`] from a pair of
//! clocks (or a PPS edge) by whatever means fits that source.

pub mod phc_cross;
pub mod pps;
pub mod sysoff;

use crate::error::SessionError;

/// `offset_ns` is what the slave must move *backwards* to align with the
/// master (positive ⇒ slave ahead). `delay_ns` is `-1` when the source has
/// no meaningful round-trip bound (e.g. pure PPS).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleTuple {
    pub offset_ns: i64,
    pub timestamp_ns: i64,
    pub delay_ns: i64,
}

/// Outcome of one sampler acquisition, matching the `Proceed | Skip | Fatal`
/// shape the control loop uses for every stage.
pub enum Outcome<T> {
    Proceed(T),
    Skip,
    Fatal(SessionError),
}

#[cfg_attr(test, mockall::automock)]
pub trait Sampler {
    fn sample(&mut self) -> Outcome<SampleTuple>;
}

pub use phc_cross::PhcCrossSampler;
pub use pps::PpsSampler;
pub use sysoff::SysOffSampler;
