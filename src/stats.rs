//! Windowed RMS/max/mean/stddev aggregation over offset, frequency and delay.

#[derive(Debug, Default, Clone, Copy)]
struct Accumulator {
    count: u64,
    sum: f64,
    sum_sq: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    fn add(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.sum_sq += value * value;
    }

    fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    fn rms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.sum_sq / self.count as f64).sqrt()
        }
    }

    fn stddev(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            let mean = self.mean();
            (self.sum_sq / self.count as f64 - mean * mean).max(0.0).sqrt()
        }
    }

    fn max_abs(&self) -> f64 {
        self.min.abs().max(self.max.abs())
    }

    fn reset(&mut self) {
        *self = Accumulator::default();
    }
}

/// Emitted every `stats_window` offset samples; see [`StatsAggregator::push`].
#[derive(Debug, Clone, Copy)]
pub struct StatsSummary {
    pub rms_offset_ns: f64,
    pub max_abs_offset_ns: f64,
    pub mean_freq_ppb: f64,
    pub stddev_freq_ppb: f64,
    pub delay: Option<(f64, f64)>, // (mean_ns, stddev_ns), only if any sample had delay >= 0
}

/// `window == 0` disables aggregation entirely; callers should log a
/// per-sample line instead of calling `push`.
pub struct StatsAggregator {
    window: u32,
    offset: Accumulator,
    freq: Accumulator,
    delay: Accumulator,
    saw_delay: bool,
}

impl StatsAggregator {
    pub fn new(window: u32) -> Self {
        StatsAggregator {
            window,
            offset: Accumulator::default(),
            freq: Accumulator::default(),
            delay: Accumulator::default(),
            saw_delay: false,
        }
    }

    pub fn enabled(&self) -> bool {
        self.window > 0
    }

    /// Feeds one sample. Returns `Some(summary)` and resets all accumulators
    /// once the offset accumulator reaches the configured window.
    pub fn push(&mut self, offset_ns: i64, freq_ppb: f64, delay_ns: i64) -> Option<StatsSummary> {
        self.offset.add(offset_ns as f64);
        self.freq.add(freq_ppb);
        if delay_ns >= 0 {
            self.delay.add(delay_ns as f64);
            self.saw_delay = true;
        }

        if self.offset.count < self.window as u64 {
            return None;
        }

        let summary = StatsSummary {
            rms_offset_ns: self.offset.rms(),
            max_abs_offset_ns: self.offset.max_abs(),
            mean_freq_ppb: self.freq.mean(),
            stddev_freq_ppb: self.freq.stddev(),
            delay: self
                .saw_delay
                .then(|| (self.delay.mean(), self.delay.stddev())),
        };

        self.offset.reset();
        self.freq.reset();
        self.delay.reset();
        self.saw_delay = false;

        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_summary_exactly_at_window_boundary() {
        let mut agg = StatsAggregator::new(10);
        let samples: [i64; 10] = [-3, -2, -1, 0, 1, 2, 3, 0, 0, 0];

        let mut summary = None;
        for (i, &s) in samples.iter().enumerate() {
            let result = agg.push(s, 0.0, -1);
            if i < 9 {
                assert!(result.is_none());
            } else {
                summary = result;
            }
        }

        let summary = summary.expect("summary must be emitted on the 10th sample");
        assert!((summary.rms_offset_ns - (28f64 / 10f64).sqrt()).abs() < 1e-9);
        assert_eq!(summary.max_abs_offset_ns, 3.0);
        assert!(summary.delay.is_none());
    }

    #[test]
    fn accumulators_reset_after_emission() {
        let mut agg = StatsAggregator::new(2);
        agg.push(10, 1.0, -1);
        agg.push(10, 1.0, -1).unwrap();
        // A fresh window must not carry over the previous one's samples.
        assert!(agg.push(0, 0.0, -1).is_none());
        let summary = agg.push(0, 0.0, -1).unwrap();
        assert_eq!(summary.rms_offset_ns, 0.0);
    }

    #[test]
    fn delay_summary_only_present_when_a_valid_delay_was_seen() {
        let mut agg = StatsAggregator::new(2);
        agg.push(1, 0.0, -1);
        let summary = agg.push(1, 0.0, 500).unwrap();
        assert!(summary.delay.is_some());
    }

    #[test]
    fn window_zero_never_emits() {
        let mut agg = StatsAggregator::new(0);
        assert!(!agg.enabled());
        for _ in 0..100 {
            assert!(agg.push(1, 1.0, -1).is_none());
        }
    }
}
