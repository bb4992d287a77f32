//! Tail-sampling decision for the per-request log record.

use std::time::Duration;

use super::context::Severity;
use crate::config::TelemetryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleDecision {
    Severity,
    Slow,
    ForceAll,
    Sampled,
    Dropped,
}

impl SampleDecision {
    pub fn emit(&self) -> bool {
        !matches!(self, SampleDecision::Dropped)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TailSampler {
    sample_rate: f64,
    slow_threshold: Duration,
    force_all: bool,
}

impl TailSampler {
    pub fn new(sample_rate: f64, slow_threshold: Duration, force_all: bool) -> Self {
        Self {
            sample_rate: sample_rate.clamp(0.0, 1.0),
            slow_threshold,
            force_all,
        }
    }

    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            config.sample_rate(),
            config.slow_request_threshold(),
            config.log_force_all_requests,
        )
    }

    pub fn decide(&self, severity: Severity, latency: Duration) -> SampleDecision {
        self.decide_with_roll(severity, latency, random_unit())
    }

    /// `roll` is a uniform draw from `[0, 1)`.
    pub fn decide_with_roll(&self, severity: Severity, latency: Duration, roll: f64) -> SampleDecision {
        if severity >= Severity::Warning {
            SampleDecision::Severity
        } else if latency > self.slow_threshold {
            SampleDecision::Slow
        } else if self.force_all {
            SampleDecision::ForceAll
        } else if roll < self.sample_rate {
            SampleDecision::Sampled
        } else {
            SampleDecision::Dropped
        }
    }
}

/// Uniform draw in `[0, 1)` from the random bits of a v4 UUID.
fn random_unit() -> f64 {
    let bits = uuid::Uuid::new_v4().as_u128() as u64;
    (bits >> 11) as f64 / (1u64 << 53) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST: Duration = Duration::from_millis(10);
    const SLOW: Duration = Duration::from_secs(5);

    fn sampler(rate: f64, force_all: bool) -> TailSampler {
        TailSampler::new(rate, Duration::from_secs(2), force_all)
    }

    #[test]
    fn test_warnings_and_errors_always_emit() {
        let s = sampler(0.0, false);
        assert_eq!(s.decide_with_roll(Severity::Warning, FAST, 0.99), SampleDecision::Severity);
        assert_eq!(s.decide_with_roll(Severity::Error, FAST, 0.99), SampleDecision::Severity);
    }

    #[test]
    fn test_slow_requests_always_emit() {
        let s = sampler(0.0, false);
        assert_eq!(s.decide_with_roll(Severity::Info, SLOW, 0.99), SampleDecision::Slow);
    }

    #[test]
    fn test_force_all_overrides_rate() {
        let s = sampler(0.0, true);
        assert!(s.decide_with_roll(Severity::Info, FAST, 0.99).emit());
    }

    #[test]
    fn test_probabilistic_sampling() {
        let s = sampler(0.25, false);
        assert_eq!(s.decide_with_roll(Severity::Info, FAST, 0.1), SampleDecision::Sampled);
        assert_eq!(s.decide_with_roll(Severity::Info, FAST, 0.25), SampleDecision::Dropped);
        assert!(!sampler(0.0, false).decide(Severity::Info, FAST).emit());
        assert!(sampler(1.0, false).decide(Severity::Info, FAST).emit());
    }

    #[test]
    fn test_random_unit_range() {
        for _ in 0..1000 {
            let roll = random_unit();
            assert!((0.0..1.0).contains(&roll));
        }
    }
}
