//! # Rate Estimation
//!
//! Turns two consecutive readings of a monotonic byte counter into an
//! instantaneous bitrate. Degenerate pairs (counter went backwards, time did
//! not advance) are reported as a skip, never as a rate.

use std::time::Instant;

use crate::BITS_PER_MEGABIT;

/// One reading of the interface byte counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub counter: u64,
    pub timestamp: Instant,
}

impl Sample {
    pub fn new(counter: u64, timestamp: Instant) -> Self {
        Self { counter, timestamp }
    }
}

/// Throughput derived from two samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateObservation {
    pub bits_per_second: f64,
    /// Always strictly positive.
    pub interval_seconds: f64,
}

impl RateObservation {
    pub fn megabits_per_second(&self) -> f64 {
        self.bits_per_second / BITS_PER_MEGABIT
    }
}

/// Why a sample pair did not yield a rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The counter decreased (interface reset or counter wraparound).
    CounterReset,
    /// The second sample is not strictly later than the first.
    NonPositiveInterval,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::CounterReset => "counter reset",
            SkipReason::NonPositiveInterval => "non-positive interval",
        }
    }
}

/// Outcome of [`estimate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Estimate {
    Rate(RateObservation),
    Skip(SkipReason),
}

impl Estimate {
    pub fn rate(&self) -> Option<RateObservation> {
        match self {
            Estimate::Rate(obs) => Some(*obs),
            Estimate::Skip(_) => None,
        }
    }
}

/// Computes the bitrate between `prev` and `curr`.
///
/// A decreasing counter is never misread as a throughput spike: it yields
/// `Skip(CounterReset)`. The counter check comes first so a reset is reported
/// as such even when the timestamps are also degenerate.
pub fn estimate(prev: &Sample, curr: &Sample) -> Estimate {
    if curr.counter < prev.counter {
        return Estimate::Skip(SkipReason::CounterReset);
    }

    let Some(elapsed) = curr.timestamp.checked_duration_since(prev.timestamp) else {
        return Estimate::Skip(SkipReason::NonPositiveInterval);
    };
    let interval_seconds = elapsed.as_secs_f64();
    if interval_seconds <= 0.0 {
        return Estimate::Skip(SkipReason::NonPositiveInterval);
    }

    let bits = (curr.counter - prev.counter) as f64 * 8.0;
    let bits_per_second = bits / interval_seconds;
    if !bits_per_second.is_finite() {
        return Estimate::Skip(SkipReason::NonPositiveInterval);
    }

    Estimate::Rate(RateObservation {
        bits_per_second,
        interval_seconds,
    })
}
