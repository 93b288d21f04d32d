//! Per-tick observation record.

use std::fmt;

use chrono::{DateTime, Local};

use crate::classifier::{Action, ControllerState};
use crate::sample::{RateObservation, SkipReason};

/// What a tick saw and decided.
#[derive(Debug, Clone)]
pub struct Observation {
    pub wall_clock: DateTime<Local>,
    /// `None` when the tick produced no rate (first tick, failed read, skip).
    pub rate: Option<RateObservation>,
    pub state: ControllerState,
    pub action: Action,
    pub skip: Option<SkipReason>,
}

impl Observation {
    pub fn rate_mbps(&self) -> Option<f64> {
        self.rate.map(|r| r.megabits_per_second())
    }

    /// Emits the observation line at INFO with structured fields attached.
    pub fn emit(&self) {
        match self.rate_mbps() {
            Some(mbps) => tracing::info!(
                rate_mbps = mbps,
                state = self.state.as_str(),
                "{self}"
            ),
            None => tracing::info!(state = self.state.as_str(), "{self}"),
        }
    }
}

impl fmt::Display for Observation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] Load: ", self.wall_clock.format("%H:%M:%S"))?;
        match self.rate_mbps() {
            Some(mbps) => write!(f, "{mbps:.2} Mbps")?,
            None => f.write_str("--")?,
        }
        write!(f, " | Status: {}", self.state.label())
    }
}
