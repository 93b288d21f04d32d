//! # Congestion Classification
//!
//! Maps a rate observation plus the previous controller state to the next
//! state and the shaping action to take.
//!
//! ```text
//! Latching:     Normal ──(bps > threshold)──▶ Congested   (Apply, never released)
//! ObserveOnly:  Normal ⇄ Congested                        (state follows load, no action)
//! Recovery:     Normal ──(bps > threshold)──▶ Congested   (Apply)
//!               Congested ──(hold_ticks × bps ≤ release_below)──▶ Normal (Remove)
//! ```
//!
//! Latching is the default.

use crate::sample::RateObservation;

/// Whether the interface is currently considered congested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Normal,
    Congested,
}

impl ControllerState {
    /// Label used in the per-tick observation line.
    pub fn label(&self) -> &'static str {
        match self {
            ControllerState::Normal => "GREEN (Normal)",
            ControllerState::Congested => "RED (Congestion!)",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Normal => "normal",
            ControllerState::Congested => "congested",
        }
    }
}

/// Shaping change requested by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Action {
    #[default]
    None,
    Apply,
    Remove,
}

/// How the classifier reacts to load.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ClassifierPolicy {
    /// One-way transition to `Congested`; shaping stays until restart.
    #[default]
    Latching,
    /// State tracks the instantaneous rate but no action is ever requested.
    ObserveOnly,
    /// Latching entry with a debounced release.
    Recovery {
        /// Rates at or below this value count towards release. Kept strictly
        /// below the congestion threshold so the two form a hysteresis band.
        release_below_bps: f64,
        /// Consecutive calm observations required before releasing.
        hold_ticks: u32,
    },
}

impl ClassifierPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifierPolicy::Latching => "latching",
            ClassifierPolicy::ObserveOnly => "observe-only",
            ClassifierPolicy::Recovery { .. } => "recovery",
        }
    }

    /// Whether the controller installs and clears shaping at all. An
    /// observe-only run leaves the interface's qdiscs untouched.
    pub fn manages_shaping(&self) -> bool {
        !matches!(self, ClassifierPolicy::ObserveOnly)
    }
}

/// Stateless classification for the policies that need no memory beyond
/// the controller state.
///
/// `Recovery` is treated as `Latching` here; its release path needs the
/// debounce counter kept by [`Classifier`].
pub fn classify(
    current: ControllerState,
    rate: &RateObservation,
    threshold_bps: f64,
    policy: ClassifierPolicy,
) -> (ControllerState, Action) {
    let over = rate.bits_per_second > threshold_bps;
    match policy {
        ClassifierPolicy::ObserveOnly => {
            let next = if over {
                ControllerState::Congested
            } else {
                ControllerState::Normal
            };
            (next, Action::None)
        }
        ClassifierPolicy::Latching | ClassifierPolicy::Recovery { .. } => match current {
            ControllerState::Normal if over => (ControllerState::Congested, Action::Apply),
            ControllerState::Normal => (ControllerState::Normal, Action::None),
            ControllerState::Congested => (ControllerState::Congested, Action::None),
        },
    }
}

/// Classifier with the per-run memory the recovery policy needs.
#[derive(Debug, Clone)]
pub struct Classifier {
    policy: ClassifierPolicy,
    threshold_bps: f64,
    /// Consecutive calm observations seen while congested.
    calm_ticks: u32,
}

impl Classifier {
    pub fn new(policy: ClassifierPolicy, threshold_bps: f64) -> Self {
        Self {
            policy,
            threshold_bps,
            calm_ticks: 0,
        }
    }

    /// Clears the release debounce. Called when the controller resets to
    /// its baseline.
    pub fn reset(&mut self) {
        self.calm_ticks = 0;
    }

    pub fn classify(
        &mut self,
        current: ControllerState,
        rate: &RateObservation,
    ) -> (ControllerState, Action) {
        let ClassifierPolicy::Recovery {
            release_below_bps,
            hold_ticks,
        } = self.policy
        else {
            return classify(current, rate, self.threshold_bps, self.policy);
        };

        match current {
            ControllerState::Normal => {
                self.calm_ticks = 0;
                classify(current, rate, self.threshold_bps, self.policy)
            }
            ControllerState::Congested => {
                if rate.bits_per_second > release_below_bps {
                    self.calm_ticks = 0;
                    return (ControllerState::Congested, Action::None);
                }
                self.calm_ticks = self.calm_ticks.saturating_add(1);
                if self.calm_ticks >= hold_ticks.max(1) {
                    self.calm_ticks = 0;
                    (ControllerState::Normal, Action::Remove)
                } else {
                    (ControllerState::Congested, Action::None)
                }
            }
        }
    }
}
