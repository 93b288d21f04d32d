//! # Controller Loop
//!
//! Drives the sample → estimate → classify → actuate cycle for one
//! interface.
//!
//! ## Lifecycle
//!
//! 1. **Startup**: shaping is removed and the state reset to `Normal`, so a
//!    policy left behind by a previous run never leaks into this one. A
//!    first counter reading seeds the previous sample.
//! 2. **Ticks**: sleep, read, estimate, classify, actuate on transition,
//!    update state, log, remember the sample.
//! 3. **Shutdown**: shaping is removed exactly once, on every exit path,
//!    through [`CleanupGuard`].
//!
//! Under [`ObserveOnly`](crate::classifier::ClassifierPolicy::ObserveOnly) the actuator is never called, not
//! even for the startup and shutdown removals.
//!
//! The controller is the only owner of the state and the last sample. Ticks
//! run to completion before the next sleep starts, so nothing here needs a
//! lock.

use std::future::Future;
use std::time::Instant;

use chrono::Local;

use crate::actuator::PolicyActuator;
use crate::classifier::{Action, Classifier, ControllerState};
use crate::config::ControllerConfig;
use crate::counter::CounterSource;
use crate::report::Observation;
use crate::sample::{estimate, Estimate, Sample};

/// Mutable per-run state, kept apart from the source and actuator so the
/// loop can borrow them independently.
#[derive(Debug)]
struct LoopState {
    classifier: Classifier,
    state: ControllerState,
    previous: Option<Sample>,
}

pub struct Controller<S, A> {
    config: ControllerConfig,
    source: S,
    actuator: A,
    core: LoopState,
}

impl<S: CounterSource, A: PolicyActuator> Controller<S, A> {
    pub fn new(config: ControllerConfig, source: S, actuator: A) -> Self {
        let classifier = Classifier::new(config.policy, config.threshold_bps());
        Self {
            config,
            source,
            actuator,
            core: LoopState {
                classifier,
                state: ControllerState::Normal,
                previous: None,
            },
        }
    }

    pub fn state(&self) -> ControllerState {
        self.core.state
    }

    pub fn previous_sample(&self) -> Option<Sample> {
        self.core.previous
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    /// Resets to the known-clean baseline. See the module docs.
    pub fn start(&mut self, now: Instant) {
        startup(
            &self.config,
            &mut self.source,
            &mut self.actuator,
            &mut self.core,
            now,
        );
    }

    /// Runs one tick at `now` (without sleeping) and returns what it saw.
    pub fn tick(&mut self, now: Instant) -> Observation {
        step(
            &self.config,
            &mut self.source,
            &mut self.actuator,
            &mut self.core,
            now,
        )
    }

    /// Starts up, then ticks every `config.interval` until `shutdown`
    /// resolves. Shaping is removed before returning, and also if the loop
    /// unwinds. Returns the number of ticks executed.
    ///
    /// Cancellation is observed while sleeping. An actuator call already in
    /// progress finishes first, and a hung call blocks the loop.
    pub async fn run<F>(&mut self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        let Self {
            config,
            source,
            actuator,
            core,
        } = self;
        let config = &*config;

        tracing::info!(
            interface = %config.interface,
            direction = %config.direction,
            threshold_mbps = config.threshold_mbps,
            shaped_rate = %config.shaping.rate,
            shaped_rate_bps = config.shaping.rate.bits_per_second(),
            interval_ms = config.interval.as_millis() as u64,
            counter_source = config.counter_source.as_str(),
            policy = config.policy.as_str(),
            "controller starting"
        );

        startup(config, source, actuator, core, now());
        let mut guard = CleanupGuard::new(actuator, &config.interface);
        if !config.policy.manages_shaping() {
            guard.disarm();
        }

        tokio::pin!(shutdown);
        let mut ticks = 0u64;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!(ticks, "shutdown requested, cleaning up");
                    break;
                }
                _ = tokio::time::sleep(config.interval) => {}
            }
            step(config, source, guard.actuator(), core, now());
            ticks += 1;
        }

        guard.release();
        ticks
    }
}

/// Current instant on tokio's clock, so paused-time tests see virtual time.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

fn startup<S: CounterSource, A: PolicyActuator>(
    config: &ControllerConfig,
    source: &mut S,
    actuator: &mut A,
    core: &mut LoopState,
    now: Instant,
) {
    if config.policy.manages_shaping() {
        if let Err(e) = actuator.remove(&config.interface) {
            tracing::warn!(error = %e, "startup cleanup failed");
        }
    }
    core.state = ControllerState::Normal;
    core.classifier.reset();
    core.previous = match source.read_counter(&config.interface) {
        Ok(counter) => Some(Sample::new(counter, now)),
        Err(e) => {
            tracing::warn!(interface = %config.interface, error = %e, "initial counter read failed");
            None
        }
    };
}

fn step<S: CounterSource, A: PolicyActuator>(
    config: &ControllerConfig,
    source: &mut S,
    actuator: &mut A,
    core: &mut LoopState,
    now: Instant,
) -> Observation {
    let wall_clock = Local::now();
    let mut rate = None;
    let mut skip = None;
    let mut action = Action::None;

    match source.read_counter(&config.interface) {
        Ok(counter) => {
            let current = Sample::new(counter, now);
            if let Some(previous) = core.previous {
                match estimate(&previous, &current) {
                    Estimate::Rate(obs) => {
                        let (next, requested) = core.classifier.classify(core.state, &obs);
                        actuate(config, actuator, requested);
                        if next != core.state {
                            tracing::info!(
                                from = core.state.as_str(),
                                to = next.as_str(),
                                rate_mbps = obs.megabits_per_second(),
                                "state transition"
                            );
                        }
                        // Updated even if actuation failed: the state is the
                        // intended configuration, and retrying every tick
                        // would hammer a broken tc.
                        core.state = next;
                        action = requested;
                        rate = Some(obs);
                    }
                    Estimate::Skip(reason) => {
                        tracing::warn!(reason = reason.as_str(), counter, "no rate this tick");
                        skip = Some(reason);
                    }
                }
            }
            core.previous = Some(current);
        }
        Err(e) => {
            // Keep the previous sample; the next good read spans both ticks.
            tracing::warn!(interface = %config.interface, error = %e, "counter read failed");
        }
    }

    let observation = Observation {
        wall_clock,
        rate,
        state: core.state,
        action,
        skip,
    };
    observation.emit();
    observation
}

fn actuate<A: PolicyActuator>(config: &ControllerConfig, actuator: &mut A, action: Action) {
    let result = match action {
        Action::None => return,
        Action::Apply => actuator.apply(&config.interface, &config.shaping),
        Action::Remove => actuator.remove(&config.interface),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, ?action, "actuation failed");
    }
}

// ─── Cleanup ────────────────────────────────────────────────────────────────

/// Removes shaping from an interface when released or dropped, whichever
/// comes first, and never twice.
pub struct CleanupGuard<'a, A: PolicyActuator> {
    actuator: &'a mut A,
    interface: &'a str,
    armed: bool,
}

impl<'a, A: PolicyActuator> CleanupGuard<'a, A> {
    pub fn new(actuator: &'a mut A, interface: &'a str) -> Self {
        Self {
            actuator,
            interface,
            armed: true,
        }
    }

    pub fn actuator(&mut self) -> &mut A {
        &mut *self.actuator
    }

    /// Turns the guard into a no-op.
    pub fn disarm(&mut self) {
        self.armed = false;
    }

    /// Runs the cleanup now.
    pub fn release(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if !self.armed {
            return;
        }
        self.armed = false;
        match self.actuator.remove(self.interface) {
            Ok(()) => tracing::info!(interface = self.interface, "shaping cleared on exit"),
            // Exit must not be blocked by a failed cleanup.
            Err(e) => tracing::warn!(error = %e, "cleanup failed"),
        }
    }
}

impl<A: PolicyActuator> Drop for CleanupGuard<'_, A> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
