//! End-to-end behaviour of the controller loop with scripted counters and a
//! recording actuator.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use nwdaf_core::actuator::{ActuatorError, Operation, PolicyActuator};
use nwdaf_core::classifier::{Action, ControllerState};
use nwdaf_core::command::CommandError;
use nwdaf_core::config::ControllerConfig;
use nwdaf_core::controller::Controller;
use nwdaf_core::counter::{CounterError, CounterSource};
use nwdaf_core::sample::SkipReason;
use nwdaf_core::shaping::TbfParams;

// ─── Test doubles ───────────────────────────────────────────────────────────

/// Replays counter readings in order; `None` entries fail the read. Once the
/// script is exhausted the last good value repeats.
#[derive(Default)]
struct ScriptedSource {
    script: VecDeque<Option<u64>>,
    last: u64,
    reads: usize,
}

impl ScriptedSource {
    fn new(values: &[Option<u64>]) -> Self {
        Self {
            script: values.iter().copied().collect(),
            ..Default::default()
        }
    }

    fn counters(values: &[u64]) -> Self {
        Self::new(&values.iter().copied().map(Some).collect::<Vec<_>>())
    }
}

impl CounterSource for ScriptedSource {
    fn read_counter(&mut self, interface: &str) -> Result<u64, CounterError> {
        self.reads += 1;
        match self.script.pop_front() {
            Some(Some(v)) => {
                self.last = v;
                Ok(v)
            }
            Some(None) => Err(CounterError::NoSuchInterface(interface.to_string())),
            None => Ok(self.last),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Apply(String),
    Remove,
}

#[derive(Default)]
struct RecordingActuator {
    calls: Vec<Call>,
    fail_apply: bool,
}

impl RecordingActuator {
    fn applies(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| matches!(c, Call::Apply(_)))
            .count()
    }

    fn removes(&self) -> usize {
        self.calls.iter().filter(|c| **c == Call::Remove).count()
    }
}

impl PolicyActuator for RecordingActuator {
    fn apply(&mut self, interface: &str, params: &TbfParams) -> Result<(), ActuatorError> {
        self.calls.push(Call::Apply(params.rate.to_string()));
        if self.fail_apply {
            return Err(ActuatorError {
                operation: Operation::Apply,
                interface: interface.to_string(),
                source: CommandError::NonZero {
                    command: "tc qdisc add".into(),
                    status: "exit code 2".into(),
                    stderr: "RTNETLINK answers: Operation not permitted".into(),
                },
            });
        }
        Ok(())
    }

    fn remove(&mut self, _interface: &str) -> Result<(), ActuatorError> {
        self.calls.push(Call::Remove);
        Ok(())
    }
}

fn config(extra: &str) -> ControllerConfig {
    let toml = format!("interface = \"upfgtp\"\nthreshold_mbps = 1.0\n{extra}");
    ControllerConfig::from_toml_str(&toml).unwrap()
}

fn secs(t0: Instant, s: u64) -> Instant {
    t0 + Duration::from_secs(s)
}

// ─── Scenarios ──────────────────────────────────────────────────────────────

#[test]
fn congestion_applies_configured_rate() {
    let source = ScriptedSource::counters(&[1_000_000, 1_500_000]);
    let mut ctl = Controller::new(config(""), source, RecordingActuator::default());
    let t0 = Instant::now();
    ctl.start(t0);

    let obs = ctl.tick(secs(t0, 1));
    let mbps = obs.rate_mbps().expect("rate");
    assert!((mbps - 4.0).abs() < 1e-9);
    assert_eq!(obs.state, ControllerState::Congested);
    assert_eq!(obs.action, Action::Apply);
    assert_eq!(
        ctl.actuator().calls,
        vec![Call::Remove, Call::Apply("0.5mbit".into())]
    );
}

#[test]
fn light_load_stays_normal() {
    let source = ScriptedSource::counters(&[1_000_000, 1_050_000]);
    let mut ctl = Controller::new(config(""), source, RecordingActuator::default());
    let t0 = Instant::now();
    ctl.start(t0);

    let obs = ctl.tick(secs(t0, 1));
    assert!((obs.rate_mbps().unwrap() - 0.4).abs() < 1e-9);
    assert_eq!(obs.state, ControllerState::Normal);
    assert_eq!(obs.action, Action::None);
    assert_eq!(ctl.actuator().calls, vec![Call::Remove]);
}

#[test]
fn wraparound_is_skipped_and_rebaselined() {
    let source = ScriptedSource::counters(&[2_000_000, 1_000_000, 1_500_000]);
    let mut ctl = Controller::new(config(""), source, RecordingActuator::default());
    let t0 = Instant::now();
    ctl.start(t0);

    let obs = ctl.tick(secs(t0, 1));
    assert_eq!(obs.skip, Some(SkipReason::CounterReset));
    assert!(obs.rate.is_none());
    assert_eq!(obs.state, ControllerState::Normal);
    assert_eq!(obs.action, Action::None);
    assert_eq!(ctl.actuator().applies(), 0);

    // The post-reset reading is the new baseline.
    let obs = ctl.tick(secs(t0, 2));
    assert!((obs.rate_mbps().unwrap() - 4.0).abs() < 1e-9);
    assert_eq!(obs.action, Action::Apply);
}

#[test]
fn latch_holds_and_applies_once() {
    // 4 Mbps, then 0.1 Mbps, then idle and bursts.
    let source =
        ScriptedSource::counters(&[0, 500_000, 512_500, 512_500, 5_000_000, 5_000_000]);
    let mut ctl = Controller::new(config(""), source, RecordingActuator::default());
    let t0 = Instant::now();
    ctl.start(t0);

    assert_eq!(ctl.tick(secs(t0, 1)).action, Action::Apply);

    let obs = ctl.tick(secs(t0, 2));
    assert!((obs.rate_mbps().unwrap() - 0.1).abs() < 1e-9);
    assert_eq!(obs.state, ControllerState::Congested);
    assert_eq!(obs.action, Action::None);

    for s in 3..=5 {
        let obs = ctl.tick(secs(t0, s));
        assert_eq!(obs.state, ControllerState::Congested);
        assert_eq!(obs.action, Action::None);
    }
    assert_eq!(ctl.actuator().applies(), 1);
    assert_eq!(ctl.actuator().removes(), 1);
}

#[test]
fn startup_resets_any_prior_state() {
    let source = ScriptedSource::counters(&[0, 1_000_000, 1_000_000]);
    let mut ctl = Controller::new(config(""), source, RecordingActuator::default());
    let t0 = Instant::now();
    ctl.start(t0);
    ctl.tick(secs(t0, 1));
    assert_eq!(ctl.state(), ControllerState::Congested);

    ctl.start(secs(t0, 2));
    assert_eq!(ctl.state(), ControllerState::Normal);
    assert_eq!(ctl.actuator().calls.last(), Some(&Call::Remove));
    assert_eq!(ctl.actuator().removes(), 2);
}

#[test]
fn failed_read_keeps_previous_sample() {
    let source = ScriptedSource::new(&[Some(0), None, Some(250_000)]);
    let mut ctl = Controller::new(config(""), source, RecordingActuator::default());
    let t0 = Instant::now();
    ctl.start(t0);

    let obs = ctl.tick(secs(t0, 1));
    assert!(obs.rate.is_none());
    assert!(obs.skip.is_none());
    assert_eq!(obs.state, ControllerState::Normal);

    // 250 kB over two seconds.
    let obs = ctl.tick(secs(t0, 2));
    let rate = obs.rate.expect("rate");
    assert_eq!(rate.interval_seconds, 2.0);
    assert!((rate.megabits_per_second() - 1.0).abs() < 1e-9);
    assert_eq!(obs.state, ControllerState::Normal);
}

#[test]
fn failed_startup_read_defers_first_rate() {
    let source = ScriptedSource::new(&[None, Some(0), Some(1_000_000)]);
    let mut ctl = Controller::new(config(""), source, RecordingActuator::default());
    let t0 = Instant::now();
    ctl.start(t0);
    assert!(ctl.previous_sample().is_none());

    assert!(ctl.tick(secs(t0, 1)).rate.is_none());
    assert_eq!(ctl.tick(secs(t0, 2)).action, Action::Apply);
}

#[test]
fn failed_apply_still_latches_without_retry() {
    let source = ScriptedSource::counters(&[0, 1_000_000, 2_000_000, 3_000_000]);
    let actuator = RecordingActuator {
        fail_apply: true,
        ..Default::default()
    };
    let mut ctl = Controller::new(config(""), source, actuator);
    let t0 = Instant::now();
    ctl.start(t0);

    for s in 1..=3 {
        let obs = ctl.tick(secs(t0, s));
        assert_eq!(obs.state, ControllerState::Congested);
    }
    assert_eq!(ctl.actuator().applies(), 1);
}

#[test]
fn observe_only_never_actuates_on_load() {
    let source = ScriptedSource::counters(&[0, 1_000_000, 1_000_000, 3_000_000]);
    let mut ctl = Controller::new(
        config("policy = \"observe-only\""),
        source,
        RecordingActuator::default(),
    );
    let t0 = Instant::now();
    ctl.start(t0);

    let states: Vec<_> = (1..=3).map(|s| ctl.tick(secs(t0, s)).state).collect();
    assert_eq!(
        states,
        vec![
            ControllerState::Congested,
            ControllerState::Normal,
            ControllerState::Congested,
        ]
    );
    assert!(ctl.actuator().calls.is_empty());
}

#[test]
fn recovery_policy_releases_after_calm_period() {
    let source = ScriptedSource::counters(&[0, 1_000_000, 1_000_000, 1_000_000]);
    let mut ctl = Controller::new(
        config("policy = \"recovery\"\n[recovery]\nhold_ticks = 2"),
        source,
        RecordingActuator::default(),
    );
    let t0 = Instant::now();
    ctl.start(t0);

    assert_eq!(ctl.tick(secs(t0, 1)).action, Action::Apply);
    assert_eq!(ctl.tick(secs(t0, 2)).action, Action::None);
    let obs = ctl.tick(secs(t0, 3));
    assert_eq!(obs.action, Action::Remove);
    assert_eq!(obs.state, ControllerState::Normal);
    assert_eq!(
        ctl.actuator().calls,
        vec![Call::Remove, Call::Apply("0.5mbit".into()), Call::Remove]
    );
}

// ─── Async loop ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn run_removes_once_on_shutdown_when_normal() {
    let source = ScriptedSource::counters(&[0]);
    let mut ctl = Controller::new(config(""), source, RecordingActuator::default());

    // Interval is 500 ms: ticks at 0.5 s, 1.0 s, 1.5 s, then shutdown.
    let ticks = ctl.run(tokio::time::sleep(Duration::from_millis(1_750))).await;

    assert_eq!(ticks, 3);
    assert_eq!(ctl.source().reads, 4);
    assert_eq!(ctl.state(), ControllerState::Normal);
    assert_eq!(ctl.actuator().calls, vec![Call::Remove, Call::Remove]);
}

#[tokio::test(start_paused = true)]
async fn run_applies_once_and_cleans_up() {
    // 1 MB per half second is 16 Mbps.
    let source = ScriptedSource::counters(&[0, 1_000_000, 2_000_000, 3_000_000, 4_000_000]);
    let mut ctl = Controller::new(config(""), source, RecordingActuator::default());

    let ticks = ctl.run(tokio::time::sleep(Duration::from_millis(2_250))).await;

    assert_eq!(ticks, 4);
    assert_eq!(ctl.state(), ControllerState::Congested);
    assert_eq!(
        ctl.actuator().calls,
        vec![Call::Remove, Call::Apply("0.5mbit".into()), Call::Remove]
    );
}

#[tokio::test(start_paused = true)]
async fn observe_only_run_leaves_qdiscs_alone() {
    let source = ScriptedSource::counters(&[0, 1_000_000, 2_000_000, 2_000_000]);
    let mut ctl = Controller::new(
        config("policy = \"observe-only\""),
        source,
        RecordingActuator::default(),
    );

    let ticks = ctl.run(tokio::time::sleep(Duration::from_millis(1_750))).await;

    assert_eq!(ticks, 3);
    assert_eq!(ctl.state(), ControllerState::Normal);
    assert!(ctl.actuator().calls.is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_honours_immediate_shutdown() {
    let source = ScriptedSource::counters(&[0]);
    let mut ctl = Controller::new(config(""), source, RecordingActuator::default());

    let ticks = ctl.run(std::future::ready(())).await;

    assert_eq!(ticks, 0);
    assert_eq!(ctl.actuator().calls, vec![Call::Remove, Call::Remove]);
}
