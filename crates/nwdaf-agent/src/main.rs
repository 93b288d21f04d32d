//! NWDAF Agent
//!
//! Watches the byte counter of one interface and, once its throughput
//! crosses the congestion threshold, installs a `tbf` rate limit with `tc`.
//! The limit is removed at startup and again on SIGINT/SIGTERM.
//!
//! ```text
//! nwdaf-agent --interface upfgtp --threshold-mbps 1 --shaped-rate 0.5mbit
//! nwdaf-agent --config /etc/nwdaf/agent.toml --dry-run
//! ```
//!
//! Command-line flags override values from the config file.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use nwdaf_core::actuator::{DryRunActuator, PolicyActuator, TcActuator};
use nwdaf_core::command::SystemRunner;
use nwdaf_core::config::{ConfigInput, ControllerConfig, CounterBackend, PolicyKind};
use nwdaf_core::controller::Controller;
use nwdaf_core::counter::{CounterSource, Direction, IpLinkCounterSource, SysfsCounterSource};

/// Congestion watchdog for a single network interface.
#[derive(Parser, Debug, Default)]
#[command(name = "nwdaf-agent", about = "Throttle an interface with tc when it congests")]
struct Cli {
    /// TOML config file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Interface to watch and shape.
    #[arg(long, short)]
    interface: Option<String>,

    /// Congestion threshold in Mbit/s.
    #[arg(long)]
    threshold_mbps: Option<f64>,

    /// Rate imposed while congested, in tc syntax (e.g. 0.5mbit).
    #[arg(long)]
    shaped_rate: Option<String>,

    /// Sampling interval in seconds.
    #[arg(long)]
    interval: Option<f64>,

    /// Counter direction to sample (rx or tx).
    #[arg(long)]
    direction: Option<Direction>,

    /// Counter backend (sysfs or ip).
    #[arg(long)]
    counter_source: Option<CounterBackend>,

    /// Only report load, never touch tc.
    #[arg(long, default_value_t = false)]
    observe_only: bool,

    /// Log tc commands instead of running them.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Path to the tc binary.
    #[arg(long)]
    tc_program: Option<String>,
}

impl Cli {
    /// Layers the flags that were given over the file input.
    fn apply_overrides(&self, mut input: ConfigInput) -> ConfigInput {
        if let Some(interface) = &self.interface {
            input.interface = Some(interface.clone());
        }
        if let Some(threshold) = self.threshold_mbps {
            input.threshold_mbps = Some(threshold);
        }
        if let Some(rate) = &self.shaped_rate {
            input.shaping.rate = Some(rate.clone());
        }
        if let Some(interval) = self.interval {
            input.interval_secs = Some(interval);
        }
        if let Some(direction) = self.direction {
            input.direction = Some(direction);
        }
        if let Some(backend) = self.counter_source {
            input.counter_source = Some(backend);
        }
        if self.observe_only {
            input.policy = Some(PolicyKind::ObserveOnly);
        }
        if self.dry_run {
            input.dry_run = Some(true);
        }
        if let Some(program) = &self.tc_program {
            input.tc_program = Some(program.clone());
        }
        input
    }

    fn load_config(&self) -> anyhow::Result<ControllerConfig> {
        let input = match &self.config {
            Some(path) => ConfigInput::from_file(path)?,
            None => ConfigInput::default(),
        };
        let config = self
            .apply_overrides(input)
            .resolve()
            .context("invalid configuration")?;
        Ok(config)
    }
}

fn counter_source(config: &ControllerConfig) -> Box<dyn CounterSource> {
    match config.counter_source {
        CounterBackend::Sysfs => Box::new(SysfsCounterSource::new(config.direction)),
        CounterBackend::Ip => Box::new(IpLinkCounterSource::new(SystemRunner, config.direction)),
    }
}

fn actuator(config: &ControllerConfig) -> Box<dyn PolicyActuator> {
    if config.dry_run {
        Box::new(DryRunActuator::new().with_program(config.tc_program.clone()))
    } else {
        Box::new(TcActuator::new(SystemRunner).with_program(config.tc_program.clone()))
    }
}

#[cfg(unix)]
async fn shutdown_signal(
    mut sigint: tokio::signal::unix::Signal,
    mut sigterm: tokio::signal::unix::Signal,
) {
    tokio::select! {
        _ = sigint.recv() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = cli.load_config()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async move {
        // Handlers are installed before startup so an early signal still
        // goes through cleanup.
        #[cfg(unix)]
        let shutdown = {
            use tokio::signal::unix::{signal, SignalKind};
            let sigint =
                signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
            let sigterm =
                signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
            shutdown_signal(sigint, sigterm)
        };
        #[cfg(not(unix))]
        let shutdown = async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("received Ctrl-C");
        };

        let source = counter_source(&config);
        let actuator = actuator(&config);
        let mut controller = Controller::new(config, source, actuator);
        let ticks = controller.run(shutdown).await;

        tracing::info!(ticks, "nwdaf-agent stopped");
        Ok::<_, anyhow::Error>(())
    })
}
