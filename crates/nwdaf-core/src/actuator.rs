//! Shaping policy actuators.
//!
//! [`TcActuator`] installs a root `tbf` qdisc with `tc`; [`DryRunActuator`]
//! only logs what it would have run.

use std::fmt;

use crate::command::{command_line, CommandError, CommandRunner};
use crate::shaping::TbfParams;

/// Which actuator operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Apply,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Apply => "apply shaping",
            Operation::Remove => "remove shaping",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to {operation} on {interface}: {source}")]
pub struct ActuatorError {
    pub operation: Operation,
    pub interface: String,
    #[source]
    pub source: CommandError,
}

/// Installs or clears a bandwidth limit on an interface.
///
/// Both operations are idempotent in effect: applying twice leaves one
/// policy in place, removing with nothing installed succeeds.
pub trait PolicyActuator {
    fn apply(&mut self, interface: &str, params: &TbfParams) -> Result<(), ActuatorError>;
    fn remove(&mut self, interface: &str) -> Result<(), ActuatorError>;
}

impl<A: PolicyActuator + ?Sized> PolicyActuator for Box<A> {
    fn apply(&mut self, interface: &str, params: &TbfParams) -> Result<(), ActuatorError> {
        (**self).apply(interface, params)
    }

    fn remove(&mut self, interface: &str) -> Result<(), ActuatorError> {
        (**self).remove(interface)
    }
}

fn del_args(interface: &str) -> [&str; 5] {
    ["qdisc", "del", "dev", interface, "root"]
}

/// Whether a failed `tc qdisc del` only means there was nothing to delete.
///
/// Depending on kernel and iproute2 version, deleting an absent root qdisc
/// reports one of these.
fn is_absent_qdisc(err: &CommandError) -> bool {
    let Some(stderr) = err.stderr() else {
        return false;
    };
    stderr.contains("No such file or directory")
        || stderr.contains("handle of zero")
        || stderr.contains("Invalid handle")
}

// ─── tc ─────────────────────────────────────────────────────────────────────

/// Drives Linux traffic control through the `tc` binary.
#[derive(Debug, Clone)]
pub struct TcActuator<R> {
    runner: R,
    program: String,
}

impl<R: CommandRunner> TcActuator<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            program: "tc".to_string(),
        }
    }

    /// Uses a specific `tc` binary (e.g. `/sbin/tc`).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    fn delete_root(&mut self, interface: &str) -> Result<(), CommandError> {
        match self.runner.run(&self.program, &del_args(interface)) {
            Ok(_) => Ok(()),
            Err(e) if is_absent_qdisc(&e) => {
                tracing::trace!(interface, "no root qdisc to delete");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl<R: CommandRunner> PolicyActuator for TcActuator<R> {
    fn apply(&mut self, interface: &str, params: &TbfParams) -> Result<(), ActuatorError> {
        let wrap = |source| ActuatorError {
            operation: Operation::Apply,
            interface: interface.to_string(),
            source,
        };

        // Clear whatever is installed so repeated applies converge.
        self.delete_root(interface).map_err(wrap)?;

        let mut args = vec!["qdisc", "add", "dev", interface, "root"];
        args.extend_from_slice(&params.qdisc_args());
        self.runner.run(&self.program, &args).map_err(wrap)?;

        tracing::info!(
            interface,
            rate = %params.rate,
            burst = %params.burst,
            latency = %params.latency,
            "shaping applied"
        );
        Ok(())
    }

    fn remove(&mut self, interface: &str) -> Result<(), ActuatorError> {
        self.delete_root(interface).map_err(|source| ActuatorError {
            operation: Operation::Remove,
            interface: interface.to_string(),
            source,
        })?;
        tracing::info!(interface, "shaping removed");
        Ok(())
    }
}

// ─── dry run ────────────────────────────────────────────────────────────────

/// Logs the `tc` commands instead of running them.
#[derive(Debug, Clone)]
pub struct DryRunActuator {
    program: String,
    issued: Vec<String>,
}

impl Default for DryRunActuator {
    fn default() -> Self {
        Self {
            program: "tc".to_string(),
            issued: Vec::new(),
        }
    }
}

impl DryRunActuator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names the `tc` binary in the logged command lines.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Command lines that would have been executed, in order.
    pub fn issued(&self) -> &[String] {
        &self.issued
    }

    fn record(&mut self, args: &[&str]) {
        let line = command_line(&self.program, args);
        tracing::warn!("DRY RUN: {line}");
        self.issued.push(line);
    }
}

impl PolicyActuator for DryRunActuator {
    fn apply(&mut self, interface: &str, params: &TbfParams) -> Result<(), ActuatorError> {
        self.record(&del_args(interface));
        let mut args = vec!["qdisc", "add", "dev", interface, "root"];
        args.extend_from_slice(&params.qdisc_args());
        self.record(&args);
        Ok(())
    }

    fn remove(&mut self, interface: &str) -> Result<(), ActuatorError> {
        self.record(&del_args(interface));
        Ok(())
    }
}
