//! Closed-loop throughput controller for a single network interface.
//!
//! This crate contains:
//! - **Rate estimation**: byte counter samples to bits per second
//! - **Congestion classification**: latching state machine with optional recovery
//! - **Counter sources**: sysfs statistics and `ip -s link` parsing
//! - **Policy actuators**: `tc` token bucket shaping, plus a dry-run variant
//! - **Controller loop**: tick sequencing with guaranteed cleanup on exit

pub mod actuator;
pub mod classifier;
pub mod command;
pub mod config;
pub mod controller;
pub mod counter;
pub mod report;
pub mod sample;
pub mod shaping;

/// Bits per second in one megabit per second.
pub const BITS_PER_MEGABIT: f64 = 1_000_000.0;
