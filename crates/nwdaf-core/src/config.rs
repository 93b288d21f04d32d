//! Controller configuration.
//!
//! A TOML document is deserialized into [`ConfigInput`] (every field
//! optional) and then resolved into a validated [`ControllerConfig`]. The
//! agent applies its command-line overrides to the input before resolving.
//!
//! ```toml
//! interface = "upfgtp"
//! direction = "tx"
//! threshold_mbps = 1.0
//! interval_secs = 0.5
//! counter_source = "sysfs"
//! policy = "latching"
//!
//! [shaping]
//! rate = "0.5mbit"
//! burst = "32kbit"
//! latency = "400ms"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::classifier::ClassifierPolicy;
use crate::counter::Direction;
use crate::shaping::{RateParseError, ShapingRate, TbfParams, DEFAULT_BURST, DEFAULT_LATENCY};
use crate::BITS_PER_MEGABIT;

pub const DEFAULT_INTERFACE: &str = "upfgtp";
pub const DEFAULT_THRESHOLD_MBPS: f64 = 1.0;
pub const DEFAULT_SHAPED_RATE: &str = "0.5mbit";
pub const DEFAULT_INTERVAL_SECS: f64 = 0.5;
pub const DEFAULT_HOLD_TICKS: u32 = 10;
/// Shortest accepted sampling interval.
pub const MIN_INTERVAL_SECS: f64 = 0.01;
/// Longest accepted sampling interval.
pub const MAX_INTERVAL_SECS: f64 = 3600.0;
/// Longest interface name the kernel accepts (`IFNAMSIZ` minus the NUL).
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid shaped rate: {0}")]
    Rate(#[from] RateParseError),
    #[error("{0}")]
    Invalid(String),
}

/// Where interface counters come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CounterBackend {
    #[default]
    Sysfs,
    Ip,
}

impl CounterBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            CounterBackend::Sysfs => "sysfs",
            CounterBackend::Ip => "ip",
        }
    }
}

impl FromStr for CounterBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sysfs" => Ok(CounterBackend::Sysfs),
            "ip" => Ok(CounterBackend::Ip),
            other => Err(format!("unknown counter source `{other}` (expected sysfs or ip)")),
        }
    }
}

/// Policy name as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyKind {
    #[default]
    Latching,
    ObserveOnly,
    Recovery,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigInput {
    pub interface: Option<String>,
    pub direction: Option<Direction>,
    pub threshold_mbps: Option<f64>,
    pub interval_secs: Option<f64>,
    pub counter_source: Option<CounterBackend>,
    pub policy: Option<PolicyKind>,
    pub dry_run: Option<bool>,
    pub tc_program: Option<String>,
    pub shaping: ShapingInput,
    pub recovery: RecoveryInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShapingInput {
    pub rate: Option<String>,
    pub burst: Option<String>,
    pub latency: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryInput {
    /// Defaults to half the congestion threshold.
    pub release_below_mbps: Option<f64>,
    pub hold_ticks: Option<u32>,
}

/// Validated, immutable settings for one controller run.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub interface: String,
    pub direction: Direction,
    pub threshold_mbps: f64,
    pub interval: Duration,
    pub counter_source: CounterBackend,
    pub policy: ClassifierPolicy,
    pub shaping: TbfParams,
    pub dry_run: bool,
    pub tc_program: String,
}

impl ControllerConfig {
    pub fn threshold_bps(&self) -> f64 {
        self.threshold_mbps * BITS_PER_MEGABIT
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        ConfigInput::from_toml_str(input)?.resolve()
    }
}

fn positive_finite(name: &str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::Invalid(format!(
            "{name} must be a positive number, got {value}"
        )))
    }
}

/// Rejects empty values and values containing whitespace, which would
/// split into several `tc` arguments.
fn single_token(name: &str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be a single non-empty word, got `{value}`"
        )));
    }
    Ok(trimmed.to_string())
}

/// A Linux interface name: also used as a path component under sysfs.
fn interface_name(value: String) -> Result<String, ConfigError> {
    let name = single_token("interface", value)?;
    if name.len() > MAX_INTERFACE_NAME_LEN {
        return Err(ConfigError::Invalid(format!(
            "interface `{name}` is longer than {MAX_INTERFACE_NAME_LEN} bytes"
        )));
    }
    if name.contains('/') || name == "." || name == ".." {
        return Err(ConfigError::Invalid(format!(
            "interface `{name}` is not a valid interface name"
        )));
    }
    Ok(name)
}

impl ConfigInput {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(ConfigInput::default());
        }
        Ok(toml::from_str(input)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn resolve(self) -> Result<ControllerConfig, ConfigError> {
        let interface = interface_name(
            self.interface
                .unwrap_or_else(|| DEFAULT_INTERFACE.to_string()),
        )?;

        let threshold_mbps = positive_finite(
            "threshold_mbps",
            self.threshold_mbps.unwrap_or(DEFAULT_THRESHOLD_MBPS),
        )?;

        let interval_secs = positive_finite(
            "interval_secs",
            self.interval_secs.unwrap_or(DEFAULT_INTERVAL_SECS),
        )?;
        if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&interval_secs) {
            return Err(ConfigError::Invalid(format!(
                "interval_secs must be between {MIN_INTERVAL_SECS} and {MAX_INTERVAL_SECS}, got {interval_secs}"
            )));
        }

        let rate: ShapingRate = self
            .shaping
            .rate
            .as_deref()
            .unwrap_or(DEFAULT_SHAPED_RATE)
            .parse()?;
        let shaping = TbfParams {
            rate,
            burst: single_token(
                "shaping.burst",
                self.shaping
                    .burst
                    .unwrap_or_else(|| DEFAULT_BURST.to_string()),
            )?,
            latency: single_token(
                "shaping.latency",
                self.shaping
                    .latency
                    .unwrap_or_else(|| DEFAULT_LATENCY.to_string()),
            )?,
        };

        let policy = match self.policy.unwrap_or_default() {
            PolicyKind::Latching => ClassifierPolicy::Latching,
            PolicyKind::ObserveOnly => ClassifierPolicy::ObserveOnly,
            PolicyKind::Recovery => {
                let release_below_mbps = positive_finite(
                    "recovery.release_below_mbps",
                    self.recovery
                        .release_below_mbps
                        .unwrap_or(threshold_mbps / 2.0),
                )?;
                if release_below_mbps >= threshold_mbps {
                    return Err(ConfigError::Invalid(format!(
                        "recovery.release_below_mbps ({release_below_mbps}) must be below threshold_mbps ({threshold_mbps})"
                    )));
                }
                let hold_ticks = self.recovery.hold_ticks.unwrap_or(DEFAULT_HOLD_TICKS);
                if hold_ticks == 0 {
                    return Err(ConfigError::Invalid(
                        "recovery.hold_ticks must be at least 1".to_string(),
                    ));
                }
                ClassifierPolicy::Recovery {
                    release_below_bps: release_below_mbps * BITS_PER_MEGABIT,
                    hold_ticks,
                }
            }
        };

        let tc_program = single_token(
            "tc_program",
            self.tc_program.unwrap_or_else(|| "tc".to_string()),
        )?;

        Ok(ControllerConfig {
            interface,
            direction: self.direction.unwrap_or_default(),
            threshold_mbps,
            interval: Duration::from_secs_f64(interval_secs),
            counter_source: self.counter_source.unwrap_or_default(),
            policy,
            shaping,
            dry_run: self.dry_run.unwrap_or(false),
            tc_program,
        })
    }
}
