//! Shaping policy parameters in the form `tc` expects them.

use std::fmt;
use std::str::FromStr;

/// Token bucket size used when none is configured.
pub const DEFAULT_BURST: &str = "32kbit";
/// Maximum queueing delay used when none is configured.
pub const DEFAULT_LATENCY: &str = "400ms";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateParseError {
    #[error("empty rate")]
    Empty,
    #[error("invalid number in rate `{0}`")]
    Number(String),
    #[error("unknown rate unit `{unit}` in `{input}`")]
    Unit { input: String, unit: String },
    #[error("rate `{0}` must be greater than zero")]
    NotPositive(String),
}

/// A `tc` rate such as `0.5mbit` or `750kbit`.
///
/// The original text is preserved for the command line; the parsed value is
/// checked to be positive and reported in the controller's startup log.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapingRate {
    text: String,
    bits_per_second: f64,
}

impl ShapingRate {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn bits_per_second(&self) -> f64 {
        self.bits_per_second
    }
}

impl fmt::Display for ShapingRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Bits-per-second multiplier for a `tc` rate unit. A bare number is bit/s;
/// the `*bps` units are bytes per second.
fn unit_multiplier(unit: &str) -> Option<f64> {
    let m = match unit {
        "" | "bit" => 1.0,
        "kbit" => 1e3,
        "mbit" => 1e6,
        "gbit" => 1e9,
        "tbit" => 1e12,
        "bps" => 8.0,
        "kbps" => 8e3,
        "mbps" => 8e6,
        "gbps" => 8e9,
        "tbps" => 8e12,
        _ => return None,
    };
    Some(m)
}

impl FromStr for ShapingRate {
    type Err = RateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        if text.is_empty() {
            return Err(RateParseError::Empty);
        }

        let split = text
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(text.len());
        let (number, unit) = text.split_at(split);

        let value: f64 = number
            .parse()
            .map_err(|_| RateParseError::Number(text.to_string()))?;
        let unit_lower = unit.to_ascii_lowercase();
        let multiplier = unit_multiplier(&unit_lower).ok_or_else(|| RateParseError::Unit {
            input: text.to_string(),
            unit: unit.to_string(),
        })?;

        let bits_per_second = value * multiplier;
        if !(bits_per_second.is_finite() && bits_per_second > 0.0) {
            return Err(RateParseError::NotPositive(text.to_string()));
        }

        Ok(ShapingRate {
            text: text.to_string(),
            bits_per_second,
        })
    }
}

/// Token bucket filter configuration installed while congested.
#[derive(Debug, Clone, PartialEq)]
pub struct TbfParams {
    pub rate: ShapingRate,
    pub burst: String,
    pub latency: String,
}

impl TbfParams {
    pub fn new(rate: ShapingRate) -> Self {
        Self {
            rate,
            burst: DEFAULT_BURST.to_string(),
            latency: DEFAULT_LATENCY.to_string(),
        }
    }

    /// `tc` arguments following `root` in a `qdisc add` command.
    pub fn qdisc_args(&self) -> [&str; 7] {
        [
            "tbf",
            "rate",
            self.rate.as_str(),
            "burst",
            &self.burst,
            "latency",
            &self.latency,
        ]
    }
}
