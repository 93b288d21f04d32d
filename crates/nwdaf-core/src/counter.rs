//! Interface byte counters.
//!
//! Two backends are provided: reading `/sys/class/net/<if>/statistics`
//! directly, or running `ip -s link show <if>` and parsing its output.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::command::{CommandError, CommandRunner};

/// Default root of the kernel's per-interface statistics.
pub const SYSFS_NET_ROOT: &str = "/sys/class/net";

/// Which side of the interface is sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Rx,
    #[default]
    Tx,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Rx => "rx",
            Direction::Tx => "tx",
        }
    }

    fn sysfs_file(&self) -> &'static str {
        match self {
            Direction::Rx => "rx_bytes",
            Direction::Tx => "tx_bytes",
        }
    }

    fn ip_section(&self) -> &'static str {
        match self {
            Direction::Rx => "RX:",
            Direction::Tx => "TX:",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rx" => Ok(Direction::Rx),
            "tx" => Ok(Direction::Tx),
            other => Err(format!("unknown direction `{other}` (expected rx or tx)")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CounterError {
    #[error("interface `{0}` not found")]
    NoSuchInterface(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("unparsable counter value `{0}`")]
    Parse(String),
    #[error("no {0} byte counter in `ip -s link` output")]
    MissingSection(&'static str),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Source of a monotonically non-decreasing byte counter.
pub trait CounterSource {
    fn read_counter(&mut self, interface: &str) -> Result<u64, CounterError>;
}

impl<C: CounterSource + ?Sized> CounterSource for Box<C> {
    fn read_counter(&mut self, interface: &str) -> Result<u64, CounterError> {
        (**self).read_counter(interface)
    }
}

// ─── sysfs ──────────────────────────────────────────────────────────────────

/// Reads `<root>/<interface>/statistics/{rx,tx}_bytes`.
#[derive(Debug, Clone)]
pub struct SysfsCounterSource {
    root: PathBuf,
    direction: Direction,
}

impl SysfsCounterSource {
    pub fn new(direction: Direction) -> Self {
        Self::with_root(SYSFS_NET_ROOT, direction)
    }

    /// Uses an alternative statistics tree (tests, containers with a
    /// bind-mounted `/sys`).
    pub fn with_root(root: impl Into<PathBuf>, direction: Direction) -> Self {
        Self {
            root: root.into(),
            direction,
        }
    }

    fn counter_path(&self, interface: &str) -> PathBuf {
        self.root
            .join(interface)
            .join("statistics")
            .join(self.direction.sysfs_file())
    }
}

impl CounterSource for SysfsCounterSource {
    fn read_counter(&mut self, interface: &str) -> Result<u64, CounterError> {
        // The name is a single path component below the statistics root.
        let plain = !interface.is_empty()
            && !interface.contains('/')
            && interface != "."
            && interface != "..";
        if !plain || !self.root.join(interface).exists() {
            return Err(CounterError::NoSuchInterface(interface.to_string()));
        }
        let path = self.counter_path(interface);
        let raw = std::fs::read_to_string(&path).map_err(|source| CounterError::Io {
            path: path.clone(),
            source,
        })?;
        let trimmed = raw.trim();
        trimmed
            .parse::<u64>()
            .map_err(|_| CounterError::Parse(trimmed.to_string()))
    }
}

// ─── ip -s link ─────────────────────────────────────────────────────────────

/// Runs `ip -s link show <interface>` and takes the byte column of the
/// requested direction.
#[derive(Debug, Clone)]
pub struct IpLinkCounterSource<R> {
    runner: R,
    direction: Direction,
}

impl<R: CommandRunner> IpLinkCounterSource<R> {
    pub fn new(runner: R, direction: Direction) -> Self {
        Self { runner, direction }
    }
}

impl<R: CommandRunner> CounterSource for IpLinkCounterSource<R> {
    fn read_counter(&mut self, interface: &str) -> Result<u64, CounterError> {
        let output = self
            .runner
            .run("ip", &["-s", "link", "show", interface])
            .map_err(|e| {
                if e.stderr().is_some_and(|s| s.contains("does not exist")) {
                    CounterError::NoSuchInterface(interface.to_string())
                } else {
                    CounterError::Command(e)
                }
            })?;
        parse_ip_link_bytes(&output.stdout, self.direction)
    }
}

/// Extracts the byte counter for `direction` from `ip -s link` output.
///
/// The statistics block looks like:
///
/// ```text
///     RX:  bytes packets errors dropped  missed   mcast
///       1234567    8910      0       0       0       0
///     TX:  bytes packets errors dropped carrier collsns
///        765432    1098      0       0       0       0
/// ```
///
/// The first number on the line after the `RX:`/`TX:` header is the byte
/// count. `ip -s -s` adds further header lines (`RX errors:`), which are
/// ignored because only a header whose next token is `bytes` matches.
pub fn parse_ip_link_bytes(output: &str, direction: Direction) -> Result<u64, CounterError> {
    let section = direction.ip_section();
    let mut lines = output.lines();
    while let Some(line) = lines.next() {
        let mut tokens = line.split_whitespace();
        if tokens.next() != Some(section) || tokens.next() != Some("bytes") {
            continue;
        }
        let value = lines
            .next()
            .and_then(|l| l.split_whitespace().next())
            .ok_or(CounterError::MissingSection(section))?;
        return value
            .parse::<u64>()
            .map_err(|_| CounterError::Parse(value.to_string()));
    }
    Err(CounterError::MissingSection(section))
}
