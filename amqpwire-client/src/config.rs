//! Framer configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file
//! 3. Environment variables

use crate::abort::Deadline;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default socket read/write timeout. Bounds how long an I/O attempt blocks
/// before the abort predicate is polled.
pub const DEFAULT_IO_TIMEOUT_MS: u64 = 1000;

/// Timeouts and socket options for a framer.
///
/// A timeout of `None` (or `0` in YAML/env) blocks without bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FramerConfig {
    /// Socket read timeout for the blocking framer.
    pub read_timeout_ms: Option<u64>,
    /// Socket write timeout for the blocking framer.
    pub write_timeout_ms: Option<u64>,
    /// Per-attempt timeout for the async framer.
    pub io_timeout_ms: Option<u64>,
    /// Abort blocked operations this long after the deadline is created.
    pub deadline_secs: Option<u64>,
    /// Disable Nagle's algorithm.
    pub nodelay: bool,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: Some(DEFAULT_IO_TIMEOUT_MS),
            write_timeout_ms: Some(DEFAULT_IO_TIMEOUT_MS),
            io_timeout_ms: Some(DEFAULT_IO_TIMEOUT_MS),
            deadline_secs: None,
            nodelay: true,
        }
    }
}

impl FramerConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `AMQPWIRE_*` overrides fetched through `lookup`.
    /// Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let millis = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());

        if let Some(ms) = millis("AMQPWIRE_READ_TIMEOUT_MS") {
            self.read_timeout_ms = Some(ms);
        }
        if let Some(ms) = millis("AMQPWIRE_WRITE_TIMEOUT_MS") {
            self.write_timeout_ms = Some(ms);
        }
        if let Some(ms) = millis("AMQPWIRE_IO_TIMEOUT_MS") {
            self.io_timeout_ms = Some(ms);
        }
        if let Some(secs) = millis("AMQPWIRE_DEADLINE_SECS") {
            self.deadline_secs = Some(secs);
        }
        if let Some(nodelay) = lookup("AMQPWIRE_NODELAY") {
            self.nodelay = nodelay == "1" || nodelay.to_lowercase() == "true";
        }
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.write_timeout_ms)
    }

    pub fn io_timeout(&self) -> Option<Duration> {
        non_zero_millis(self.io_timeout_ms)
    }

    /// A deadline starting now, if one is configured.
    ///
    /// A deadline too far away to represent behaves as no deadline.
    pub fn deadline(&self) -> Option<Deadline> {
        self.deadline_secs
            .filter(|secs| *secs > 0)
            .and_then(|secs| Deadline::after(Duration::from_secs(secs)))
    }

    /// Applies timeouts and `TCP_NODELAY` to a blocking socket.
    pub fn configure_tcp(&self, stream: &TcpStream) -> io::Result<()> {
        stream.set_read_timeout(self.read_timeout())?;
        stream.set_write_timeout(self.write_timeout())?;
        stream.set_nodelay(self.nodelay)?;
        Ok(())
    }
}

fn non_zero_millis(ms: Option<u64>) -> Option<Duration> {
    ms.filter(|ms| *ms > 0).map(Duration::from_millis)
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("failed to parse config file '{}': {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}
