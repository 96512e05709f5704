//! Tap configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if AMQPWIRE_CONFIG is set)
//! 3. Environment variables

use amqpwire_client::{ConfigError, FramerConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Frame tap configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
    /// Protocol major version announced to clients.
    pub major: u8,
    /// Protocol minor version announced to clients.
    pub minor: u8,
    /// Per-connection framer settings.
    pub framer: FramerConfig,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], amqpwire_protocol::DEFAULT_PORT)),
            major: 0,
            minor: 10,
            framer: FramerConfig::default(),
        }
    }
}

impl TapConfig {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("AMQPWIRE_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup("AMQPWIRE_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
        if let Some(version) = lookup("AMQPWIRE_VERSION") {
            if let Some((major, minor)) = parse_version(&version) {
                self.major = major;
                self.minor = minor;
            }
        }
        self.framer.apply_overrides(lookup);
    }
}

/// Parses `major-minor` or `major.minor`.
fn parse_version(s: &str) -> Option<(u8, u8)> {
    let (major, minor) = s.trim().split_once(['-', '.'])?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}
