//! Configuration for serial-link.
//!
//! Settings come from serde-deserializable structs with defaults matching
//! the usual 9600 baud console device, overlaid with `SERIAL_LINK_*`
//! environment variables by [`Config::from_env`].

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::PortMode;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Which device to open and how
    pub port: PortConfig,

    /// Reader and liveness tuning
    pub session: SessionConfig,
}

/// Device selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PortConfig {
    /// Device path, e.g. /dev/ttyUSB0
    pub path: String,

    pub baud_rate: u32,

    /// Raw [`PortMode`] bits
    pub mode: u32,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            path: "/dev/ttyS1".to_string(),
            baud_rate: 9600,
            mode: 0,
        }
    }
}

impl PortConfig {
    /// Decode the mode bits, rejecting any this crate does not know.
    pub fn port_mode(&self) -> Result<PortMode> {
        PortMode::from_bits(self.mode)
            .ok_or_else(|| Error::Config(format!("unknown port mode bits {:#x}", self.mode)))
    }
}

/// Reader loop and liveness tracker tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Size of the buffer each read fills; not a framing constraint
    pub read_buffer_size: usize,

    /// Seconds between liveness checks
    pub check_interval_secs: u64,

    /// Silence longer than this many milliseconds counts as disconnected
    pub disconnect_threshold_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 100,
            check_interval_secs: 5,
            disconnect_threshold_ms: 2000,
        }
    }
}

impl SessionConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn disconnect_threshold(&self) -> Duration {
        Duration::from_millis(self.disconnect_threshold_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.read_buffer_size == 0 {
            return Err(Error::Config("read_buffer_size must be non-zero".into()));
        }
        if self.check_interval_secs == 0 {
            return Err(Error::Config("check_interval_secs must be non-zero".into()));
        }
        if self.disconnect_threshold_ms == 0 {
            return Err(Error::Config("disconnect_threshold_ms must be non-zero".into()));
        }
        Ok(())
    }
}

impl Config {
    /// Defaults overlaid with `SERIAL_LINK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`], reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(path) = lookup("SERIAL_LINK_PATH") {
            config.port.path = path;
        }
        if let Some(v) = parse_var(&lookup, "SERIAL_LINK_BAUD")? {
            config.port.baud_rate = v;
        }
        if let Some(v) = lookup("SERIAL_LINK_MODE") {
            config.port.mode = parse_mode(&v)?;
        }
        if let Some(v) = parse_var(&lookup, "SERIAL_LINK_READ_BUFFER")? {
            config.session.read_buffer_size = v;
        }
        if let Some(v) = parse_var(&lookup, "SERIAL_LINK_CHECK_INTERVAL_SECS")? {
            config.session.check_interval_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "SERIAL_LINK_DISCONNECT_MS")? {
            config.session.disconnect_threshold_ms = v;
        }

        config.port.port_mode()?;
        config.session.validate()?;
        Ok(config)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{key}={raw:?}: {e}"))),
    }
}

// Accepts decimal or 0x-prefixed hex.
fn parse_mode(raw: &str) -> Result<u32> {
    let raw = raw.trim();
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse::<u32>(),
    };
    parsed.map_err(|e| Error::Config(format!("SERIAL_LINK_MODE={raw:?}: {e}")))
}
