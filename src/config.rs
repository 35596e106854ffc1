//! Configuration loading and validation.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result, ValidationError};

/// Main configuration for scanning and blocking.
///
/// Every field has a default, so an empty file (or no file at all) is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Discovery scanner settings.
    #[serde(default)]
    pub scan: ScanSettings,

    /// Block loop settings.
    #[serde(default)]
    pub block: BlockSettings,
}

/// Discovery scanner settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScanSettings {
    /// How long replies are accepted, measured from the first request.
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Read timeout of the raw socket, i.e. the receive poll interval.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Largest number of candidate addresses a single scan will probe.
    #[serde(default = "default_max_hosts")]
    pub max_hosts: usize,
}

impl ScanSettings {
    pub const fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_hosts: default_max_hosts(),
        }
    }
}

/// Which peers receive forged replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Poison the target about the gateway and the gateway about the target.
    #[default]
    Bidirectional,
    /// Poison only the target's view of the gateway.
    TargetOnly,
}

/// Hardware address the forged replies point at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sink {
    /// A locally administered address no host answers for.
    #[default]
    Blackhole,
    /// Our own interface address. Traffic is dropped only while IP
    /// forwarding is disabled on this host.
    Local,
}

/// Block loop settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockSettings {
    /// Interval between forged reply rounds.
    #[serde(default = "default_block_interval_ms")]
    pub interval_ms: u64,

    /// Number of request rounds sent while resolving target and gateway.
    #[serde(default = "default_resolve_attempts")]
    pub resolve_attempts: u32,

    /// How long each resolution round listens for answers.
    #[serde(default = "default_resolve_timeout_ms")]
    pub resolve_timeout_ms: u64,

    #[serde(default)]
    pub strategy: Strategy,

    #[serde(default)]
    pub sink: Sink,

    /// Send corrective replies carrying the real addresses on graceful stop.
    #[serde(default = "default_restore_on_shutdown")]
    pub restore_on_shutdown: bool,
}

impl BlockSettings {
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub const fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

impl Default for BlockSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_block_interval_ms(),
            resolve_attempts: default_resolve_attempts(),
            resolve_timeout_ms: default_resolve_timeout_ms(),
            strategy: Strategy::default(),
            sink: Sink::default(),
            restore_on_shutdown: default_restore_on_shutdown(),
        }
    }
}

const fn default_window_ms() -> u64 {
    3000
}

const fn default_poll_interval_ms() -> u64 {
    10
}

const fn default_max_hosts() -> usize {
    4096
}

const fn default_block_interval_ms() -> u64 {
    1500
}

const fn default_resolve_attempts() -> u32 {
    5
}

const fn default_resolve_timeout_ms() -> u64 {
    500
}

const fn default_restore_on_shutdown() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate().map_err(ConfigError::Validation)?;
        Ok(config)
    }

    /// Validate the configuration.
    pub const fn validate(&self) -> std::result::Result<(), ValidationError> {
        let scan = &self.scan;
        if scan.window_ms == 0 {
            return Err(ValidationError::ZeroScanWindow);
        }
        if scan.poll_interval_ms == 0 {
            return Err(ValidationError::ZeroPollInterval);
        }
        if scan.poll_interval_ms > scan.window_ms {
            return Err(ValidationError::PollIntervalExceedsWindow {
                poll_ms: scan.poll_interval_ms,
                window_ms: scan.window_ms,
            });
        }
        if scan.max_hosts == 0 {
            return Err(ValidationError::ZeroMaxHosts);
        }

        let block = &self.block;
        if block.interval_ms == 0 {
            return Err(ValidationError::ZeroBlockInterval);
        }
        if block.resolve_attempts == 0 {
            return Err(ValidationError::ZeroResolveAttempts);
        }
        if block.resolve_timeout_ms == 0 {
            return Err(ValidationError::ZeroResolveTimeout);
        }

        Ok(())
    }
}
