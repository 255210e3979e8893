//! Configuration module
//!
//! Loads configuration from TOML files with per-field defaults and applies
//! `LEDGER_CONVEYOR_*` environment overrides.

use crate::channels::MAX_CHANNELS;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub channels: ChannelConfig,

    #[serde(default)]
    pub finality: FinalityConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Mixed into every envelope hash
    #[serde(default = "default_passphrase")]
    pub passphrase: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Upper bound for a single open request, never above `MAX_CHANNELS`
    #[serde(default = "default_max_channels")]
    pub max_channels: usize,

    /// Delay between allocation attempts while every channel is locked
    #[serde(default = "default_allocation_retry_ms")]
    pub allocation_retry_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalityConfig {
    /// Used when the envelope carries no usable expiry
    #[serde(default = "default_seconds_to_wait")]
    pub default_seconds_to_wait: u64,

    /// Derive the deadline from the envelope expiry when present
    #[serde(default = "default_true")]
    pub use_envelope_timeout: bool,

    /// First backoff sleep; doubles after every query
    #[serde(default = "default_initial_wait_ms")]
    pub initial_wait_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

// Default value functions
fn default_passphrase() -> String { "Test SDF Network ; September 2015".to_string() }
fn default_max_channels() -> usize { MAX_CHANNELS }
fn default_allocation_retry_ms() -> u64 { 1000 }
fn default_seconds_to_wait() -> u64 { 30 }
fn default_true() -> bool { true }
fn default_initial_wait_ms() -> u64 { 1000 }
fn default_log_level() -> String { "info".to_string() }

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            passphrase: default_passphrase(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_channels: default_max_channels(),
            allocation_retry_ms: default_allocation_retry_ms(),
        }
    }
}

impl ChannelConfig {
    pub fn allocation_retry(&self) -> Duration {
        Duration::from_millis(self.allocation_retry_ms)
    }
}

impl Default for FinalityConfig {
    fn default() -> Self {
        Self {
            default_seconds_to_wait: default_seconds_to_wait(),
            use_envelope_timeout: default_true(),
            initial_wait_ms: default_initial_wait_ms(),
        }
    }
}

impl FinalityConfig {
    pub fn initial_wait(&self) -> Duration {
        Duration::from_millis(self.initial_wait_ms)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {path}"))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from file, then apply `.env` and environment overrides
    pub fn from_file_with_env(path: &str) -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from a variable lookup
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(passphrase) = lookup("LEDGER_CONVEYOR_NETWORK_PASSPHRASE") {
            self.network.passphrase = passphrase;
        }
        if let Some(value) = lookup("LEDGER_CONVEYOR_MAX_CHANNELS") {
            self.channels.max_channels = value
                .parse()
                .with_context(|| format!("Invalid LEDGER_CONVEYOR_MAX_CHANNELS '{value}'"))?;
        }
        if let Some(value) = lookup("LEDGER_CONVEYOR_FINALITY_SECONDS") {
            self.finality.default_seconds_to_wait = value
                .parse()
                .with_context(|| format!("Invalid LEDGER_CONVEYOR_FINALITY_SECONDS '{value}'"))?;
        }
        if let Some(level) = lookup("LEDGER_CONVEYOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(value) = lookup("LEDGER_CONVEYOR_LOG_JSON") {
            self.logging.json = matches!(value.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.network.passphrase.is_empty() {
            bail!("network.passphrase must not be empty");
        }
        if self.channels.max_channels == 0 || self.channels.max_channels > MAX_CHANNELS {
            bail!(
                "channels.max_channels must be between 1 and {}, got {}",
                MAX_CHANNELS,
                self.channels.max_channels
            );
        }
        if self.channels.allocation_retry_ms == 0 {
            bail!("channels.allocation_retry_ms must be positive");
        }
        if self.finality.initial_wait_ms == 0 {
            bail!("finality.initial_wait_ms must be positive");
        }
        Ok(())
    }
}
