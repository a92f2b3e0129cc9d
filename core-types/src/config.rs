// Copyright (c) James Kassemi, SC, US. All rights reserved.

use config::{Config, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const CONFIG_FILE: &str = "collector.toml";
const ENV_PREFIX: &str = "COLLECTOR";

/// Collector knobs. Defaults give a five-minute cadence over twelve iterations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub iterations: Iterations,
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub pacing: PacingSettings,
    #[serde(default)]
    pub retry: RetrySettings,
}

fn default_currency() -> String {
    "BTC".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("deribit_data")
}

fn default_interval_secs() -> u64 {
    300
}

fn default_rest_base_url() -> String {
    "https://www.deribit.com".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// Number of scheduler cycles: a positive count or `"unbounded"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IterationsRepr", into = "IterationsRepr")]
pub enum Iterations {
    Count(u64),
    Unbounded,
}

impl Iterations {
    /// True once `completed` cycles satisfy the bound.
    pub fn is_exhausted(&self, completed: u64) -> bool {
        match self {
            Iterations::Count(limit) => completed >= *limit,
            Iterations::Unbounded => false,
        }
    }
}

impl Default for Iterations {
    fn default() -> Self {
        Iterations::Count(12)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum IterationsRepr {
    Count(u64),
    Keyword(String),
}

impl TryFrom<IterationsRepr> for Iterations {
    type Error = String;

    fn try_from(value: IterationsRepr) -> Result<Self, Self::Error> {
        match value {
            IterationsRepr::Count(0) => Err("iterations must be positive".to_string()),
            IterationsRepr::Count(n) => Ok(Iterations::Count(n)),
            IterationsRepr::Keyword(word) => match word.trim().to_ascii_lowercase().as_str() {
                "unbounded" | "forever" | "indefinitely" => Ok(Iterations::Unbounded),
                other => other
                    .parse::<u64>()
                    .map_err(|_| format!("invalid iterations value '{word}'"))
                    .and_then(|n| Iterations::try_from(IterationsRepr::Count(n))),
            },
        }
    }
}

impl From<Iterations> for IterationsRepr {
    fn from(value: Iterations) -> Self {
        match value {
            Iterations::Count(n) => IterationsRepr::Count(n),
            Iterations::Unbounded => IterationsRepr::Keyword("unbounded".to_string()),
        }
    }
}

/// Request pacing budget, applied in aggregate across concurrent requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacingSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_delay_ms() -> u64 {
    500
}

fn default_max_in_flight() -> usize {
    1
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> usize {
    3
}

fn default_base_delay_ms() -> u64 {
    250
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl CollectorConfig {
    /// Defaults, then `collector.toml` if present, then `COLLECTOR_*` environment variables
    /// (nested keys use `__`, e.g. `COLLECTOR_PACING__BATCH_SIZE`).
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Self::from_settings(settings)
    }

    pub fn from_settings(settings: Config) -> Result<Self, ConfigError> {
        let mut config: Self = settings.try_deserialize()?;
        config.normalize()?;
        Ok(config)
    }

    fn normalize(&mut self) -> Result<(), ConfigError> {
        self.currency = self.currency.trim().to_ascii_uppercase();
        if self.currency.is_empty() {
            return Err(ConfigError::Message("currency is required".to_string()));
        }
        if self.interval_secs == 0 {
            return Err(ConfigError::Message("interval_secs must be positive".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.pacing.batch_size == 0 {
            return Err(ConfigError::Message(
                "pacing.batch_size must be positive".to_string(),
            ));
        }
        self.pacing.max_in_flight = self.pacing.max_in_flight.clamp(1, self.pacing.batch_size);
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl PacingSettings {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}
