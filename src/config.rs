//! Engine configuration: TOML file loading, environment overrides,
//! validation, and sensible defaults.

use crate::errors::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub round: RoundConfig,
    pub fairness: FairnessConfig,
    pub ledger: LedgerConfig,
    pub history: HistoryConfig,
}

/// Round timing and multiplier curve
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoundConfig {
    /// Betting window duration in milliseconds
    pub betting_window_ms: u64,
    /// Pause between a round settling and the next betting window
    pub inter_round_pause_ms: u64,
    /// Exponential multiplier growth rate per second
    pub growth_rate: f64,
    /// Auto-cashout scan interval in milliseconds
    pub tick_interval_ms: u64,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            betting_window_ms: 5_000,
            inter_round_pause_ms: 2_000,
            growth_rate: 0.07,
            tick_interval_ms: 50,
        }
    }
}

/// Published fairness parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FairnessConfig {
    /// House edge folded into the crash-point reduction, in percent
    pub house_edge_percent: u8,
    /// Crash multiplier cap
    pub max_multiplier: f64,
    /// Client seed mixed into every commitment
    pub client_seed: String,
}

impl Default for FairnessConfig {
    fn default() -> Self {
        Self {
            house_edge_percent: 3,
            max_multiplier: 1000.0,
            client_seed: "altitude-public-v1".to_string(),
        }
    }
}

/// External account-ledger collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Timeout applied to every debit/credit call
    pub call_timeout_ms: u64,
    /// Initial backoff between credit retry attempts
    pub credit_retry_initial_ms: u64,
    /// Backoff cap for credit retries
    pub credit_retry_max_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 2_000,
            credit_retry_initial_ms: 250,
            credit_retry_max_ms: 5_000,
        }
    }
}

/// Round history retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Number of completed rounds kept in memory
    pub retention: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { retention: 500 }
    }
}

impl EngineConfig {
    pub fn betting_window(&self) -> Duration {
        Duration::from_millis(self.round.betting_window_ms)
    }

    pub fn inter_round_pause(&self) -> Duration {
        Duration::from_millis(self.round.inter_round_pause_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.round.tick_interval_ms)
    }

    pub fn ledger_call_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger.call_timeout_ms)
    }

    /// Validate configuration values
    pub fn validate(&self) -> EngineResult<()> {
        if self.round.betting_window_ms == 0 {
            return Err(EngineError::Configuration(
                "round.betting_window_ms cannot be zero".to_string(),
            ));
        }
        if !(10..=250).contains(&self.round.tick_interval_ms) {
            return Err(EngineError::Configuration(format!(
                "round.tick_interval_ms {} outside 10..=250",
                self.round.tick_interval_ms
            )));
        }
        if self.round.growth_rate <= 0.0 || !self.round.growth_rate.is_finite() {
            return Err(EngineError::Configuration(format!(
                "round.growth_rate {} must be positive and finite",
                self.round.growth_rate
            )));
        }
        if !(1..=10).contains(&self.fairness.house_edge_percent) {
            return Err(EngineError::Configuration(format!(
                "fairness.house_edge_percent {} outside 1..=10",
                self.fairness.house_edge_percent
            )));
        }
        if self.fairness.max_multiplier <= 1.0 {
            return Err(EngineError::Configuration(format!(
                "fairness.max_multiplier {} must exceed 1.00",
                self.fairness.max_multiplier
            )));
        }
        if self.ledger.call_timeout_ms == 0 {
            return Err(EngineError::Configuration(
                "ledger.call_timeout_ms cannot be zero".to_string(),
            ));
        }
        if self.ledger.credit_retry_initial_ms == 0
            || self.ledger.credit_retry_max_ms < self.ledger.credit_retry_initial_ms
        {
            return Err(EngineError::Configuration(
                "ledger credit retry backoff must be positive and non-decreasing".to_string(),
            ));
        }
        if self.history.retention == 0 {
            return Err(EngineError::Configuration(
                "history.retention cannot be zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration loader with file and environment variable support
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the TOML configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> EngineResult<EngineConfig> {
        let mut config = if let Some(ref path) = self.config_path {
            self.load_from_file(path)?
        } else {
            EngineConfig::default()
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> EngineResult<EngineConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Configuration(format!("failed to read {}: {}", path, e)))?;
        toml::from_str(&content)
            .map_err(|e| EngineError::Configuration(format!("failed to parse TOML: {}", e)))
    }

    fn apply_env_overrides(&self, config: &mut EngineConfig) -> EngineResult<()> {
        if let Ok(ms) = env::var("ALTITUDE_BETTING_WINDOW_MS") {
            config.round.betting_window_ms = parse_env("ALTITUDE_BETTING_WINDOW_MS", &ms)?;
        }
        if let Ok(ms) = env::var("ALTITUDE_TICK_INTERVAL_MS") {
            config.round.tick_interval_ms = parse_env("ALTITUDE_TICK_INTERVAL_MS", &ms)?;
        }
        if let Ok(pct) = env::var("ALTITUDE_HOUSE_EDGE_PERCENT") {
            config.fairness.house_edge_percent = parse_env("ALTITUDE_HOUSE_EDGE_PERCENT", &pct)?;
        }
        if let Ok(n) = env::var("ALTITUDE_HISTORY_RETENTION") {
            config.history.retention = parse_env("ALTITUDE_HISTORY_RETENTION", &n)?;
        }
        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save(&self, config: &EngineConfig, path: &str) -> EngineResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| EngineError::Configuration(format!("failed to serialize: {}", e)))?;
        std::fs::write(path, toml_string)
            .map_err(|e| EngineError::Configuration(format!("failed to write {}: {}", path, e)))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> EngineResult<T> {
    value.parse().map_err(|_| {
        EngineError::Configuration(format!("invalid value for {}: '{}'", name, value))
    })
}
