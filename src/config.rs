//! Configuration management
//!
//! Loads the configuration surface named in spec §9 from a JSON file, with
//! environment-variable overrides for anything deployment-specific (the
//! database path). Mirrors the teacher's `Config::from_file` pattern.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Full configuration surface for the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub initial_cash_minor_units: i64,
    pub max_qty_per_order: i64,
    pub max_price_minor_units: i64,
    pub fill_rate_floor: f64,
    pub fill_rate_ceiling: f64,
    pub retry_delay_secs: i64,
    pub retry_max: u32,
    pub freshness_window_secs: i64,
    pub database_path: String,
    pub matching_workers: usize,
    pub retry_workers: usize,
    pub market_open: String,
    pub market_close: String,
    pub market_timezone: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_cash_minor_units: 1_000_000,
            max_qty_per_order: 10_000,
            max_price_minor_units: 10_000_000,
            fill_rate_floor: 0.65,
            fill_rate_ceiling: 0.75,
            retry_delay_secs: 180,
            retry_max: 5,
            freshness_window_secs: 300,
            database_path: "equity_sim.db".to_string(),
            matching_workers: 3,
            retry_workers: 1,
            market_open: "09:00".to_string(),
            market_close: "15:30".to_string(),
            market_timezone: "Asia/Seoul".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON file, falling back to defaults for
    /// any field not present. `EQUITY_SIM_DATABASE_PATH` overrides the
    /// configured database path, for deployments that don't want a path
    /// baked into the config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("failed to read config file")?;
        let mut config: EngineConfig =
            serde_json::from_str(&contents).context("failed to parse config JSON")?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("EQUITY_SIM_DATABASE_PATH") {
            self.database_path = path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.fill_rate_floor >= 0.0 && self.fill_rate_floor <= 1.0, "fill_rate_floor out of range");
        anyhow::ensure!(self.fill_rate_ceiling >= self.fill_rate_floor, "fill_rate_ceiling below floor");
        anyhow::ensure!(self.max_qty_per_order > 0, "max_qty_per_order must be positive");
        anyhow::ensure!(self.max_price_minor_units > 0, "max_price_minor_units must be positive");
        anyhow::ensure!(self.retry_max > 0, "retry_max must be positive");
        crate::clock::MarketCalendar::from_config(&self.market_open, &self.market_close, &self.market_timezone)
            .context("invalid market hours configuration")?;
        Ok(())
    }
}
