//! Layered settings for the command-line driver.
//!
//! Defaults, then an optional `walk-forward.toml`, then `WFO_*` environment
//! variables (a `.env` file is honored). Command-line flags override all of
//! these in `main`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "walk-forward";
const ENV_PREFIX: &str = "WFO";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Starting cash for every backtest.
    pub capital: Decimal,
    /// Commission rate per fill.
    pub commission: Decimal,
    /// Slippage rate per fill.
    pub slippage: Decimal,
    /// Optimization metric name.
    pub metric: String,
    /// Sweep worker threads; all cores when unset.
    pub workers: Option<usize>,
    /// Number of validation results listed in the report.
    pub top: usize,
    /// CSV file receiving `--record` rows.
    pub performance_store: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            capital: Decimal::new(10000, 0),
            commission: Decimal::new(1, 3),
            slippage: Decimal::new(5, 4),
            metric: "sharpe_ratio".to_string(),
            workers: None,
            top: 5,
            performance_store: PathBuf::from("data/performance/performance_metrics.csv"),
        }
    }
}

impl Settings {
    /// Load settings. `file` replaces the default `walk-forward.toml` lookup
    /// and must exist when given.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let file_source = match file {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        config::Config::builder()
            .add_source(file_source)
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")
    }
}
