//! Strategy capability contract and the explicit strategy registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::data_store::PriceBar;
use crate::error::{BacktestError, Result};
use crate::library::{BollingerBreakout, MacdMomentum, RsiMeanReversion, SmaCrossover};
use crate::params::ParameterSet;

/// Kind of trading signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

/// A trading signal for one bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Timestamp of the bar this signal refers to.
    pub timestamp: DateTime<Utc>,
    pub signal_type: SignalType,
    /// Conviction in [0, 1].
    pub confidence: f64,
    /// Informational annotations; never read by the fill logic.
    pub metadata: BTreeMap<String, String>,
}

impl Signal {
    pub fn new(timestamp: DateTime<Utc>, signal_type: SignalType) -> Self {
        Self {
            timestamp,
            signal_type,
            confidence: 1.0,
            metadata: BTreeMap::new(),
        }
    }

    pub fn buy(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, SignalType::Buy)
    }

    pub fn sell(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, SignalType::Sell)
    }

    pub fn hold(timestamp: DateTime<Utc>) -> Self {
        Self::new(timestamp, SignalType::Hold)
    }

    /// Set confidence, clamped to [0, 1]. NaN becomes 0.
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.metadata.insert(key.into(), value.to_string());
        self
    }
}

/// Capability every trading strategy provides to the backtest engine.
///
/// `generate_signals` is called once per run with the whole bar series and
/// may return one signal per bar or a sparse list; bars without a signal are
/// treated as HOLD.
#[cfg_attr(test, mockall::automock)]
pub trait Strategy: Send + Sync {
    /// Human-readable strategy name.
    fn name(&self) -> &str;

    /// Apply a parameter combination. Invalid values fail with
    /// [`BacktestError::StrategyConfig`].
    fn initialize(&mut self, params: &ParameterSet) -> Result<()>;

    /// Produce signals for the given bars.
    fn generate_signals(&self, bars: &[PriceBar]) -> Result<Vec<Signal>>;

    /// The parameters currently in effect.
    fn parameters(&self) -> ParameterSet;

    /// Whether BUY signals should be sized by their confidence.
    fn sizes_by_confidence(&self) -> bool {
        false
    }
}

/// Constructor for fresh, uninitialized strategy instances.
pub type StrategyFactory = Arc<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// Explicit name-to-factory map, built once at startup and passed to
/// whoever needs to construct strategies.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in reference strategies.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(
            "sma_crossover",
            Arc::new(|| -> Box<dyn Strategy> { Box::new(SmaCrossover::default()) }),
        );
        registry.register(
            "rsi_mean_reversion",
            Arc::new(|| -> Box<dyn Strategy> { Box::new(RsiMeanReversion::default()) }),
        );
        registry.register(
            "bollinger_breakout",
            Arc::new(|| -> Box<dyn Strategy> { Box::new(BollingerBreakout::default()) }),
        );
        registry.register(
            "macd_momentum",
            Arc::new(|| -> Box<dyn Strategy> { Box::new(MacdMomentum::default()) }),
        );
        registry
    }

    /// Register a factory. Names are normalized to lowercase snake_case.
    pub fn register(&mut self, name: &str, factory: StrategyFactory) {
        self.factories.insert(normalize_name(name), factory);
    }

    /// Look up a factory by name (case and `-`/`_` insensitive).
    pub fn get(&self, name: &str) -> Result<StrategyFactory> {
        self.factories
            .get(&normalize_name(name))
            .cloned()
            .ok_or_else(|| BacktestError::UnknownStrategy(name.to_string()))
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|k| k.as_str()).collect()
    }
}

/// Lowercase and map `-` to `_`.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace('-', "_")
}
