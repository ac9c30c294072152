//! Backtester
//!
//! Single-asset, long-only historical simulation for signal-based trading
//! strategies.
//!
//! # Features
//!
//! - **Strategy Trait**: Pluggable strategy interface plus an explicit registry of factories
//! - **Historical Data Store**: CSV-backed OHLCV bars with range queries
//! - **Backtest Engine**: Bar-by-bar fills with slippage and commission
//! - **Metrics**: Return, Sharpe, Sortino, drawdown, win rate, profit factor
//! - **Built-in Strategies**: SMA crossover, RSI mean reversion, Bollinger breakout, MACD momentum
//!
//! # Example
//!
//! ```ignore
//! use backtester::{BacktestConfig, BacktestEngine, HistoricalDataStore, ParameterSet, StrategyRegistry};
//!
//! let bars = HistoricalDataStore::new("btc_1h.csv").load_bars()?;
//! let registry = StrategyRegistry::with_builtin();
//!
//! let mut strategy = registry.get("sma_crossover")?();
//! strategy.initialize(&ParameterSet::from_pairs([("fast_period", 10), ("slow_period", 50)]))?;
//!
//! let result = BacktestEngine::new().run(strategy.as_ref(), &bars, &BacktestConfig::default())?;
//! println!("Return: {:.2}%", result.metrics.total_return * 100.0);
//! ```

pub mod data_store;
pub mod error;
pub mod library;
pub mod metrics;
pub mod params;
pub mod simulator;
pub mod strategy;

// Re-exports
pub use data_store::{validate_series, DataQuery, HistoricalDataStore, PriceBar, TimeResolution};
pub use error::{BacktestError, Result};
pub use library::{BollingerBreakout, MacdMomentum, RsiMeanReversion, SmaCrossover};
pub use metrics::{EquityCurve, EquityPoint, MetricKind, Metrics};
pub use params::{ParamValue, ParameterSet};
pub use simulator::{
    BacktestConfig, BacktestEngine, BacktestResult, ExitReason, Position, Trade, TradeSide,
};
pub use strategy::{Signal, SignalType, Strategy, StrategyFactory, StrategyRegistry};
