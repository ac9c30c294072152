//! Strategy Lab: backtesting and walk-forward parameter optimization
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the workspace crates. For actual functionality, use the individual
//! crates directly:
//!
//! - `backtester`: Price bars, strategies, the backtest engine and metrics
//! - `optimizer`: Data splitting, parameter grids, walk-forward optimization
//! - `wfo-cli`: The `walk-forward` command-line driver

// Re-export for benchmarks
pub use backtester as engine;
pub use optimizer as optimization;
