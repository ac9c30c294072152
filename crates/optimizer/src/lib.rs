//! Optimizer
//!
//! Walk-forward parameter optimization on top of the backtester.
//!
//! # Features
//!
//! - **Data Splitter**: Chronological train/validation/test splits and expanding walk-forward windows
//! - **Parameter Grid**: Lazy Cartesian-product search spaces with predefined grids for built-in strategies
//! - **Walk-Forward Optimizer**: Parallel train and validation sweeps, a single test run on the held-out segment
//!
//! # Example
//!
//! ```ignore
//! use backtester::{BacktestConfig, StrategyRegistry};
//! use optimizer::{predefined_grid, OptimizerConfig, WalkForwardOptimizer};
//!
//! let registry = StrategyRegistry::with_builtin();
//! let factory = registry.get("sma_crossover")?;
//! let grid = predefined_grid("sma_crossover").unwrap_or_default();
//!
//! let optimizer = WalkForwardOptimizer::new(OptimizerConfig::default())?;
//! let result = optimizer.optimize(&factory, &bars, &grid, &BacktestConfig::default())?;
//! println!("Best: {} (test {:?})", result.best_params, result.test_metric);
//! ```

pub mod error;
pub mod parameter_grid;
pub mod result;
pub mod splitter;
pub mod walk_forward;

// Re-exports
pub use error::{OptimizationError, Phase, Result};
pub use parameter_grid::{predefined_grid, GridIter, ParameterGrid};
pub use result::{
    CombinationFailure, CombinationResult, OptimizationResult, RunSummary, WalkForwardReport,
    WindowResult,
};
pub use splitter::{DataSplit, DataSplitter, SegmentSummary, SplitSummary, WalkForwardWindow};
pub use walk_forward::{OptimizerConfig, WalkForwardOptimizer};
