//! Walk-forward optimizer.
//!
//! Parameters are explored on the train segment, chosen on the validation
//! segment and reported on the test segment, which is run exactly once per
//! `optimize` call and only after selection is complete.

use backtester::{
    BacktestConfig, BacktestEngine, MetricKind, ParameterSet, PriceBar, StrategyFactory,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, info, warn};

use crate::error::{OptimizationError, Phase, Result};
use crate::parameter_grid::ParameterGrid;
use crate::result::{
    CombinationFailure, CombinationResult, OptimizationResult, RunSummary, WalkForwardReport,
    WindowResult,
};
use crate::splitter::DataSplitter;

/// Optimizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Metric used to select parameters.
    pub metric: MetricKind,
    pub train_pct: f64,
    pub val_pct: f64,
    pub test_pct: f64,
    /// Worker threads for the train and validation sweeps.
    pub workers: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            metric: MetricKind::SharpeRatio,
            train_pct: 0.6,
            val_pct: 0.2,
            test_pct: 0.2,
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl OptimizerConfig {
    pub fn with_metric(mut self, metric: MetricKind) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }
}

/// Successful results and failures of one sweep, both in grid order.
struct Sweep {
    results: Vec<CombinationResult>,
    failures: Vec<CombinationFailure>,
}

/// Train/validation/test optimizer over a parameter grid.
pub struct WalkForwardOptimizer {
    config: OptimizerConfig,
    splitter: DataSplitter,
    engine: BacktestEngine,
    pool: rayon::ThreadPool,
}

impl WalkForwardOptimizer {
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        let splitter = DataSplitter::new(config.train_pct, config.val_pct, config.test_pct)?;
        if config.workers == 0 {
            return Err(OptimizationError::configuration("workers must be at least 1"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("wfo-sweep-{}", i))
            .build()
            .map_err(|e| {
                OptimizationError::configuration(format!("failed to start sweep pool: {}", e))
            })?;

        info!(
            metric = %config.metric,
            workers = config.workers,
            "WalkForwardOptimizer initialized"
        );
        Ok(Self {
            config,
            splitter,
            engine: BacktestEngine::new(),
            pool,
        })
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn splitter(&self) -> &DataSplitter {
        &self.splitter
    }

    /// Run the full train, validation and test optimization.
    pub fn optimize(
        &self,
        factory: &StrategyFactory,
        bars: &[PriceBar],
        grid: &ParameterGrid,
        config: &BacktestConfig,
    ) -> Result<OptimizationResult> {
        config
            .validate()
            .map_err(|e| OptimizationError::configuration(e.to_string()))?;
        let metric = self.config.metric;
        let strategy_name = read_strategy_name(factory)?;

        info!(
            strategy = %strategy_name,
            combinations = grid.len(),
            bars = bars.len(),
            metric = %metric,
            "Starting walk-forward optimization"
        );

        let split = self.splitter.split(bars)?;

        info!("Phase 1: optimizing on training data");
        let train = self.sweep(factory, &split.train, grid, config, Phase::Train)?;

        info!("Phase 2: validating on validation data");
        let val = self.sweep(factory, &split.val, grid, config, Phase::Validation)?;

        let best = select_best(&val.results, metric).ok_or(OptimizationError::NoValidResults {
            phase: Phase::Validation,
            attempted: grid.len(),
            failed: val.failures.len(),
        })?;
        let train_match = train
            .results
            .binary_search_by_key(&best.index, |r| r.index)
            .ok()
            .map(|i| &train.results[i]);

        info!(
            params = %best.params,
            train_metric = ?train_match.map(|r| r.metric),
            val_metric = best.metric,
            "Best parameters selected"
        );

        info!("Phase 3: final test on unseen data");
        let (test_metric, test_summary, test_failure) =
            match self.evaluate(factory, &split.test, &best.params, config) {
                Ok((value, summary)) => {
                    info!(test_metric = value, "Test phase complete");
                    (Some(value), Some(summary), None)
                }
                Err(reason) => {
                    warn!(params = %best.params, error = %reason, "Test phase run failed");
                    (None, None, Some(reason))
                }
            };

        let best = best.clone();
        let mut failures = train.failures;
        failures.extend(val.failures);

        Ok(OptimizationResult {
            strategy_name,
            metric,
            best_params: best.params,
            best_metric: best.metric,
            train_metric: train_match.map(|r| r.metric),
            val_metric: best.metric,
            test_metric,
            train_summary: train_match.map(|r| r.summary.clone()),
            val_summary: best.summary,
            test_summary,
            all_results: val.results,
            failures,
            test_failure,
            split: split.summary(),
            combinations_tested: grid.len(),
        })
    }

    /// Rolling evaluation over expanding walk-forward windows.
    ///
    /// Each window picks its best parameters on its own train slice and is
    /// scored once on the test slice that follows it.
    pub fn walk_forward(
        &self,
        factory: &StrategyFactory,
        bars: &[PriceBar],
        grid: &ParameterGrid,
        config: &BacktestConfig,
        n_splits: usize,
        test_size_pct: f64,
    ) -> Result<WalkForwardReport> {
        config
            .validate()
            .map_err(|e| OptimizationError::configuration(e.to_string()))?;
        let metric = self.config.metric;
        let strategy_name = read_strategy_name(factory)?;
        let windows = self.splitter.walk_forward_splits(bars, n_splits, test_size_pct)?;

        let mut results = Vec::with_capacity(windows.len());
        let mut skipped_windows = Vec::new();

        for window in &windows {
            let sweep = match self.sweep(factory, &window.train, grid, config, Phase::Train) {
                Ok(sweep) => sweep,
                Err(OptimizationError::NoValidResults { failed, .. }) => {
                    warn!(
                        window = window.index,
                        failed,
                        "No surviving combinations, skipping window"
                    );
                    skipped_windows.push(window.index);
                    continue;
                }
                Err(e) => return Err(e),
            };
            let Some(best) = select_best(&sweep.results, metric) else {
                skipped_windows.push(window.index);
                continue;
            };

            let (out_of_sample_metric, test_failure) =
                match self.evaluate(factory, &window.test, &best.params, config) {
                    Ok((value, _)) => (Some(value), None),
                    Err(reason) => (None, Some(reason)),
                };

            info!(
                window = window.index,
                params = %best.params,
                in_sample = best.metric,
                out_of_sample = ?out_of_sample_metric,
                "Walk-forward window evaluated"
            );
            results.push(WindowResult {
                index: window.index,
                train_bars: window.train.len(),
                test_bars: window.test.len(),
                best_params: best.params.clone(),
                in_sample_metric: best.metric,
                out_of_sample_metric,
                test_failure,
            });
        }

        if results.is_empty() {
            return Err(OptimizationError::NoValidResults {
                phase: Phase::Train,
                attempted: grid.len() * windows.len(),
                failed: grid.len() * windows.len(),
            });
        }

        Ok(WalkForwardReport {
            strategy_name,
            metric,
            windows: results,
            skipped_windows,
        })
    }

    /// Evaluate every grid combination on `bars` in the worker pool.
    fn sweep(
        &self,
        factory: &StrategyFactory,
        bars: &[PriceBar],
        grid: &ParameterGrid,
        config: &BacktestConfig,
        phase: Phase,
    ) -> Result<Sweep> {
        let attempted = grid.len();
        let outcomes: Vec<std::result::Result<CombinationResult, CombinationFailure>> =
            self.pool.install(|| {
                (0..attempted)
                    .into_par_iter()
                    .map(|index| {
                        self.evaluate_combination(factory, bars, grid, index, config, phase)
                    })
                    .collect()
            });

        let mut sweep = Sweep {
            results: Vec::with_capacity(attempted),
            failures: Vec::new(),
        };
        for outcome in outcomes {
            match outcome {
                Ok(result) => sweep.results.push(result),
                Err(failure) => sweep.failures.push(failure),
            }
        }

        info!(
            phase = %phase,
            valid = sweep.results.len(),
            attempted,
            "Sweep complete"
        );

        if sweep.results.is_empty() {
            return Err(OptimizationError::NoValidResults {
                phase,
                attempted,
                failed: sweep.failures.len(),
            });
        }
        Ok(sweep)
    }

    fn evaluate_combination(
        &self,
        factory: &StrategyFactory,
        bars: &[PriceBar],
        grid: &ParameterGrid,
        index: usize,
        config: &BacktestConfig,
        phase: Phase,
    ) -> std::result::Result<CombinationResult, CombinationFailure> {
        let params = grid.get(index).unwrap_or_default();
        match self.evaluate(factory, bars, &params, config) {
            Ok((metric, summary)) => Ok(CombinationResult {
                index,
                params,
                metric,
                summary,
            }),
            Err(reason) => {
                debug!(
                    phase = %phase,
                    index,
                    params = %params,
                    error = %reason,
                    "Combination failed"
                );
                Err(CombinationFailure {
                    index,
                    params,
                    phase,
                    reason,
                })
            }
        }
    }

    /// One fresh strategy instance, one engine run. Strategy panics are
    /// reported as failures like any other error.
    fn evaluate(
        &self,
        factory: &StrategyFactory,
        bars: &[PriceBar],
        params: &ParameterSet,
        config: &BacktestConfig,
    ) -> std::result::Result<(f64, RunSummary), String> {
        let run = catch_unwind(AssertUnwindSafe(|| {
            let mut strategy = factory();
            strategy.initialize(params).map_err(|e| e.to_string())?;
            self.engine
                .run(strategy.as_ref(), bars, config)
                .map_err(|e| e.to_string())
        }));

        let result = match run {
            Ok(outcome) => outcome?,
            Err(panic) => {
                return Err(format!("strategy panicked: {}", panic_message(panic.as_ref())));
            }
        };

        // Infinite profit factor or Sortino is a legitimate score; only NaN
        // cannot be ranked.
        let value = result.metrics.value(self.config.metric);
        if value.is_nan() {
            return Err(format!("metric {} is not a number", self.config.metric));
        }
        Ok((value, RunSummary::from(&result.metrics)))
    }
}

/// Name reported by a fresh instance. A panicking factory is a configuration
/// error for the whole call.
fn read_strategy_name(factory: &StrategyFactory) -> Result<String> {
    catch_unwind(AssertUnwindSafe(|| factory().name().to_string())).map_err(|panic| {
        OptimizationError::configuration(format!(
            "strategy factory panicked: {}",
            panic_message(panic.as_ref())
        ))
    })
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Best result by `metric`; the earliest wins ties. For drawdown the
/// smallest magnitude wins.
pub(crate) fn select_best(
    results: &[CombinationResult],
    metric: MetricKind,
) -> Option<&CombinationResult> {
    results.iter().fold(None, |best, candidate| match best {
        Some(incumbent) if !metric.is_better(candidate.metric, incumbent.metric) => Some(incumbent),
        _ => Some(candidate),
    })
}
