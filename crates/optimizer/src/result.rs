//! Optimization outputs.

use backtester::{MetricKind, Metrics, ParameterSet};
use serde::{Deserialize, Serialize};

use crate::error::Phase;
use crate::splitter::SplitSummary;

/// The headline statistics of one engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_return: f64,
    pub sharpe_ratio: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub total_trades: usize,
}

impl From<&Metrics> for RunSummary {
    fn from(metrics: &Metrics) -> Self {
        Self {
            total_return: metrics.total_return,
            sharpe_ratio: metrics.sharpe_ratio,
            max_drawdown: metrics.max_drawdown,
            win_rate: metrics.win_rate,
            total_trades: metrics.total_trades,
        }
    }
}

/// A parameter combination that completed a sweep run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationResult {
    /// Position of the combination in grid order.
    pub index: usize,
    pub params: ParameterSet,
    /// Value of the optimization metric.
    pub metric: f64,
    pub summary: RunSummary,
}

/// A parameter combination that could not be evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinationFailure {
    pub index: usize,
    pub params: ParameterSet,
    pub phase: Phase,
    pub reason: String,
}

/// Outcome of a train/validation/test optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub strategy_name: String,
    pub metric: MetricKind,
    pub best_params: ParameterSet,
    /// Validation metric of the selected combination.
    pub best_metric: f64,
    /// Train metric of the selected combination; `None` if it failed in train.
    pub train_metric: Option<f64>,
    pub val_metric: f64,
    /// `None` when the single test run failed.
    pub test_metric: Option<f64>,
    pub train_summary: Option<RunSummary>,
    pub val_summary: RunSummary,
    pub test_summary: Option<RunSummary>,
    /// Every successful validation result, in grid order.
    pub all_results: Vec<CombinationResult>,
    /// Train and validation failures, in phase then grid order.
    pub failures: Vec<CombinationFailure>,
    pub test_failure: Option<String>,
    pub split: SplitSummary,
    /// Size of the grid.
    pub combinations_tested: usize,
}

impl OptimizationResult {
    /// Best `n` validation results, best first. Ties keep grid order.
    pub fn top_n(&self, n: usize) -> Vec<&CombinationResult> {
        let mut ranked: Vec<&CombinationResult> = self.all_results.iter().collect();
        ranked.sort_by(|a, b| self.metric.compare(b.metric, a.metric));
        ranked.truncate(n);
        ranked
    }

    /// `|val - test| / |val|`; `None` without a test metric or when the
    /// validation metric is zero.
    pub fn degradation(&self) -> Option<f64> {
        relative_change(self.val_metric, self.test_metric?)
    }

    /// `|train - val| / |train|` for the selected combination.
    pub fn train_val_degradation(&self) -> Option<f64> {
        relative_change(self.train_metric?, self.val_metric)
    }

    /// Combinations without a validation result.
    pub fn excluded_combinations(&self) -> usize {
        self.combinations_tested.saturating_sub(self.all_results.len())
    }

    pub fn failures_in(&self, phase: Phase) -> usize {
        self.failures.iter().filter(|f| f.phase == phase).count()
    }
}

fn relative_change(reference: f64, observed: f64) -> Option<f64> {
    if reference == 0.0 || !reference.is_finite() || !observed.is_finite() {
        return None;
    }
    Some((reference - observed).abs() / reference.abs())
}

/// Outcome of one walk-forward window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    pub index: usize,
    pub train_bars: usize,
    pub test_bars: usize,
    pub best_params: ParameterSet,
    pub in_sample_metric: f64,
    pub out_of_sample_metric: Option<f64>,
    pub test_failure: Option<String>,
}

/// Rolling walk-forward evaluation across expanding windows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub strategy_name: String,
    pub metric: MetricKind,
    pub windows: Vec<WindowResult>,
    /// Windows whose train sweep had no surviving combination.
    pub skipped_windows: Vec<usize>,
}

impl WalkForwardReport {
    /// Mean out-of-sample metric over windows whose test run succeeded.
    pub fn mean_out_of_sample(&self) -> Option<f64> {
        let values: Vec<f64> = self
            .windows
            .iter()
            .filter_map(|w| w.out_of_sample_metric)
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    }

    pub fn mean_in_sample(&self) -> Option<f64> {
        if self.windows.is_empty() {
            return None;
        }
        let total: f64 = self.windows.iter().map(|w| w.in_sample_metric).sum();
        Some(total / self.windows.len() as f64)
    }

    /// Share of evaluated windows that picked the most common parameter set.
    pub fn parameter_stability(&self) -> f64 {
        if self.windows.is_empty() {
            return 0.0;
        }
        let modal = self
            .windows
            .iter()
            .map(|w| {
                self.windows
                    .iter()
                    .filter(|other| other.best_params == w.best_params)
                    .count()
            })
            .max()
            .unwrap_or(0);
        modal as f64 / self.windows.len() as f64
    }
}
