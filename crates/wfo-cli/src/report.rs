//! Plain-text rendering of optimization results.

use optimizer::{OptimizationResult, WalkForwardReport};
use std::fmt::Write;

const RULE_WIDTH: usize = 60;

/// How much the chosen parameters lost between validation and test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradationStatus {
    Good,
    Moderate,
    Significant,
}

impl DegradationStatus {
    pub fn classify(ratio: f64) -> Self {
        if ratio < 0.10 {
            DegradationStatus::Good
        } else if ratio < 0.25 {
            DegradationStatus::Moderate
        } else {
            DegradationStatus::Significant
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DegradationStatus::Good => "Good generalization",
            DegradationStatus::Moderate => "Moderate overfitting",
            DegradationStatus::Significant => "Significant overfitting",
        }
    }
}

fn rule(out: &mut String) {
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "n/a".to_string(), |v| format!("{:.1}%", v * 100.0))
}

/// Render a train/validation/test optimization.
pub fn render_optimization(result: &OptimizationResult, top: usize) -> String {
    let mut out = String::new();
    let metric = result.metric;

    rule(&mut out);
    let _ = writeln!(out, "RESULTS: {}", result.strategy_name);
    rule(&mut out);

    let _ = writeln!(
        out,
        "\nData: {} train / {} validation / {} test bars",
        result.split.train.bars, result.split.validation.bars, result.split.test.bars
    );

    let _ = writeln!(out, "\nBest Parameters:");
    if result.best_params.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for (name, value) in result.best_params.iter() {
        let _ = writeln!(out, "  {}: {}", name, value);
    }

    let _ = writeln!(out, "\nPerformance ({}):", metric);
    match result.train_metric {
        Some(train) => {
            let _ = writeln!(out, "  Train:      {:.4}", train);
        }
        None => {
            let _ = writeln!(out, "  Train:      n/a");
        }
    }
    let _ = writeln!(out, "  Validation: {:.4}", result.val_metric);
    match (result.test_metric, &result.test_failure) {
        (Some(test), _) => {
            let _ = writeln!(out, "  Test:       {:.4}  <- expected future performance", test);
        }
        (None, Some(reason)) => {
            let _ = writeln!(out, "  Test:       failed ({})", reason);
        }
        (None, None) => {
            let _ = writeln!(out, "  Test:       n/a");
        }
    }

    if let Some(val_test) = result.degradation() {
        let _ = writeln!(out, "\nOverfitting Check:");
        let _ = writeln!(
            out,
            "  Train->Val degradation:  {}",
            percent(result.train_val_degradation())
        );
        let _ = writeln!(out, "  Val->Test degradation:   {}", percent(Some(val_test)));
        let _ = writeln!(out, "  Status: {}", DegradationStatus::classify(val_test).label());
    }

    let excluded = result.excluded_combinations();
    if excluded > 0 {
        let _ = writeln!(
            out,
            "\nExcluded combinations: {} of {} ({} failures recorded)",
            excluded,
            result.combinations_tested,
            result.failures.len()
        );
    }

    let _ = writeln!(out, "\nTop {} Parameter Combinations (by validation):", top);
    for (rank, combo) in result.top_n(top).iter().enumerate() {
        let _ = writeln!(
            out,
            "  {}. {}={:.4}, return={:.2}%, params={}",
            rank + 1,
            metric,
            combo.metric,
            combo.summary.total_return * 100.0,
            combo.params
        );
    }

    out.push('\n');
    rule(&mut out);
    out
}

/// Render a rolling walk-forward evaluation.
pub fn render_walk_forward(report: &WalkForwardReport) -> String {
    let mut out = String::new();

    rule(&mut out);
    let _ = writeln!(out, "WALK-FORWARD: {} ({})", report.strategy_name, report.metric);
    rule(&mut out);

    for window in &report.windows {
        let _ = writeln!(
            out,
            "  Window {}: train={} test={} in-sample={:.4} out-of-sample={} params={}",
            window.index + 1,
            window.train_bars,
            window.test_bars,
            window.in_sample_metric,
            window
                .out_of_sample_metric
                .map_or_else(|| "failed".to_string(), |v| format!("{:.4}", v)),
            window.best_params
        );
    }
    for index in &report.skipped_windows {
        let _ = writeln!(out, "  Window {}: skipped (no valid combinations)", index + 1);
    }

    let fmt = |v: Option<f64>| v.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v));
    let _ = writeln!(out, "\nMean in-sample:      {}", fmt(report.mean_in_sample()));
    let _ = writeln!(out, "Mean out-of-sample:  {}", fmt(report.mean_out_of_sample()));
    let _ = writeln!(
        out,
        "Parameter stability: {:.0}%",
        report.parameter_stability() * 100.0
    );

    out.push('\n');
    rule(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use backtester::{MetricKind, ParameterSet};
    use optimizer::{CombinationResult, RunSummary, SegmentSummary, SplitSummary, WindowResult};

    fn summary(total_return: f64) -> RunSummary {
        RunSummary {
            total_return,
            sharpe_ratio: 1.0,
            max_drawdown: -0.1,
            win_rate: 0.5,
            total_trades: 4,
        }
    }

    fn result(test_metric: Option<f64>) -> OptimizationResult {
        let segment = |bars| SegmentSummary {
            bars,
            start: None,
            end: None,
        };
        let combos: Vec<CombinationResult> = [(10, 1.1), (20, 1.3), (30, 0.4)]
            .iter()
            .enumerate()
            .map(|(index, (fast, metric))| CombinationResult {
                index,
                params: ParameterSet::from_pairs([("fast_period", *fast)]),
                metric: *metric,
                summary: summary(0.05),
            })
            .collect();

        OptimizationResult {
            strategy_name: "SMA_Crossover".to_string(),
            metric: MetricKind::SharpeRatio,
            best_params: combos[1].params.clone(),
            best_metric: 1.3,
            train_metric: Some(1.5),
            val_metric: 1.3,
            test_metric,
            train_summary: Some(summary(0.1)),
            val_summary: summary(0.05),
            test_summary: test_metric.map(|_| summary(0.04)),
            all_results: combos,
            failures: Vec::new(),
            test_failure: test_metric.is_none().then(|| "strategy refused".to_string()),
            split: SplitSummary {
                train: segment(600),
                validation: segment(200),
                test: segment(200),
            },
            combinations_tested: 4,
        }
    }

    #[test]
    fn test_degradation_status() {
        assert_eq!(DegradationStatus::classify(0.05), DegradationStatus::Good);
        assert_eq!(DegradationStatus::classify(0.10), DegradationStatus::Moderate);
        assert_eq!(DegradationStatus::classify(0.30), DegradationStatus::Significant);
    }

    #[test]
    fn test_render_optimization() {
        let text = render_optimization(&result(Some(1.25)), 2);
        assert!(text.contains("fast_period: 20"));
        assert!(text.contains("Validation: 1.3000"));
        assert!(text.contains("Test:       1.2500"));
        assert!(text.contains("Good generalization"));
        assert!(text.contains("Excluded combinations: 1 of 4"));
        assert!(text.contains("1. sharpe_ratio=1.3000"));
        assert!(text.contains("2. sharpe_ratio=1.1000"));
        assert!(!text.contains("3. sharpe_ratio"));
    }

    #[test]
    fn test_render_failed_test_phase() {
        let text = render_optimization(&result(None), 5);
        assert!(text.contains("failed (strategy refused)"));
        assert!(!text.contains("Overfitting Check"));
    }

    #[test]
    fn test_render_walk_forward() {
        let report = WalkForwardReport {
            strategy_name: "SMA_Crossover".to_string(),
            metric: MetricKind::TotalReturn,
            windows: vec![WindowResult {
                index: 0,
                train_bars: 300,
                test_bars: 100,
                best_params: ParameterSet::from_pairs([("fast_period", 10)]),
                in_sample_metric: 0.2,
                out_of_sample_metric: Some(0.1),
                test_failure: None,
            }],
            skipped_windows: vec![1],
        };
        let text = render_walk_forward(&report);
        assert!(text.contains("Window 1: train=300"));
        assert!(text.contains("Window 2: skipped"));
        assert!(text.contains("Parameter stability: 100%"));
    }
}
