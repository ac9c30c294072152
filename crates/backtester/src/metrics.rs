//! Equity curves and performance metrics.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::BacktestError;
use crate::simulator::Trade;

/// Portfolio value at the close of one bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
}

/// Ordered portfolio values, one per bar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EquityCurve(Vec<EquityPoint>);

impl EquityCurve {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self(Vec::with_capacity(capacity))
    }

    pub(crate) fn push(&mut self, timestamp: DateTime<Utc>, value: Decimal) {
        self.0.push(EquityPoint { timestamp, value });
    }

    /// Overwrite the value of the most recent point.
    pub(crate) fn replace_last(&mut self, value: Decimal) {
        if let Some(point) = self.0.last_mut() {
            point.value = value;
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EquityPoint> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&EquityPoint> {
        self.0.first()
    }

    pub fn last(&self) -> Option<&EquityPoint> {
        self.0.last()
    }

    /// Simple returns between consecutive points. A zero prior value yields
    /// a zero return.
    pub fn period_returns(&self) -> Vec<f64> {
        self.0
            .windows(2)
            .map(|w| {
                let prev = w[0].value;
                if prev.is_zero() {
                    0.0
                } else {
                    ((w[1].value - prev) / prev).to_f64().unwrap_or(0.0)
                }
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a EquityCurve {
    type Item = &'a EquityPoint;
    type IntoIter = std::slice::Iter<'a, EquityPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Metric used to rank parameter combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    TotalReturn,
    SharpeRatio,
    SortinoRatio,
    MaxDrawdown,
    WinRate,
    ProfitFactor,
    TotalTrades,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::TotalReturn => "total_return",
            MetricKind::SharpeRatio => "sharpe_ratio",
            MetricKind::SortinoRatio => "sortino_ratio",
            MetricKind::MaxDrawdown => "max_drawdown",
            MetricKind::WinRate => "win_rate",
            MetricKind::ProfitFactor => "profit_factor",
            MetricKind::TotalTrades => "total_trades",
        }
    }

    /// Drawdown is the only metric where a smaller magnitude wins.
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, MetricKind::MaxDrawdown)
    }

    /// Order two metric values so that `Greater` means `a` is better.
    pub fn compare(&self, a: f64, b: f64) -> Ordering {
        if self.higher_is_better() {
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        } else {
            b.abs().partial_cmp(&a.abs()).unwrap_or(Ordering::Equal)
        }
    }

    /// Strictly better; ties are not an improvement.
    pub fn is_better(&self, candidate: f64, incumbent: f64) -> bool {
        self.compare(candidate, incumbent) == Ordering::Greater
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "total_return" | "return" => Ok(MetricKind::TotalReturn),
            "sharpe_ratio" | "sharpe" => Ok(MetricKind::SharpeRatio),
            "sortino_ratio" | "sortino" => Ok(MetricKind::SortinoRatio),
            "max_drawdown" | "drawdown" => Ok(MetricKind::MaxDrawdown),
            "win_rate" => Ok(MetricKind::WinRate),
            "profit_factor" => Ok(MetricKind::ProfitFactor),
            "total_trades" | "trades" => Ok(MetricKind::TotalTrades),
            other => Err(BacktestError::InvalidConfig {
                message: format!("unknown metric: {}", other),
            }),
        }
    }
}

/// Summary statistics of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Final equity over initial capital, minus one.
    pub total_return: f64,
    /// Annualized Sharpe ratio (zero risk-free rate).
    pub sharpe_ratio: f64,
    /// Annualized Sortino ratio.
    pub sortino_ratio: f64,
    /// Worst peak-to-trough decline, as a non-positive fraction.
    pub max_drawdown: f64,
    /// Share of closed trades with positive P&L.
    pub win_rate: f64,
    /// Gross profit over gross loss.
    pub profit_factor: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub total_fees: Decimal,
    pub avg_trade_duration_hours: f64,
}

impl Metrics {
    /// Look up a metric by kind.
    pub fn value(&self, kind: MetricKind) -> f64 {
        match kind {
            MetricKind::TotalReturn => self.total_return,
            MetricKind::SharpeRatio => self.sharpe_ratio,
            MetricKind::SortinoRatio => self.sortino_ratio,
            MetricKind::MaxDrawdown => self.max_drawdown,
            MetricKind::WinRate => self.win_rate,
            MetricKind::ProfitFactor => self.profit_factor,
            MetricKind::TotalTrades => self.total_trades as f64,
        }
    }

    /// Compute all metrics from a finished run.
    pub fn compute(
        initial_capital: Decimal,
        equity: &EquityCurve,
        trades: &[Trade],
        periods_per_year: f64,
    ) -> Self {
        let final_value = equity.last().map_or(initial_capital, |p| p.value);
        let total_return = if initial_capital.is_zero() {
            0.0
        } else {
            (final_value / initial_capital - Decimal::ONE)
                .to_f64()
                .unwrap_or(0.0)
        };

        let returns = equity.period_returns();
        let (sharpe_ratio, sortino_ratio) = risk_ratios(&returns, periods_per_year);

        let winning_trades = trades.iter().filter(|t| t.pnl > Decimal::ZERO).count();
        let losing_trades = trades.iter().filter(|t| t.pnl < Decimal::ZERO).count();
        let total_trades = trades.len();
        let win_rate = if total_trades > 0 {
            winning_trades as f64 / total_trades as f64
        } else {
            0.0
        };

        Self {
            total_return,
            sharpe_ratio,
            sortino_ratio,
            max_drawdown: max_drawdown(equity),
            win_rate,
            profit_factor: profit_factor(trades),
            total_trades,
            winning_trades,
            losing_trades,
            total_fees: trades.iter().map(|t| t.fees).sum(),
            avg_trade_duration_hours: avg_trade_duration_hours(trades),
        }
    }
}

/// Minimum of `value / running_peak - 1` over the curve; zero for a
/// monotonically rising or empty curve.
pub fn max_drawdown(equity: &EquityCurve) -> f64 {
    let Some(first) = equity.first() else {
        return 0.0;
    };

    let mut peak = first.value;
    let mut worst: f64 = 0.0;
    for point in equity {
        if point.value > peak {
            peak = point.value;
        }
        if peak > Decimal::ZERO {
            let drawdown = (point.value / peak - Decimal::ONE).to_f64().unwrap_or(0.0);
            worst = worst.min(drawdown);
        }
    }
    worst
}

/// Annualized Sharpe and Sortino ratios from per-bar returns.
///
/// Sharpe uses the sample standard deviation and is zero when fewer than two
/// returns exist or the deviation is zero or not finite. A deviation within
/// rounding noise of the mean counts as zero.
pub fn risk_ratios(returns: &[f64], periods_per_year: f64) -> (f64, f64) {
    if returns.len() < 2 {
        return (0.0, 0.0);
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();
    let annualizer = periods_per_year.sqrt();
    let noise_floor = f64::EPSILON * 8.0 * mean.abs().max(1.0);

    let sharpe = if std_dev > noise_floor && std_dev.is_finite() {
        mean / std_dev * annualizer
    } else {
        0.0
    };

    let downside: Vec<f64> = returns.iter().filter(|r| **r < 0.0).map(|r| r * r).collect();
    let downside_dev = if downside.is_empty() {
        0.0
    } else {
        (downside.iter().sum::<f64>() / downside.len() as f64).sqrt()
    };
    let sortino = if downside_dev > noise_floor {
        mean / downside_dev * annualizer
    } else if mean > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    (sharpe, sortino)
}

fn profit_factor(trades: &[Trade]) -> f64 {
    let wins: Decimal = trades.iter().filter(|t| t.pnl > Decimal::ZERO).map(|t| t.pnl).sum();
    let losses: Decimal = trades.iter().filter(|t| t.pnl < Decimal::ZERO).map(|t| -t.pnl).sum();

    if losses > Decimal::ZERO {
        (wins / losses).to_f64().unwrap_or(0.0)
    } else if wins > Decimal::ZERO {
        f64::INFINITY
    } else {
        0.0
    }
}

fn avg_trade_duration_hours(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let total_minutes: i64 = trades.iter().map(|t| t.holding_duration().num_minutes()).sum();
    total_minutes as f64 / 60.0 / trades.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn curve(values: &[i64]) -> EquityCurve {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut curve = EquityCurve::new();
        for (i, v) in values.iter().enumerate() {
            curve.push(start + Duration::days(i as i64), Decimal::new(*v, 0));
        }
        curve
    }

    #[test]
    fn test_max_drawdown_is_non_positive() {
        assert_eq!(max_drawdown(&curve(&[100, 110, 120])), 0.0);
        assert_eq!(max_drawdown(&curve(&[100, 120, 90, 130])), -0.25);
        assert_eq!(max_drawdown(&EquityCurve::new()), 0.0);
    }

    #[test]
    fn test_sharpe_degenerate_cases() {
        assert_eq!(risk_ratios(&[0.01], 365.0), (0.0, 0.0));
        assert_eq!(risk_ratios(&[0.0, 0.0, 0.0], 365.0).0, 0.0);
        assert_eq!(risk_ratios(&[0.01, 0.01, 0.01], 365.0).0, 0.0);
    }

    #[test]
    fn test_constant_growth_has_zero_sharpe() {
        // 100 -> 110 -> 121 -> 133.1: every return is 10%, but the f64 mean
        // does not reproduce the samples exactly.
        let mut geometric = EquityCurve::new();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for (i, cents) in [10000, 11000, 12100, 13310].iter().enumerate() {
            geometric.push(start + Duration::days(i as i64), Decimal::new(*cents, 2));
        }
        let returns = geometric.period_returns();
        assert_eq!(returns.len(), 3);

        let (sharpe, sortino) = risk_ratios(&returns, 365.0);
        assert_eq!(sharpe, 0.0);
        assert_eq!(sortino, f64::INFINITY);

        let (sharpe, sortino) = risk_ratios(&[-0.1, -0.1, -0.1], 365.0);
        assert_eq!(sharpe, 0.0);
        assert!(sortino < 0.0);
    }

    #[test]
    fn test_sharpe_uses_sample_deviation() {
        let returns = [0.01, -0.01, 0.02];
        let mean = 0.02 / 3.0;
        let var = returns.iter().map(|r: &f64| (r - mean).powi(2)).sum::<f64>() / 2.0;
        let expected = mean / var.sqrt() * 252f64.sqrt();
        let (sharpe, sortino) = risk_ratios(&returns, 252.0);
        assert!((sharpe - expected).abs() < 1e-12);
        assert!(sortino > 0.0);
    }

    #[test]
    fn test_period_returns() {
        let returns = curve(&[100, 110, 99]).period_returns();
        assert_eq!(returns.len(), 2);
        assert!((returns[0] - 0.1).abs() < 1e-12);
        assert!((returns[1] + 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_metric_kind_parsing_and_ordering() {
        assert_eq!("sharpe_ratio".parse::<MetricKind>().unwrap(), MetricKind::SharpeRatio);
        assert_eq!("Max-Drawdown".parse::<MetricKind>().unwrap(), MetricKind::MaxDrawdown);
        assert!("alpha".parse::<MetricKind>().is_err());
        assert_eq!(MetricKind::WinRate.to_string(), "win_rate");

        assert!(MetricKind::SharpeRatio.is_better(1.2, 1.1));
        assert!(!MetricKind::SharpeRatio.is_better(1.1, 1.1));
        assert!(MetricKind::MaxDrawdown.is_better(-0.02, -0.05));
        assert!(!MetricKind::MaxDrawdown.is_better(-0.30, -0.05));
    }

    #[test]
    fn test_compute_without_trades() {
        let metrics = Metrics::compute(Decimal::new(100, 0), &curve(&[100, 100, 100]), &[], 365.0);
        assert_eq!(metrics.total_return, 0.0);
        assert_eq!(metrics.sharpe_ratio, 0.0);
        assert_eq!(metrics.max_drawdown, 0.0);
        assert_eq!(metrics.win_rate, 0.0);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.profit_factor, 0.0);
        assert_eq!(metrics.value(MetricKind::TotalTrades), 0.0);
    }
}
