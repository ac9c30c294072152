//! Built-in reference strategies.
//!
//! These are deliberately simple indicator strategies used by the CLI and the
//! test suites to exercise the engine and the optimizer. Each one emits a
//! signal only on the bars where its condition changes; every other bar is
//! implicitly HOLD.

use rust_decimal::prelude::ToPrimitive;

use crate::data_store::PriceBar;
use crate::error::{BacktestError, Result};
use crate::params::{ParamValue, ParameterSet};
use crate::strategy::{Signal, Strategy};

fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close.to_f64().unwrap_or(0.0)).collect()
}

/// Simple moving average; `None` until `period` values are available.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 {
        return out;
    }
    let mut sum = 0.0;
    for i in 0..values.len() {
        sum += values[i];
        if i >= period {
            sum -= values[i - period];
        }
        if i + 1 >= period {
            out[i] = Some(sum / period as f64);
        }
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period` values.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(prev);
    for i in period..values.len() {
        prev = alpha * values[i] + (1.0 - alpha) * prev;
        out[i] = Some(prev);
    }
    out
}

/// Rolling population standard deviation.
pub fn rolling_std(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let means = sma(values, period);
    means
        .iter()
        .enumerate()
        .map(|(i, mean)| {
            mean.map(|m| {
                let window = &values[i + 1 - period..=i];
                (window.iter().map(|v| (v - m).powi(2)).sum::<f64>() / period as f64).sqrt()
            })
        })
        .collect()
}

/// Wilder's relative strength index.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss -= change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    let to_rsi = |gain: f64, loss: f64| {
        if loss == 0.0 {
            if gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        }
    };
    out[period] = Some(to_rsi(avg_gain, avg_loss));

    for i in (period + 1)..values.len() {
        let change = values[i] - values[i - 1];
        let (gain, loss) = if change > 0.0 { (change, 0.0) } else { (0.0, -change) };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = Some(to_rsi(avg_gain, avg_loss));
    }
    out
}

/// Moving-average crossover: buy when the fast SMA crosses above the slow
/// one, sell when it crosses back below.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    fast_period: usize,
    slow_period: usize,
}

impl Default for SmaCrossover {
    fn default() -> Self {
        Self {
            fast_period: 20,
            slow_period: 50,
        }
    }
}

impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        "SMA_Crossover"
    }

    fn initialize(&mut self, params: &ParameterSet) -> Result<()> {
        let fast = params.get_period("fast_period", self.fast_period)?;
        let slow = params.get_period("slow_period", self.slow_period)?;
        if fast >= slow {
            return Err(BacktestError::config(format!(
                "fast_period ({}) must be shorter than slow_period ({})",
                fast, slow
            )));
        }
        self.fast_period = fast;
        self.slow_period = slow;
        Ok(())
    }

    fn generate_signals(&self, bars: &[PriceBar]) -> Result<Vec<Signal>> {
        let closes = closes(bars);
        let fast = sma(&closes, self.fast_period);
        let slow = sma(&closes, self.slow_period);
        let mut signals = Vec::new();

        for i in 1..bars.len() {
            let (Some(f0), Some(s0), Some(f1), Some(s1)) =
                (fast[i - 1], slow[i - 1], fast[i], slow[i])
            else {
                continue;
            };
            if f0 <= s0 && f1 > s1 {
                signals.push(
                    Signal::buy(bars[i].timestamp)
                        .with_metadata("fast_sma", f1)
                        .with_metadata("slow_sma", s1),
                );
            } else if f0 >= s0 && f1 < s1 {
                signals.push(
                    Signal::sell(bars[i].timestamp)
                        .with_metadata("fast_sma", f1)
                        .with_metadata("slow_sma", s1),
                );
            }
        }
        Ok(signals)
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::from_pairs([
            ("fast_period", self.fast_period as i64),
            ("slow_period", self.slow_period as i64),
        ])
    }
}

/// RSI mean reversion: buy oversold, sell overbought.
///
/// Confidence scales with how far RSI sits beyond the threshold, and the
/// strategy opts into confidence-weighted sizing.
#[derive(Debug, Clone)]
pub struct RsiMeanReversion {
    period: usize,
    oversold: f64,
    overbought: f64,
}

impl Default for RsiMeanReversion {
    fn default() -> Self {
        Self {
            period: 14,
            oversold: 30.0,
            overbought: 70.0,
        }
    }
}

impl Strategy for RsiMeanReversion {
    fn name(&self) -> &str {
        "RSI_MeanReversion"
    }

    fn initialize(&mut self, params: &ParameterSet) -> Result<()> {
        let period = params.get_period("period", self.period)?;
        let oversold = params.get_f64("oversold", self.oversold)?;
        let overbought = params.get_f64("overbought", self.overbought)?;
        if period < 2 {
            return Err(BacktestError::config("period must be at least 2"));
        }
        if !(0.0..100.0).contains(&oversold) || !(0.0..=100.0).contains(&overbought) {
            return Err(BacktestError::config("RSI thresholds must lie in [0, 100]"));
        }
        if oversold >= overbought {
            return Err(BacktestError::config(format!(
                "oversold ({}) must be below overbought ({})",
                oversold, overbought
            )));
        }
        self.period = period;
        self.oversold = oversold;
        self.overbought = overbought;
        Ok(())
    }

    fn generate_signals(&self, bars: &[PriceBar]) -> Result<Vec<Signal>> {
        let values = rsi(&closes(bars), self.period);
        let mut signals = Vec::new();

        for (bar, value) in bars.iter().zip(values) {
            let Some(value) = value else { continue };
            if value < self.oversold {
                let depth = (self.oversold - value) / self.oversold.max(1.0);
                signals.push(
                    Signal::buy(bar.timestamp)
                        .with_confidence(0.5 + depth)
                        .with_metadata("rsi", format!("{:.2}", value)),
                );
            } else if value > self.overbought {
                signals.push(
                    Signal::sell(bar.timestamp).with_metadata("rsi", format!("{:.2}", value)),
                );
            }
        }
        Ok(signals)
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::from_pairs([
            ("period", ParamValue::Int(self.period as i64)),
            ("oversold", ParamValue::Float(self.oversold)),
            ("overbought", ParamValue::Float(self.overbought)),
        ])
    }

    fn sizes_by_confidence(&self) -> bool {
        true
    }
}

/// Bollinger breakout: buy on a close above the upper band, sell when the
/// close falls back below the middle band.
#[derive(Debug, Clone)]
pub struct BollingerBreakout {
    period: usize,
    std_dev: f64,
}

impl Default for BollingerBreakout {
    fn default() -> Self {
        Self {
            period: 20,
            std_dev: 2.0,
        }
    }
}

impl Strategy for BollingerBreakout {
    fn name(&self) -> &str {
        "BollingerBreakout"
    }

    fn initialize(&mut self, params: &ParameterSet) -> Result<()> {
        let period = params.get_period("period", self.period)?;
        let std_dev = params.get_f64("std_dev", self.std_dev)?;
        if period < 2 {
            return Err(BacktestError::config("period must be at least 2"));
        }
        if std_dev <= 0.0 || !std_dev.is_finite() {
            return Err(BacktestError::config(format!(
                "std_dev must be positive, got {}",
                std_dev
            )));
        }
        self.period = period;
        self.std_dev = std_dev;
        Ok(())
    }

    fn generate_signals(&self, bars: &[PriceBar]) -> Result<Vec<Signal>> {
        let closes = closes(bars);
        let middle = sma(&closes, self.period);
        let deviation = rolling_std(&closes, self.period);
        let mut signals = Vec::new();

        for i in 0..bars.len() {
            let (Some(mid), Some(dev)) = (middle[i], deviation[i]) else {
                continue;
            };
            let upper = mid + self.std_dev * dev;
            if closes[i] > upper {
                signals.push(
                    Signal::buy(bars[i].timestamp)
                        .with_metadata("upper_band", format!("{:.4}", upper)),
                );
            } else if closes[i] < mid {
                signals.push(
                    Signal::sell(bars[i].timestamp)
                        .with_metadata("middle_band", format!("{:.4}", mid)),
                );
            }
        }
        Ok(signals)
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::from_pairs([
            ("period", ParamValue::Int(self.period as i64)),
            ("std_dev", ParamValue::Float(self.std_dev)),
        ])
    }
}

/// MACD momentum: buy when the MACD line crosses above its signal line,
/// sell on the opposite cross.
#[derive(Debug, Clone)]
pub struct MacdMomentum {
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
}

impl Default for MacdMomentum {
    fn default() -> Self {
        Self {
            fast_period: 12,
            slow_period: 26,
            signal_period: 9,
        }
    }
}

impl Strategy for MacdMomentum {
    fn name(&self) -> &str {
        "MACD_Momentum"
    }

    fn initialize(&mut self, params: &ParameterSet) -> Result<()> {
        let fast = params.get_period("fast_period", self.fast_period)?;
        let slow = params.get_period("slow_period", self.slow_period)?;
        let signal = params.get_period("signal_period", self.signal_period)?;
        if fast >= slow {
            return Err(BacktestError::config(format!(
                "fast_period ({}) must be shorter than slow_period ({})",
                fast, slow
            )));
        }
        self.fast_period = fast;
        self.slow_period = slow;
        self.signal_period = signal;
        Ok(())
    }

    fn generate_signals(&self, bars: &[PriceBar]) -> Result<Vec<Signal>> {
        let closes = closes(bars);
        let fast = ema(&closes, self.fast_period);
        let slow = ema(&closes, self.slow_period);

        // MACD is defined from the first bar where the slow EMA exists.
        let offset = self.slow_period - 1;
        let macd: Vec<f64> = fast
            .iter()
            .zip(&slow)
            .filter_map(|(f, s)| Some((*f)? - (*s)?))
            .collect();
        let signal_line = ema(&macd, self.signal_period);

        let mut signals = Vec::new();
        for j in 1..macd.len() {
            let (Some(prev_signal), Some(curr_signal)) = (signal_line[j - 1], signal_line[j]) else {
                continue;
            };
            let bar = &bars[offset + j];
            let histogram = format!("{:.4}", macd[j]);
            if macd[j - 1] <= prev_signal && macd[j] > curr_signal {
                signals.push(Signal::buy(bar.timestamp).with_metadata("macd", histogram));
            } else if macd[j - 1] >= prev_signal && macd[j] < curr_signal {
                signals.push(Signal::sell(bar.timestamp).with_metadata("macd", histogram));
            }
        }
        Ok(signals)
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::from_pairs([
            ("fast_period", self.fast_period as i64),
            ("slow_period", self.slow_period as i64),
            ("signal_period", self.signal_period as i64),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::SignalType;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn bars_from(closes: &[i64]) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| PriceBar::flat(start + Duration::hours(i as i64), Decimal::new(*c, 0)))
            .collect()
    }

    #[test]
    fn test_sma_and_ema() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 3), vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);

        let e = ema(&values, 3);
        assert_eq!(e[2], Some(2.0));
        assert_eq!(e[3], Some(3.0));
        assert!(ema(&values, 6).iter().all(Option::is_none));
    }

    #[test]
    fn test_rsi_extremes() {
        let rising: Vec<f64> = (0..20).map(|i| i as f64).collect();
        assert_eq!(rsi(&rising, 14)[19], Some(100.0));

        let flat = vec![10.0; 20];
        assert_eq!(rsi(&flat, 14)[19], Some(50.0));
        assert_eq!(rsi(&flat, 14)[13], None);
    }

    #[test]
    fn test_sma_crossover_signals() {
        // Falls, then rallies: the fast average crosses above the slow one.
        let mut closes: Vec<i64> = (0..10).map(|i| 120 - i).collect();
        closes.extend((0..10).map(|i| 112 + 3 * i));
        let bars = bars_from(&closes);

        let mut strategy = SmaCrossover::default();
        strategy
            .initialize(&ParameterSet::from_pairs([("fast_period", 2), ("slow_period", 5)]))
            .unwrap();

        let signals = strategy.generate_signals(&bars).unwrap();
        assert!(signals.iter().any(|s| s.signal_type == SignalType::Buy));
        assert!(signals.iter().all(|s| bars.iter().any(|b| b.timestamp == s.timestamp)));
    }

    #[test]
    fn test_sma_crossover_rejects_inverted_periods() {
        let mut strategy = SmaCrossover::default();
        let err = strategy
            .initialize(&ParameterSet::from_pairs([("fast_period", 50), ("slow_period", 20)]))
            .unwrap_err();
        assert!(matches!(err, BacktestError::StrategyConfig { .. }));
    }

    #[test]
    fn test_rsi_rejects_crossed_thresholds() {
        let mut strategy = RsiMeanReversion::default();
        let params = ParameterSet::from_pairs([("oversold", 70), ("overbought", 30)]);
        assert!(strategy.initialize(&params).is_err());
        assert!(strategy.sizes_by_confidence());
    }

    #[test]
    fn test_bollinger_rejects_bad_std() {
        let mut strategy = BollingerBreakout::default();
        let params = ParameterSet::from_pairs([("std_dev", ParamValue::Float(-1.0))]);
        assert!(strategy.initialize(&params).is_err());
    }

    #[test]
    fn test_macd_signals_align_with_bars() {
        let closes: Vec<i64> = (0..80)
            .map(|i| 100 + ((i as f64 / 6.0).sin() * 10.0) as i64)
            .collect();
        let bars = bars_from(&closes);

        let mut strategy = MacdMomentum::default();
        strategy
            .initialize(&ParameterSet::from_pairs([
                ("fast_period", 5),
                ("slow_period", 12),
                ("signal_period", 4),
            ]))
            .unwrap();

        let signals = strategy.generate_signals(&bars).unwrap();
        assert!(!signals.is_empty());
        assert!(signals.iter().all(|s| bars.iter().any(|b| b.timestamp == s.timestamp)));
    }

    #[test]
    fn test_short_series_yields_no_signals() {
        let bars = bars_from(&[100, 101, 102]);
        assert!(SmaCrossover::default().generate_signals(&bars).unwrap().is_empty());
        assert!(MacdMomentum::default().generate_signals(&bars).unwrap().is_empty());
    }
}
