//! Bar-by-bar backtest engine with slippage and commission.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::data_store::{validate_series, PriceBar, TimeResolution};
use crate::error::{BacktestError, Result};
use crate::metrics::{EquityCurve, Metrics};
use crate::params::ParameterSet;
use crate::strategy::{SignalType, Strategy};

/// Decimal places kept on position quantities.
const QUANTITY_SCALE: u32 = 8;

/// Configuration for a backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Starting cash.
    pub initial_capital: Decimal,
    /// Commission as a fraction of traded notional (e.g. 0.001 for 0.1%).
    pub commission: Decimal,
    /// Slippage as a fraction of the close, applied against the trader.
    pub slippage: Decimal,
    /// Bar spacing used to annualize ratios. Inferred from the data when unset.
    pub resolution: Option<TimeResolution>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: Decimal::new(10000, 0),
            commission: Decimal::new(1, 3), // 0.1%
            slippage: Decimal::new(5, 4),   // 0.05%
            resolution: None,
        }
    }
}

impl BacktestConfig {
    /// Frictionless configuration with the given capital.
    pub fn frictionless(initial_capital: Decimal) -> Self {
        Self {
            initial_capital,
            commission: Decimal::ZERO,
            slippage: Decimal::ZERO,
            resolution: None,
        }
    }

    pub fn with_resolution(mut self, resolution: TimeResolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_capital <= Decimal::ZERO {
            return Err(BacktestError::InvalidConfig {
                message: format!("initial_capital must be positive, got {}", self.initial_capital),
            });
        }
        if self.commission < Decimal::ZERO || self.commission >= Decimal::ONE {
            return Err(BacktestError::InvalidConfig {
                message: format!("commission must be in [0, 1), got {}", self.commission),
            });
        }
        if self.slippage < Decimal::ZERO || self.slippage >= Decimal::ONE {
            return Err(BacktestError::InvalidConfig {
                message: format!("slippage must be in [0, 1), got {}", self.slippage),
            });
        }
        Ok(())
    }

    /// Bars per year for annualization: explicit resolution, then inferred,
    /// then daily.
    fn periods_per_year(&self, bars: &[PriceBar]) -> f64 {
        self.resolution
            .or_else(|| TimeResolution::infer(bars))
            .unwrap_or(TimeResolution::Day)
            .periods_per_year()
    }
}

/// Direction of a round-trip trade. Only long trades are produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
}

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    EndOfData,
}

/// An open long holding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub quantity: Decimal,
    /// Entry fill price, slippage included.
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub entry_fees: Decimal,
    pub entry_slippage: Decimal,
}

impl Position {
    pub fn market_value(&self, price: Decimal) -> Decimal {
        self.quantity * price
    }
}

/// A closed round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub side: TradeSide,
    pub entry_time: DateTime<Utc>,
    pub entry_price: Decimal,
    pub exit_time: DateTime<Utc>,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    /// Commission paid on both legs.
    pub fees: Decimal,
    /// Slippage cost on both legs.
    pub slippage: Decimal,
    /// Realized P&L net of fees.
    pub pnl: Decimal,
    /// P&L relative to the entry notional.
    pub return_pct: f64,
    pub exit_reason: ExitReason,
}

impl Trade {
    pub fn holding_duration(&self) -> Duration {
        self.exit_time - self.entry_time
    }

    pub fn is_winner(&self) -> bool {
        self.pnl > Decimal::ZERO
    }
}

/// Result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub parameters: ParameterSet,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Number of bars processed.
    pub bars: usize,
    pub initial_capital: Decimal,
    pub final_equity: Decimal,
    pub metrics: Metrics,
    pub trades: Vec<Trade>,
    pub equity_curve: EquityCurve,
}

/// Stateless backtest engine. One engine may run many backtests
/// concurrently; all run state lives on the stack of [`BacktestEngine::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BacktestEngine;

impl BacktestEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run `strategy` over `bars`.
    ///
    /// The strategy must already be initialized. Any strategy error fails the
    /// whole run.
    pub fn run(
        &self,
        strategy: &dyn Strategy,
        bars: &[PriceBar],
        config: &BacktestConfig,
    ) -> Result<BacktestResult> {
        config.validate()?;
        let (Some(first), Some(last)) = (bars.first(), bars.last()) else {
            return Err(BacktestError::EmptySeries);
        };
        validate_series(bars)?;

        debug!(
            strategy = strategy.name(),
            bars = bars.len(),
            start = %first.timestamp,
            end = %last.timestamp,
            "Starting backtest"
        );

        let actions = align_signals(strategy, bars)?;
        let sizes_by_confidence = strategy.sizes_by_confidence();
        let mut state = SimulationState::new(config.initial_capital, bars.len());

        for (bar, action) in bars.iter().zip(actions) {
            match action {
                Some((SignalType::Buy, confidence)) if state.position.is_none() => {
                    let budget = if sizes_by_confidence {
                        state.cash * confidence_fraction(confidence)
                    } else {
                        state.cash
                    };
                    state.open(bar, budget, config);
                }
                Some((SignalType::Sell, _)) if state.position.is_some() => {
                    state.close(bar, config, ExitReason::Signal);
                }
                _ => {}
            }
            let equity = state.portfolio_value(bar.close);
            state.equity_curve.push(bar.timestamp, equity);
        }

        if state.position.is_some() {
            state.close(last, config, ExitReason::EndOfData);
            let equity = state.cash;
            state.equity_curve.replace_last(equity);
        }

        let metrics = Metrics::compute(
            config.initial_capital,
            &state.equity_curve,
            &state.trades,
            config.periods_per_year(bars),
        );
        let final_equity = state
            .equity_curve
            .last()
            .map_or(config.initial_capital, |p| p.value);

        debug!(
            strategy = strategy.name(),
            total_return = metrics.total_return,
            sharpe = metrics.sharpe_ratio,
            trades = metrics.total_trades,
            "Backtest completed"
        );

        Ok(BacktestResult {
            strategy_name: strategy.name().to_string(),
            parameters: strategy.parameters(),
            start_time: first.timestamp,
            end_time: last.timestamp,
            bars: bars.len(),
            initial_capital: config.initial_capital,
            final_equity,
            metrics,
            trades: state.trades,
            equity_curve: state.equity_curve,
        })
    }
}

/// Share of available cash committed by a confidence-sized BUY. Values
/// outside [0, 1] are clamped and NaN commits nothing.
fn confidence_fraction(confidence: f64) -> Decimal {
    if confidence.is_nan() {
        return Decimal::ZERO;
    }
    Decimal::from_f64(confidence.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO)
}

/// Map the strategy's signals onto bar positions. Bars without a signal get
/// `None` (HOLD); when a bar receives several signals the last one wins.
fn align_signals(
    strategy: &dyn Strategy,
    bars: &[PriceBar],
) -> Result<Vec<Option<(SignalType, f64)>>> {
    let signals = strategy.generate_signals(bars)?;
    let index: HashMap<DateTime<Utc>, usize> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| (bar.timestamp, i))
        .collect();

    let mut actions = vec![None; bars.len()];
    for signal in signals {
        let Some(&i) = index.get(&signal.timestamp) else {
            return Err(BacktestError::MisalignedSignal {
                timestamp: signal.timestamp,
            });
        };
        actions[i] = Some((signal.signal_type, signal.confidence));
    }
    Ok(actions)
}

/// Mutable state of a single run.
struct SimulationState {
    cash: Decimal,
    position: Option<Position>,
    trades: Vec<Trade>,
    equity_curve: EquityCurve,
}

impl SimulationState {
    fn new(initial_capital: Decimal, bars: usize) -> Self {
        Self {
            cash: initial_capital,
            position: None,
            trades: Vec::new(),
            equity_curve: EquityCurve::with_capacity(bars),
        }
    }

    fn portfolio_value(&self, price: Decimal) -> Decimal {
        self.cash
            + self
                .position
                .as_ref()
                .map_or(Decimal::ZERO, |p| p.market_value(price))
    }

    /// Buy as much as `budget` affords, commission included.
    fn open(&mut self, bar: &PriceBar, budget: Decimal, config: &BacktestConfig) {
        let fill = bar.close * (Decimal::ONE + config.slippage);
        if fill <= Decimal::ZERO || budget <= Decimal::ZERO {
            return;
        }

        let quantity = (budget / (fill * (Decimal::ONE + config.commission)))
            .round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::ToZero);
        if quantity.is_zero() {
            return;
        }

        let fees = fill * quantity * config.commission;
        self.cash -= fill * quantity + fees;
        self.position = Some(Position {
            quantity,
            entry_price: fill,
            entry_time: bar.timestamp,
            entry_fees: fees,
            entry_slippage: (fill - bar.close) * quantity,
        });

        debug!(time = %bar.timestamp, price = %fill, quantity = %quantity, "Opened position");
    }

    fn close(&mut self, bar: &PriceBar, config: &BacktestConfig, exit_reason: ExitReason) {
        let Some(position) = self.position.take() else {
            return;
        };

        let fill = bar.close * (Decimal::ONE - config.slippage);
        let gross = fill * position.quantity;
        let fees = gross * config.commission;
        self.cash += gross - fees;

        let pnl = (fill - position.entry_price) * position.quantity - position.entry_fees - fees;
        let entry_notional = position.entry_price * position.quantity;
        let return_pct = if entry_notional.is_zero() {
            0.0
        } else {
            (pnl / entry_notional).to_f64().unwrap_or(0.0)
        };

        debug!(
            time = %bar.timestamp,
            price = %fill,
            pnl = %pnl,
            reason = ?exit_reason,
            "Closed position"
        );

        self.trades.push(Trade {
            id: Uuid::new_v4(),
            side: TradeSide::Long,
            entry_time: position.entry_time,
            entry_price: position.entry_price,
            exit_time: bar.timestamp,
            exit_price: fill,
            quantity: position.quantity,
            fees: position.entry_fees + fees,
            slippage: position.entry_slippage + (bar.close - fill) * position.quantity,
            pnl,
            return_pct,
            exit_reason,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParameterSet;
    use crate::strategy::{MockStrategy, Signal};
    use chrono::TimeZone;

    fn daily(closes: &[Decimal]) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, c)| PriceBar::flat(start + Duration::days(i as i64), *c))
            .collect()
    }

    fn scripted(signals: Vec<Signal>) -> MockStrategy {
        let mut strategy = MockStrategy::new();
        strategy.expect_name().return_const("scripted".to_string());
        strategy.expect_parameters().returning(ParameterSet::empty);
        strategy.expect_sizes_by_confidence().return_const(false);
        strategy
            .expect_generate_signals()
            .times(1)
            .returning(move |_| Ok(signals.clone()));
        strategy
    }

    #[test]
    fn test_config_default_and_validation() {
        let config = BacktestConfig::default();
        assert_eq!(config.initial_capital, Decimal::new(10000, 0));
        assert_eq!(config.commission, Decimal::new(1, 3));
        assert_eq!(config.slippage, Decimal::new(5, 4));
        assert!(config.validate().is_ok());

        let broke = BacktestConfig::frictionless(Decimal::ZERO);
        assert!(matches!(broke.validate(), Err(BacktestError::InvalidConfig { .. })));

        let negative = BacktestConfig {
            commission: Decimal::new(-1, 3),
            ..BacktestConfig::default()
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_flat_prices_without_trades() {
        let bars = daily(&vec![Decimal::new(100, 0); 10]);
        let strategy = scripted(Vec::new());

        let result = BacktestEngine::new()
            .run(&strategy, &bars, &BacktestConfig::default())
            .unwrap();

        assert_eq!(result.metrics.total_return, 0.0);
        assert_eq!(result.metrics.sharpe_ratio, 0.0);
        assert_eq!(result.metrics.max_drawdown, 0.0);
        assert_eq!(result.metrics.total_trades, 0);
        assert_eq!(result.equity_curve.len(), 10);
        assert_eq!(result.final_equity, Decimal::new(10000, 0));
    }

    #[test]
    fn test_single_winning_round_trip() {
        // Rises steadily from 100 to 110.
        let mut closes: Vec<Decimal> = (0..10)
            .map(|i| Decimal::new(100, 0) + Decimal::new(10 * i, 0) / Decimal::new(9, 0))
            .collect();
        closes[9] = Decimal::new(110, 0);
        let bars = daily(&closes);
        let strategy =
            scripted(vec![Signal::buy(bars[0].timestamp), Signal::sell(bars[9].timestamp)]);

        let config = BacktestConfig::frictionless(Decimal::new(10000, 0));
        let result = BacktestEngine::new().run(&strategy, &bars, &config).unwrap();

        assert!((result.metrics.total_return - 0.10).abs() < 1e-9);
        assert_eq!(result.metrics.total_trades, 1);
        assert_eq!(result.metrics.win_rate, 1.0);
        assert_eq!(result.trades[0].exit_reason, ExitReason::Signal);
        assert_eq!(result.trades[0].quantity, Decimal::new(100, 0));
        assert_eq!(result.trades[0].pnl, Decimal::new(1000, 0));
        assert_eq!(result.metrics.max_drawdown, 0.0);
    }

    #[test]
    fn test_open_position_closed_at_end_of_data() {
        let closes = [100, 105, 120].map(|c| Decimal::new(c, 0));
        let bars = daily(&closes);
        let strategy = scripted(vec![Signal::buy(bars[0].timestamp)]);

        let config = BacktestConfig::frictionless(Decimal::new(1000, 0));
        let result = BacktestEngine::new().run(&strategy, &bars, &config).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::EndOfData);
        assert_eq!(result.trades[0].exit_time, bars[2].timestamp);
        assert_eq!(result.final_equity, Decimal::new(1200, 0));
        assert_eq!(result.equity_curve.len(), 3);
    }

    #[test]
    fn test_slippage_and_commission_work_against_the_trader() {
        let bars = daily(&[Decimal::new(100, 0), Decimal::new(100, 0)]);
        let strategy =
            scripted(vec![Signal::buy(bars[0].timestamp), Signal::sell(bars[1].timestamp)]);

        let config = BacktestConfig {
            initial_capital: Decimal::new(10000, 0),
            commission: Decimal::new(1, 2), // 1%
            slippage: Decimal::new(1, 2),   // 1%
            resolution: None,
        };
        let result = BacktestEngine::new().run(&strategy, &bars, &config).unwrap();
        let trade = &result.trades[0];

        assert_eq!(trade.entry_price, Decimal::new(101, 0));
        assert_eq!(trade.exit_price, Decimal::new(99, 0));
        assert!(trade.pnl < Decimal::ZERO);
        assert!(trade.fees > Decimal::ZERO);
        assert!(trade.slippage > Decimal::ZERO);
        assert!(result.final_equity < config.initial_capital);
        assert_eq!(result.metrics.win_rate, 0.0);
        assert_eq!(result.final_equity, config.initial_capital + trade.pnl);
    }

    #[test]
    fn test_redundant_signals_do_not_change_state() {
        let closes = [100, 101, 102, 103].map(|c| Decimal::new(c, 0));
        let bars = daily(&closes);
        let strategy = scripted(vec![
            Signal::sell(bars[0].timestamp),
            Signal::buy(bars[1].timestamp),
            Signal::buy(bars[2].timestamp),
            Signal::hold(bars[3].timestamp),
        ]);

        let config = BacktestConfig::frictionless(Decimal::new(1000, 0));
        let result = BacktestEngine::new().run(&strategy, &bars, &config).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].entry_time, bars[1].timestamp);
    }

    #[test]
    fn test_confidence_sizing() {
        let bars = daily(&[Decimal::new(100, 0), Decimal::new(100, 0)]);
        let mut strategy = MockStrategy::new();
        strategy.expect_name().return_const("sized".to_string());
        strategy.expect_parameters().returning(ParameterSet::empty);
        strategy.expect_sizes_by_confidence().return_const(true);
        let signals = vec![Signal::buy(bars[0].timestamp).with_confidence(0.5)];
        strategy
            .expect_generate_signals()
            .returning(move |_| Ok(signals.clone()));

        let config = BacktestConfig::frictionless(Decimal::new(1000, 0));
        let result = BacktestEngine::new().run(&strategy, &bars, &config).unwrap();
        assert_eq!(result.trades[0].quantity, Decimal::new(5, 0));
    }

    #[test]
    fn test_misaligned_signal_fails_run() {
        let bars = daily(&[Decimal::new(100, 0), Decimal::new(101, 0)]);
        let stray = bars[1].timestamp + Duration::hours(1);
        let strategy = scripted(vec![Signal::buy(stray)]);

        let err = BacktestEngine::new()
            .run(&strategy, &bars, &BacktestConfig::default())
            .unwrap_err();
        assert!(matches!(err, BacktestError::MisalignedSignal { timestamp } if timestamp == stray));
    }

    #[test]
    fn test_strategy_error_fails_run() {
        let bars = daily(&[Decimal::new(100, 0), Decimal::new(101, 0)]);
        let mut strategy = MockStrategy::new();
        strategy.expect_name().return_const("broken".to_string());
        strategy
            .expect_generate_signals()
            .returning(|_| Err(BacktestError::signal("broken", "indicator overflow")));

        let err = BacktestEngine::new()
            .run(&strategy, &bars, &BacktestConfig::default())
            .unwrap_err();
        assert!(matches!(err, BacktestError::SignalGeneration { .. }));
    }

    #[test]
    fn test_empty_and_unsorted_series_rejected() {
        let strategy = MockStrategy::new();
        let engine = BacktestEngine::new();
        assert!(matches!(
            engine.run(&strategy, &[], &BacktestConfig::default()),
            Err(BacktestError::EmptySeries)
        ));

        let mut bars = daily(&[Decimal::new(100, 0), Decimal::new(101, 0)]);
        bars.swap(0, 1);
        assert!(matches!(
            engine.run(&strategy, &bars, &BacktestConfig::default()),
            Err(BacktestError::InvalidSeries { .. })
        ));
    }

    #[test]
    fn test_flat_prices_with_trades_score_zero() {
        let bars = daily(&vec![Decimal::new(100, 0); 8]);
        let strategy = scripted(vec![
            Signal::buy(bars[1].timestamp),
            Signal::sell(bars[3].timestamp),
            Signal::buy(bars[5].timestamp),
        ]);

        let config = BacktestConfig::frictionless(Decimal::new(10000, 0));
        let result = BacktestEngine::new().run(&strategy, &bars, &config).unwrap();

        assert_eq!(result.metrics.total_trades, 2);
        assert_eq!(result.trades[0].exit_reason, ExitReason::Signal);
        assert_eq!(result.trades[1].exit_reason, ExitReason::EndOfData);
        assert_eq!(result.metrics.total_return, 0.0);
        assert_eq!(result.metrics.sharpe_ratio, 0.0);
        assert_eq!(result.metrics.max_drawdown, 0.0);
        assert_eq!(result.final_equity, Decimal::new(10000, 0));
    }

    #[test]
    fn test_constant_growth_does_not_inflate_sharpe() {
        let closes = [10000, 11000, 12100, 13310].map(|c| Decimal::new(c, 2));
        let bars = daily(&closes);
        let strategy = scripted(vec![Signal::buy(bars[0].timestamp)]);

        let config = BacktestConfig::frictionless(Decimal::new(1000, 0));
        let result = BacktestEngine::new().run(&strategy, &bars, &config).unwrap();

        assert_eq!(result.final_equity, Decimal::new(1331, 0));
        assert_eq!(result.metrics.sharpe_ratio, 0.0);
    }

    #[test]
    fn test_confidence_outside_unit_range_is_clamped() {
        let bars = daily(&[Decimal::new(100, 0), Decimal::new(100, 0), Decimal::new(100, 0)]);
        let mut strategy = MockStrategy::new();
        strategy.expect_name().return_const("sized".to_string());
        strategy.expect_parameters().returning(ParameterSet::empty);
        strategy.expect_sizes_by_confidence().return_const(true);

        // The field is public, so a strategy can skip the clamping builder.
        let mut oversized = Signal::buy(bars[0].timestamp);
        oversized.confidence = 3.0;
        let signals = vec![oversized, Signal::sell(bars[1].timestamp)];
        strategy
            .expect_generate_signals()
            .returning(move |_| Ok(signals.clone()));

        let config = BacktestConfig::frictionless(Decimal::new(1000, 0));
        let result = BacktestEngine::new().run(&strategy, &bars, &config).unwrap();

        assert_eq!(result.trades[0].quantity, Decimal::new(10, 0));
        assert!(result.equity_curve.iter().all(|p| p.value >= Decimal::ZERO));

        assert_eq!(confidence_fraction(-0.5), Decimal::ZERO);
        assert_eq!(confidence_fraction(f64::NAN), Decimal::ZERO);
        assert_eq!(confidence_fraction(0.25), Decimal::new(25, 2));
    }
}
