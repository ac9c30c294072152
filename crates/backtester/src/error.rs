//! Error types for the backtest engine and strategy boundary.

use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Invalid strategy parameters: {message}")]
    StrategyConfig { message: String },

    #[error("Signal generation failed in {strategy}: {message}")]
    SignalGeneration { strategy: String, message: String },

    #[error("Signal at {timestamp} does not match any bar in the series")]
    MisalignedSignal { timestamp: DateTime<Utc> },

    #[error("Cannot backtest an empty price series")]
    EmptySeries,

    #[error("Invalid backtest configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Invalid price series: {message}")]
    InvalidSeries { message: String },

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BacktestError {
    /// Shorthand for the error a strategy returns from `initialize`.
    pub fn config(message: impl Into<String>) -> Self {
        BacktestError::StrategyConfig {
            message: message.into(),
        }
    }

    /// Shorthand for the error a strategy returns from `generate_signals`.
    pub fn signal(strategy: &str, message: impl Into<String>) -> Self {
        BacktestError::SignalGeneration {
            strategy: strategy.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BacktestError>;
