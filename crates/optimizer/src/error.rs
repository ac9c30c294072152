//! Error types for splitting and optimization.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Optimization phase a sweep or failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Validation,
    Test,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Train => "train",
            Phase::Validation => "validation",
            Phase::Test => "test",
        })
    }
}

#[derive(Error, Debug)]
pub enum OptimizationError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Insufficient data: {message}")]
    InsufficientData { message: String },

    #[error("Invalid price series: {message}")]
    InvalidSeries { message: String },

    #[error(
        "No valid results in {phase} phase: all {attempted} combinations failed ({failed} failures)"
    )]
    NoValidResults {
        phase: Phase,
        attempted: usize,
        failed: usize,
    },
}

impl OptimizationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        OptimizationError::Configuration {
            message: message.into(),
        }
    }

    pub fn insufficient_data(message: impl Into<String>) -> Self {
        OptimizationError::InsufficientData {
            message: message.into(),
        }
    }

    /// True when the caller had nothing usable to work with, as opposed to
    /// every parameter combination failing.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            OptimizationError::InsufficientData { .. } | OptimizationError::InvalidSeries { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, OptimizationError>;
