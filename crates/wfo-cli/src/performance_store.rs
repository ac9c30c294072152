//! CSV log of per-run performance, one row per recorded optimization.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use optimizer::OptimizationResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub timestamp: DateTime<Utc>,
    pub strategy: String,
    pub symbol: String,
    pub timeframe: String,
    pub sharpe: f64,
    pub total_return: f64,
    pub max_drawdown: f64,
    pub win_rate: f64,
}

impl PerformanceRecord {
    /// Row for an optimization run. Uses the test-segment statistics, or the
    /// validation ones when the test run failed.
    pub fn from_optimization(
        result: &OptimizationResult,
        symbol: &str,
        timeframe: &str,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let summary = result.test_summary.as_ref().unwrap_or(&result.val_summary);
        Self {
            timestamp,
            strategy: result.strategy_name.clone(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            sharpe: summary.sharpe_ratio,
            total_return: summary.total_return,
            max_drawdown: summary.max_drawdown,
            win_rate: summary.win_rate,
        }
    }
}

pub struct PerformanceStore {
    path: PathBuf,
}

impl PerformanceStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All readable rows. A missing file is an empty store; malformed rows
    /// are skipped with a warning.
    pub fn load(&self) -> Result<Vec<PerformanceRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let mut reader = csv::Reader::from_path(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        let mut records = Vec::new();
        let mut skipped = 0usize;

        for row in reader.deserialize::<PerformanceRecord>() {
            match row {
                Ok(record) => records.push(record),
                Err(e) => {
                    skipped += 1;
                    debug!(error = %e, "Skipping malformed performance row");
                }
            }
        }

        if skipped > 0 {
            warn!(
                path = %self.path.display(),
                skipped,
                "Dropped malformed rows from performance store"
            );
        }
        Ok(records)
    }

    /// Append a row, keeping the file sorted by timestamp.
    pub fn record(&self, record: PerformanceRecord) -> Result<()> {
        let mut records = self.load()?;
        records.push(record);
        records.sort_by_key(|r| r.timestamp);

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut writer = csv::Writer::from_path(&self.path)
            .with_context(|| format!("failed to write {}", self.path.display()))?;
        for row in &records {
            writer.serialize(row)?;
        }
        writer.flush()?;

        debug!(path = %self.path.display(), rows = records.len(), "Performance store updated");
        Ok(())
    }

    /// Rows newer than `days` before `now`, optionally limited to some
    /// strategies.
    pub fn recent(
        &self,
        strategies: Option<&[&str]>,
        days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<PerformanceRecord>> {
        let cutoff = now - Duration::days(days);
        Ok(self
            .load()?
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .filter(|r| strategies.map_or(true, |names| names.contains(&r.strategy.as_str())))
            .collect())
    }
}
