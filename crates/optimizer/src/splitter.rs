//! Chronological train/validation/test splitting.
//!
//! Every segment produced here is a contiguous slice of the time-sorted input,
//! so later segments never contain bars earlier than previous ones.

use backtester::{validate_series, PriceBar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{OptimizationError, Result};

/// Tolerance on the sum of the three split fractions.
const SUM_TOLERANCE: f64 = 1e-3;

/// Share of the series always kept as the first walk-forward train window.
const MIN_TRAIN_PCT: f64 = 0.3;

/// Smallest walk-forward test window, in bars.
const MIN_TEST_BARS: usize = 10;

/// Time-series aware splitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataSplitter {
    train_pct: f64,
    val_pct: f64,
    test_pct: f64,
}

impl Default for DataSplitter {
    fn default() -> Self {
        Self {
            train_pct: 0.6,
            val_pct: 0.2,
            test_pct: 0.2,
        }
    }
}

impl DataSplitter {
    /// Create a splitter. Fractions must be finite, non-negative and sum to
    /// one within 0.001.
    pub fn new(train_pct: f64, val_pct: f64, test_pct: f64) -> Result<Self> {
        for (name, pct) in [("train", train_pct), ("validation", val_pct), ("test", test_pct)] {
            if !pct.is_finite() || pct < 0.0 {
                return Err(OptimizationError::configuration(format!(
                    "{} fraction must be a non-negative number, got {}",
                    name, pct
                )));
            }
        }
        let sum = train_pct + val_pct + test_pct;
        if (sum - 1.0).abs() >= SUM_TOLERANCE {
            return Err(OptimizationError::configuration(format!(
                "split fractions must sum to 1.0, got {:.4}",
                sum
            )));
        }

        debug!(train_pct, val_pct, test_pct, "DataSplitter initialized");
        Ok(Self {
            train_pct,
            val_pct,
            test_pct,
        })
    }

    pub fn train_pct(&self) -> f64 {
        self.train_pct
    }

    pub fn val_pct(&self) -> f64 {
        self.val_pct
    }

    pub fn test_pct(&self) -> f64 {
        self.test_pct
    }

    /// Split bars into train, validation and test segments.
    ///
    /// The input is sorted by timestamp first; cut points are
    /// `floor(n * train_pct)` and `floor(n * (train_pct + val_pct))`.
    pub fn split(&self, bars: &[PriceBar]) -> Result<DataSplit> {
        let sorted = sorted_copy(bars)?;
        let n = sorted.len();

        let train_end = floor_index(n, self.train_pct);
        let val_end = floor_index(n, self.train_pct + self.val_pct).max(train_end);

        let mut train = sorted;
        let mut val = train.split_off(train_end);
        let test = val.split_off(val_end - train_end);

        let split = DataSplit { train, val, test };
        let summary = split.summary();
        info!(
            train = summary.train.bars,
            val = summary.validation.bars,
            test = summary.test.bars,
            "Split data"
        );
        for (name, segment) in [
            ("train", &summary.train),
            ("val", &summary.validation),
            ("test", &summary.test),
        ] {
            if let (Some(start), Some(end)) = (segment.start, segment.end) {
                debug!(segment = name, %start, %end, "Segment range");
            }
        }

        Ok(split)
    }

    /// Expanding-window walk-forward splits.
    ///
    /// The first train window covers 30% of the series; each later window
    /// grows by one test window. Test windows are `floor(n * test_size_pct)`
    /// bars and follow their train window directly. Generation stops early if
    /// a test window would run past the end of the series.
    pub fn walk_forward_splits(
        &self,
        bars: &[PriceBar],
        n_splits: usize,
        test_size_pct: f64,
    ) -> Result<Vec<WalkForwardWindow>> {
        if n_splits == 0 {
            return Err(OptimizationError::configuration("n_splits must be at least 1"));
        }
        if !test_size_pct.is_finite() || test_size_pct <= 0.0 || test_size_pct >= 1.0 {
            return Err(OptimizationError::configuration(format!(
                "test_size_pct must be in (0, 1), got {}",
                test_size_pct
            )));
        }

        let sorted = sorted_copy(bars)?;
        let n = sorted.len();
        let test_size = floor_index(n, test_size_pct);
        let min_train = floor_index(n, MIN_TRAIN_PCT);

        if test_size < MIN_TEST_BARS {
            return Err(OptimizationError::insufficient_data(format!(
                "test window too small: {} bars (minimum {})",
                test_size, MIN_TEST_BARS
            )));
        }
        if min_train + test_size * n_splits > n {
            return Err(OptimizationError::insufficient_data(format!(
                "not enough data for {} splits: need {} bars, have {}",
                n_splits,
                min_train + test_size * n_splits,
                n
            )));
        }

        let mut windows = Vec::with_capacity(n_splits);
        for index in 0..n_splits {
            let train_end = min_train + test_size * index;
            let test_end = train_end + test_size;
            if test_end > n {
                break;
            }

            debug!(split = index + 1, train = train_end, test = test_size, "Walk-forward window");
            windows.push(WalkForwardWindow {
                index,
                train: sorted[..train_end].to_vec(),
                test: sorted[train_end..test_end].to_vec(),
            });
        }

        info!(splits = windows.len(), "Created walk-forward splits");
        Ok(windows)
    }
}

fn floor_index(n: usize, pct: f64) -> usize {
    ((n as f64 * pct).floor() as usize).min(n)
}

/// Sorted copy of the input; rejects empty series and duplicate timestamps.
fn sorted_copy(bars: &[PriceBar]) -> Result<Vec<PriceBar>> {
    if bars.is_empty() {
        return Err(OptimizationError::insufficient_data("cannot split an empty series"));
    }
    let mut sorted = bars.to_vec();
    sorted.sort_by_key(|bar| bar.timestamp);
    validate_series(&sorted).map_err(|e| OptimizationError::InvalidSeries {
        message: e.to_string(),
    })?;
    Ok(sorted)
}

/// The three chronological segments of one split.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplit {
    pub train: Vec<PriceBar>,
    pub val: Vec<PriceBar>,
    pub test: Vec<PriceBar>,
}

impl DataSplit {
    pub fn len(&self) -> usize {
        self.train.len() + self.val.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> SplitSummary {
        SplitSummary {
            train: SegmentSummary::of(&self.train),
            validation: SegmentSummary::of(&self.val),
            test: SegmentSummary::of(&self.test),
        }
    }
}

/// Size and time range of one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub bars: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl SegmentSummary {
    pub fn of(bars: &[PriceBar]) -> Self {
        Self {
            bars: bars.len(),
            start: bars.first().map(|b| b.timestamp),
            end: bars.last().map(|b| b.timestamp),
        }
    }
}

/// Segment sizes and boundaries of a split, kept on optimization results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitSummary {
    pub train: SegmentSummary,
    pub validation: SegmentSummary,
    pub test: SegmentSummary,
}

/// One expanding-train, fixed-test walk-forward window.
#[derive(Debug, Clone, PartialEq)]
pub struct WalkForwardWindow {
    pub index: usize,
    pub train: Vec<PriceBar>,
    pub test: Vec<PriceBar>,
}
