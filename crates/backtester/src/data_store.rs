//! Historical price bars and CSV-backed bar storage.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{BacktestError, Result};

/// One OHLCV bar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBar {
    /// Bar open time.
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl PriceBar {
    /// Create a new price bar.
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// A bar whose open, high, low and close are all `price`.
    pub fn flat(timestamp: DateTime<Utc>, price: Decimal) -> Self {
        Self::new(timestamp, price, price, price, price, Decimal::ZERO)
    }
}

/// Check that bar timestamps are strictly ascending.
///
/// Duplicates and out-of-order bars are both rejected; the error names the
/// first offending position.
pub fn validate_series(bars: &[PriceBar]) -> Result<()> {
    for (i, pair) in bars.windows(2).enumerate() {
        if pair[1].timestamp == pair[0].timestamp {
            return Err(BacktestError::InvalidSeries {
                message: format!("duplicate timestamp {} at row {}", pair[1].timestamp, i + 1),
            });
        }
        if pair[1].timestamp < pair[0].timestamp {
            return Err(BacktestError::InvalidSeries {
                message: format!(
                    "timestamp {} at row {} precedes {}",
                    pair[1].timestamp,
                    i + 1,
                    pair[0].timestamp
                ),
            });
        }
    }
    Ok(())
}

/// Bar spacing of a price series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeResolution {
    /// 1 minute
    Minute,
    /// 5 minutes
    Minute5,
    /// 15 minutes
    Minute15,
    /// 1 hour
    Hour,
    /// 4 hours
    Hour4,
    /// 1 day
    Day,
    /// 1 week
    Week,
}

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;

impl TimeResolution {
    const ALL: [TimeResolution; 7] = [
        TimeResolution::Minute,
        TimeResolution::Minute5,
        TimeResolution::Minute15,
        TimeResolution::Hour,
        TimeResolution::Hour4,
        TimeResolution::Day,
        TimeResolution::Week,
    ];

    /// Get the interval as a chrono Duration.
    pub fn to_duration(&self) -> Duration {
        match self {
            TimeResolution::Minute => Duration::minutes(1),
            TimeResolution::Minute5 => Duration::minutes(5),
            TimeResolution::Minute15 => Duration::minutes(15),
            TimeResolution::Hour => Duration::hours(1),
            TimeResolution::Hour4 => Duration::hours(4),
            TimeResolution::Day => Duration::days(1),
            TimeResolution::Week => Duration::weeks(1),
        }
    }

    /// Number of bars in a 365-day year, used to annualize per-bar ratios.
    pub fn periods_per_year(&self) -> f64 {
        SECONDS_PER_YEAR / self.to_duration().num_seconds() as f64
    }

    /// Exchange-style timeframe label.
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeResolution::Minute => "1m",
            TimeResolution::Minute5 => "5m",
            TimeResolution::Minute15 => "15m",
            TimeResolution::Hour => "1h",
            TimeResolution::Hour4 => "4h",
            TimeResolution::Day => "1d",
            TimeResolution::Week => "1w",
        }
    }

    /// Infer the resolution from the median spacing between bars.
    ///
    /// Picks the resolution whose interval is closest to the median gap, so a
    /// series with occasional missing bars still maps to its nominal frequency.
    /// Returns `None` for fewer than two bars.
    pub fn infer(bars: &[PriceBar]) -> Option<Self> {
        if bars.len() < 2 {
            return None;
        }

        let mut gaps: Vec<i64> = bars
            .windows(2)
            .map(|w| (w[1].timestamp - w[0].timestamp).num_seconds())
            .filter(|gap| *gap > 0)
            .collect();
        if gaps.is_empty() {
            return None;
        }
        gaps.sort_unstable();
        let median = gaps[gaps.len() / 2] as f64;

        Self::ALL.iter().copied().min_by(|a, b| {
            let da = (a.to_duration().num_seconds() as f64 / median).ln().abs();
            let db = (b.to_duration().num_seconds() as f64 / median).ln().abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

impl std::fmt::Display for TimeResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeResolution {
    type Err = BacktestError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "minute" => Ok(Self::Minute),
            "5m" | "minute5" => Ok(Self::Minute5),
            "15m" | "minute15" => Ok(Self::Minute15),
            "1h" | "hour" => Ok(Self::Hour),
            "4h" | "hour4" => Ok(Self::Hour4),
            "1d" | "day" => Ok(Self::Day),
            "1w" | "week" => Ok(Self::Week),
            other => Err(BacktestError::InvalidConfig {
                message: format!("unknown timeframe: {}", other),
            }),
        }
    }
}

/// Query parameters for reading a subset of stored bars.
#[derive(Debug, Clone, Default)]
pub struct DataQuery {
    /// Inclusive start time.
    pub start_time: Option<DateTime<Utc>>,
    /// Exclusive end time.
    pub end_time: Option<DateTime<Utc>>,
    /// Keep only the most recent N bars.
    pub limit: Option<usize>,
}

impl DataQuery {
    /// Query every stored bar.
    pub fn all() -> Self {
        Self::default()
    }

    /// Query a specific time range.
    pub fn range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start_time: Some(start),
            end_time: Some(end),
            limit: None,
        }
    }

    /// Query the bars of the last N days before `now`.
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Self {
        Self::range(now - Duration::days(days), now)
    }

    /// Set maximum records.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, bar: &PriceBar) -> bool {
        self.start_time.map_or(true, |start| bar.timestamp >= start)
            && self.end_time.map_or(true, |end| bar.timestamp < end)
    }
}

/// Raw CSV row; every column is parsed explicitly so prices keep their
/// decimal text representation.
#[derive(Debug, Deserialize)]
struct BarRecord {
    timestamp: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

impl BarRecord {
    fn into_bar(self, row: usize) -> Result<PriceBar> {
        let price = |field: &str, value: &str| {
            Decimal::from_str(value.trim()).map_err(|e| BacktestError::InvalidSeries {
                message: format!("row {}: invalid {} '{}': {}", row, field, value, e),
            })
        };

        Ok(PriceBar {
            timestamp: parse_timestamp(&self.timestamp).ok_or_else(|| {
                BacktestError::InvalidSeries {
                    message: format!("row {}: invalid timestamp '{}'", row, self.timestamp),
                }
            })?,
            open: price("open", &self.open)?,
            high: price("high", &self.high)?,
            low: price("low", &self.low)?,
            close: price("close", &self.close)?,
            volume: price("volume", &self.volume)?,
        })
    }
}

/// Parse an RFC 3339 timestamp or an integer unix time.
///
/// Integers above 10^11 are taken as milliseconds (exchange exports), smaller
/// ones as seconds.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    let value: i64 = raw.parse().ok()?;
    if value.abs() > 100_000_000_000 {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

/// Historical bar store backed by a CSV file with a
/// `timestamp,open,high,low,close,volume` header.
pub struct HistoricalDataStore {
    path: PathBuf,
}

impl HistoricalDataStore {
    /// Create a store for the given CSV file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load every bar, sorted ascending and validated.
    pub fn load_bars(&self) -> Result<Vec<PriceBar>> {
        let mut reader = csv::Reader::from_path(&self.path)?;
        let mut bars = Vec::new();

        for (i, record) in reader.deserialize::<BarRecord>().enumerate() {
            bars.push(record?.into_bar(i + 1)?);
        }

        bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        validate_series(&bars)?;

        info!(
            path = %self.path.display(),
            bars = bars.len(),
            "Loaded price bars"
        );
        Ok(bars)
    }

    /// Load the bars matching a query.
    pub fn query_bars(&self, query: &DataQuery) -> Result<Vec<PriceBar>> {
        let mut bars: Vec<PriceBar> = self
            .load_bars()?
            .into_iter()
            .filter(|bar| query.matches(bar))
            .collect();

        if let Some(limit) = query.limit {
            if bars.len() > limit {
                bars.drain(0..bars.len() - limit);
            }
        }

        debug!(bars = bars.len(), "Bar query complete");
        Ok(bars)
    }

    /// Overwrite the store with the given bars.
    pub fn save_bars(&self, bars: &[PriceBar]) -> Result<usize> {
        let mut writer = csv::Writer::from_path(&self.path)?;
        for bar in bars {
            writer.serialize(bar)?;
        }
        writer.flush()?;
        Ok(bars.len())
    }

    /// Time range covered by the stored bars.
    pub fn get_data_range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let bars = self.load_bars()?;
        Ok(match (bars.first(), bars.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn hourly(n: usize) -> Vec<PriceBar> {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                PriceBar::flat(start + Duration::hours(i as i64), Decimal::new(100 + i as i64, 0))
            })
            .collect()
    }

    #[test]
    fn test_validate_series_rejects_duplicates() {
        let mut bars = hourly(3);
        bars[2].timestamp = bars[1].timestamp;
        assert!(matches!(
            validate_series(&bars),
            Err(BacktestError::InvalidSeries { .. })
        ));
    }

    #[test]
    fn test_validate_series_rejects_out_of_order() {
        let mut bars = hourly(3);
        bars.swap(0, 2);
        assert!(validate_series(&bars).is_err());
        assert!(validate_series(&hourly(3)).is_ok());
    }

    #[test]
    fn test_time_resolution() {
        assert_eq!(TimeResolution::Hour.to_duration(), Duration::hours(1));
        assert_eq!(TimeResolution::Hour.periods_per_year(), 8760.0);
        assert_eq!(TimeResolution::Day.periods_per_year(), 365.0);
        assert_eq!("4h".parse::<TimeResolution>().unwrap(), TimeResolution::Hour4);
        assert!("3h".parse::<TimeResolution>().is_err());
    }

    #[test]
    fn test_infer_resolution_tolerates_gaps() {
        let mut bars = hourly(10);
        bars.remove(4);
        assert_eq!(TimeResolution::infer(&bars), Some(TimeResolution::Hour));
        assert_eq!(TimeResolution::infer(&bars[..1]), None);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T00:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("1704067200"), Some(expected));
        assert_eq!(parse_timestamp("1704067200000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_store_save_and_query() {
        let dir = tempfile::tempdir().unwrap();
        let store = HistoricalDataStore::new(dir.path().join("bars.csv"));
        let bars = hourly(24);

        assert_eq!(store.save_bars(&bars).unwrap(), 24);
        let loaded = store.load_bars().unwrap();
        assert_eq!(loaded, bars);

        let query = DataQuery::range(bars[2].timestamp, bars[10].timestamp).limit(5);
        let subset = store.query_bars(&query).unwrap();
        assert_eq!(subset.len(), 5);
        assert_eq!(subset[0].timestamp, bars[5].timestamp);
        assert_eq!(subset[4].timestamp, bars[9].timestamp);
    }

    #[test]
    fn test_store_sorts_and_rejects_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bars.csv");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        writeln!(file, "1704070800,101,102,100,101.5,10").unwrap();
        writeln!(file, "1704067200,100,101,99,100.5,12").unwrap();
        drop(file);

        let bars = HistoricalDataStore::new(&path).load_bars().unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, Decimal::new(1005, 1));

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "1704067200,100,101,99,100.5,12").unwrap();
        drop(file);

        assert!(matches!(
            HistoricalDataStore::new(&path).load_bars(),
            Err(BacktestError::InvalidSeries { .. })
        ));
    }
}
