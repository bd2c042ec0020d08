//! Data loading and persistence
//!
//! Bar series live in one CSV per pair and granularity. Trade logs and
//! analysed rows are written next to each other in the results directory.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::{Bar, BarValidationError, Granularity, Ohlc, Pair};

// =============================================================================
// CSV Bar Files
// =============================================================================

/// Flat CSV layout of a [`Bar`]; bid/ask columns are optional
#[derive(Debug, Serialize, Deserialize)]
struct BarRow {
    time: DateTime<Utc>,
    volume: f64,
    mid_o: f64,
    mid_h: f64,
    mid_l: f64,
    mid_c: f64,
    #[serde(default)]
    bid_o: Option<f64>,
    #[serde(default)]
    bid_h: Option<f64>,
    #[serde(default)]
    bid_l: Option<f64>,
    #[serde(default)]
    bid_c: Option<f64>,
    #[serde(default)]
    ask_o: Option<f64>,
    #[serde(default)]
    ask_h: Option<f64>,
    #[serde(default)]
    ask_l: Option<f64>,
    #[serde(default)]
    ask_c: Option<f64>,
}

fn quad(o: Option<f64>, h: Option<f64>, l: Option<f64>, c: Option<f64>) -> Option<Ohlc> {
    Some(Ohlc::new(o?, h?, l?, c?))
}

impl BarRow {
    fn into_bar(self) -> Result<Bar, BarValidationError> {
        let bar = Bar {
            time: self.time,
            volume: self.volume,
            mid: Ohlc::new(self.mid_o, self.mid_h, self.mid_l, self.mid_c),
            bid: quad(self.bid_o, self.bid_h, self.bid_l, self.bid_c),
            ask: quad(self.ask_o, self.ask_h, self.ask_l, self.ask_c),
        };
        bar.validate()?;
        Ok(bar)
    }
}

impl From<&Bar> for BarRow {
    fn from(bar: &Bar) -> Self {
        BarRow {
            time: bar.time,
            volume: bar.volume,
            mid_o: bar.mid.o,
            mid_h: bar.mid.h,
            mid_l: bar.mid.l,
            mid_c: bar.mid.c,
            bid_o: bar.bid.map(|b| b.o),
            bid_h: bar.bid.map(|b| b.h),
            bid_l: bar.bid.map(|b| b.l),
            bid_c: bar.bid.map(|b| b.c),
            ask_o: bar.ask.map(|a| a.o),
            ask_h: bar.ask.map(|a| a.h),
            ask_l: bar.ask.map(|a| a.l),
            ask_c: bar.ask.map(|a| a.c),
        }
    }
}

/// `{data_dir}/{pair}_{granularity}.csv`
pub fn bar_file(data_dir: impl AsRef<Path>, pair: &Pair, granularity: Granularity) -> PathBuf {
    data_dir
        .as_ref()
        .join(format!("{}_{}.csv", pair, granularity))
}

/// Load bars from CSV, skipping unreadable or invalid rows with a warning
pub fn load_bars(path: impl AsRef<Path>) -> Result<Vec<Bar>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open CSV file {}", path.display()))?;

    let mut bars = Vec::new();
    let mut invalid_count = 0;

    for (row_idx, result) in reader.deserialize::<BarRow>().enumerate() {
        let bar = result
            .map_err(anyhow::Error::from)
            .and_then(|row| row.into_bar().map_err(anyhow::Error::from));
        match bar {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                invalid_count += 1;
                warn!(
                    "Skipping invalid bar at row {} in {:?}: {}",
                    row_idx + 2, // +2 for 1-indexed and header row
                    path.file_name().unwrap_or_default(),
                    e
                );
            }
        }
    }

    if invalid_count > 0 {
        warn!(
            "Skipped {} invalid bars out of {} in {:?}",
            invalid_count,
            invalid_count + bars.len(),
            path.file_name().unwrap_or_default()
        );
    }

    Ok(bars)
}

pub fn save_bars(path: impl AsRef<Path>, bars: &[Bar]) -> Result<PathBuf> {
    let rows: Vec<BarRow> = bars.iter().map(BarRow::from).collect();
    save_records(path, &rows)
}

/// Write any flat serialisable records as CSV with a header row
pub fn save_records<T: Serialize>(path: impl AsRef<Path>, records: &[T]) -> Result<PathBuf> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create output file {}", path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    info!("Saved {} rows to {}", records.len(), path.display());
    Ok(path.to_path_buf())
}

/// Filter bars by inclusive date range
pub fn filter_bars_by_date(
    bars: Vec<Bar>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Vec<Bar> {
    bars.into_iter()
        .filter(|b| {
            let after_start = start.is_none_or(|s| b.time >= s);
            let before_end = end.is_none_or(|e| b.time <= e);
            after_start && before_end
        })
        .collect()
}

/// Parse a date string (RFC 3339, YYYY-MM-DD HH:MM:SS or YYYY-MM-DD) to DateTime<Utc>
pub fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = date_str.parse::<DateTime<Utc>>() {
        return Ok(dt);
    }

    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(date_str, "%Y-%m-%d %H:%M:%S") {
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
    }

    // Date only: start of day
    if let Ok(nd) = chrono::NaiveDate::parse_from_str(date_str, "%Y-%m-%d") {
        let ndt = nd.and_time(NaiveTime::MIN);
        return Ok(DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc));
    }

    anyhow::bail!(
        "Failed to parse date: {}. Use RFC 3339, YYYY-MM-DD or YYYY-MM-DD HH:MM:SS format",
        date_str
    )
}

// =============================================================================
// Tests
// =============================================================================
