//! Core data types used across the backtesting pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Validation errors for bar data
#[derive(Debug, Error, PartialEq)]
pub enum BarValidationError {
    #[error("high ({high}) must be >= low ({low})")]
    HighLessThanLow { high: f64, low: f64 },

    #[error("open ({open}) must be between low ({low}) and high ({high})")]
    OpenOutOfRange { open: f64, low: f64, high: f64 },

    #[error("close ({close}) must be between low ({low}) and high ({high})")]
    CloseOutOfRange { close: f64, low: f64, high: f64 },

    #[error("prices must be positive and finite: open={open}, high={high}, low={low}, close={close}")]
    NonPositivePrice {
        open: f64,
        high: f64,
        low: f64,
        close: f64,
    },
}

/// One open/high/low/close quadruple for a single price view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub o: f64,
    pub h: f64,
    pub l: f64,
    pub c: f64,
}

impl Ohlc {
    pub fn new(o: f64, h: f64, l: f64, c: f64) -> Self {
        Self { o, h, l, c }
    }

    /// Full candle range (high - low)
    pub fn range(&self) -> f64 {
        self.h - self.l
    }

    /// Signed body (close - open)
    pub fn body(&self) -> f64 {
        self.c - self.o
    }

    pub fn is_bullish(&self) -> bool {
        self.c > self.o
    }

    pub fn validate(&self) -> Result<(), BarValidationError> {
        let all = [self.o, self.h, self.l, self.c];
        if all.iter().any(|v| !v.is_finite() || *v <= 0.0) {
            return Err(BarValidationError::NonPositivePrice {
                open: self.o,
                high: self.h,
                low: self.l,
                close: self.c,
            });
        }

        if self.h < self.l {
            return Err(BarValidationError::HighLessThanLow {
                high: self.h,
                low: self.l,
            });
        }

        if self.o < self.l || self.o > self.h {
            return Err(BarValidationError::OpenOutOfRange {
                open: self.o,
                low: self.l,
                high: self.h,
            });
        }

        if self.c < self.l || self.c > self.h {
            return Err(BarValidationError::CloseOutOfRange {
                close: self.c,
                low: self.l,
                high: self.h,
            });
        }

        Ok(())
    }
}

/// A single candle at a fixed granularity.
///
/// `mid` is always present. `bid`/`ask` are carried when the data source
/// supplied them and are only consulted under the bid/ask price view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub volume: f64,
    pub mid: Ohlc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<Ohlc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<Ohlc>,
}

impl Bar {
    /// Create a mid-only bar with validation
    pub fn new(time: DateTime<Utc>, mid: Ohlc, volume: f64) -> Result<Self, BarValidationError> {
        mid.validate()?;
        Ok(Self {
            time,
            volume,
            mid,
            bid: None,
            ask: None,
        })
    }

    /// Create a mid-only bar without validation (for trusted or synthetic sources)
    pub fn new_unchecked(time: DateTime<Utc>, mid: Ohlc, volume: f64) -> Self {
        Self {
            time,
            volume,
            mid,
            bid: None,
            ask: None,
        }
    }

    pub fn with_bid_ask(mut self, bid: Ohlc, ask: Ohlc) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    /// Validate every price view carried by the bar
    pub fn validate(&self) -> Result<(), BarValidationError> {
        self.mid.validate()?;
        if let Some(bid) = &self.bid {
            bid.validate()?;
        }
        if let Some(ask) = &self.ask {
            ask.validate()?;
        }
        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Currency pair name (e.g. `EUR_USD`) using Arc<str> for cheap cloning
///
/// Pair names travel into every trade record and analysis row, so clones
/// are reference-count bumps rather than string copies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pair(#[serde(with = "arc_str_serde")] std::sync::Arc<str>);

mod arc_str_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::sync::Arc;

    pub fn serialize<S>(value: &Arc<str>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Arc<str>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Arc::from(s.as_str()))
    }
}

impl Pair {
    pub fn new(s: impl AsRef<str>) -> Self {
        Pair(std::sync::Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when either leg of the pair is the Japanese yen
    pub fn is_jpy(&self) -> bool {
        self.0.split('_').any(|leg| leg == "JPY")
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Candle granularity as named by the candle API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    M1,
    M5,
    M15,
    M30,
    H1,
    H4,
    D,
}

impl Granularity {
    /// Candle length in minutes
    pub fn minutes(self) -> i64 {
        match self {
            Granularity::M1 => 1,
            Granularity::M5 => 5,
            Granularity::M15 => 15,
            Granularity::M30 => 30,
            Granularity::H1 => 60,
            Granularity::H4 => 240,
            Granularity::D => 1440,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::M1 => "M1",
            Granularity::M5 => "M5",
            Granularity::M15 => "M15",
            Granularity::M30 => "M30",
            Granularity::H1 => "H1",
            Granularity::H4 => "H4",
            Granularity::D => "D",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "M1" => Ok(Granularity::M1),
            "M5" => Ok(Granularity::M5),
            "M15" => Ok(Granularity::M15),
            "M30" => Ok(Granularity::M30),
            "H1" => Ok(Granularity::H1),
            "H4" => Ok(Granularity::H4),
            "D" => Ok(Granularity::D),
            other => anyhow::bail!(
                "Unknown granularity: '{}'. Available: M1, M5, M15, M30, H1, H4, D",
                other
            ),
        }
    }
}

/// Lifecycle stage of an open trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStage {
    Initial,
    Breakeven,
    Trailing,
}

/// Why a trade record was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Stop,
    Target,
    StillOpen,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloseReason::Stop => "stop",
            CloseReason::Target => "target",
            CloseReason::StillOpen => "still_open",
        };
        f.write_str(label)
    }
}

/// Trade log entry: one per completed (or still open) trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub pair: Pair,
    pub granularity: Granularity,
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub initial_stop_loss: f64,
    pub initial_take_profit: f64,
    /// Stop-loss in force when the trade closed
    pub stop_loss: f64,
    /// Target in force when the trade closed (`None` once trailing took over)
    pub take_profit: Option<f64>,
    pub stage: TradeStage,
    pub close_reason: CloseReason,
    pub exit_index: Option<usize>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: f64,
    /// Realised pips, or pips marked to the last close for still-open trades
    pub pips: f64,
    pub duration_bars: usize,
    pub zone_low: f64,
    pub zone_high: f64,
    pub bottom_index: usize,
    pub reward_risk: Option<f64>,
}

impl TradeRecord {
    pub fn is_closed(&self) -> bool {
        self.close_reason != CloseReason::StillOpen
    }
}

/// Pip-denominated performance statistics for one trade log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipMetrics {
    pub total_trades: usize,
    pub closed_trades: usize,
    pub open_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub total_pips: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub profit_factor: f64,
    pub avg_duration_bars: f64,
}
