//! FX Bottom-Reversal Backtester
//!
//! Detects downtrend bottoms, waits for price to leave and re-enter the
//! bottom zone, confirms on a strong bullish candle and simulates the
//! resulting long trades in pips. Candles come from CSV files downloaded
//! from the OANDA v3 REST API.

pub mod backtest;
pub mod config;
pub mod data;
pub mod error;
pub mod indicators;
pub mod instruments;
pub mod oanda;
pub mod reversal;
pub mod types;

pub use config::Config;
pub use error::{EngineError, EngineResult};
pub use types::*;
