//! Technical indicators
//!
//! Window-based helpers shared by the trend classifier, the candle strength
//! evaluator and the support/resistance locator.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use statrs::statistics::Statistics;

use crate::Bar;

/// Calculate Simple Moving Average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut result = Vec::with_capacity(values.len());

    if period == 0 {
        result.resize(values.len(), None);
        return result;
    }

    for i in 0..values.len() {
        if i + 1 < period {
            result.push(None);
        } else {
            let sum: f64 = values[i + 1 - period..=i].iter().sum();
            result.push(Some(sum / period as f64));
        }
    }

    result
}

/// Lowest mid low over the trailing window ending at `index` (inclusive).
///
/// The window is clipped at the start of the series, so early indices look
/// at fewer bars instead of returning nothing.
pub fn trailing_low(bars: &[Bar], index: usize, window: usize) -> Option<f64> {
    if index >= bars.len() || window == 0 {
        return None;
    }
    let start = (index + 1).saturating_sub(window);
    bars[start..=index].iter().map(|b| b.mid.l).reduce(f64::min)
}

/// Mean mid-price range (high - low) of `bars[start..end]`
pub fn mean_range(bars: &[Bar], start: usize, end: usize) -> Option<f64> {
    if start >= end || end > bars.len() {
        return None;
    }
    Some(bars[start..end].iter().map(|b| b.mid.range()).mean())
}

/// Round half-to-even at `dp` decimal places on the exact binary value
pub fn round_dp(value: f64, dp: u32) -> f64 {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}
