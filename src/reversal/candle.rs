//! Candle strength evaluation
//!
//! Scores bullish candles in [0, 1]. A reentry bar confirms the setup when
//! its score exceeds the configured threshold.

use crate::indicators::{mean_range, round_dp};
use crate::Bar;

use super::config::{StrengthConfig, StrengthMethod};

/// Stand-in denominator for zero-range candles and zero mean ranges
pub const RANGE_EPSILON: f64 = 1e-9;

/// Body size relative to the mean range of up to `lookback` preceding bars.
///
/// Returns 0 for bearish/doji candles, candles whose body is under
/// `body_ratio` of their range, and the very first bar (no history).
pub fn contextual_score(bars: &[Bar], index: usize, lookback: usize, body_ratio: f64) -> f64 {
    let Some(bar) = bars.get(index) else {
        return 0.0;
    };
    let candle = &bar.mid;

    if !candle.is_bullish() {
        return 0.0;
    }

    let body = candle.body();
    if body < candle.range() * body_ratio {
        return 0.0;
    }

    let start = index.saturating_sub(lookback);
    let Some(mean) = mean_range(bars, start, index) else {
        return 0.0;
    };
    let mean = mean.max(RANGE_EPSILON);

    if body >= mean {
        1.0
    } else {
        round_dp(body / mean * 0.9, 3)
    }
}

/// 1.0 for a decisive range-expansion candle, 0.0 otherwise.
///
/// The mean range includes the bar itself and needs a full window.
pub fn range_expansion_score(bars: &[Bar], index: usize, config: &StrengthConfig) -> f64 {
    let Some(bar) = bars.get(index) else {
        return 0.0;
    };
    if index + 1 < config.lookback {
        return 0.0;
    }
    let Some(avg_range) = mean_range(bars, index + 1 - config.lookback, index + 1) else {
        return 0.0;
    };

    let candle = &bar.mid;
    let range = candle.range();
    let denominator = if range == 0.0 { RANGE_EPSILON } else { range };

    let range_ok = range > avg_range * config.range_multiplier;
    let body_ok = candle.body() / denominator > config.body_ratio;
    let close_near_high = (candle.h - candle.c) / denominator < config.close_proximity;

    if range_ok && body_ok && close_near_high {
        1.0
    } else {
        0.0
    }
}

/// Memoising strength evaluator for one bar sequence
pub struct StrengthEvaluator {
    config: StrengthConfig,
    cache: Vec<Option<f64>>,
}

impl StrengthEvaluator {
    pub fn new(config: StrengthConfig, bar_count: usize) -> Self {
        Self {
            config,
            cache: vec![None; bar_count],
        }
    }

    /// Score for bar `index`, computed once and then served from the cache
    pub fn score(&mut self, bars: &[Bar], index: usize) -> f64 {
        if let Some(Some(score)) = self.cache.get(index) {
            return *score;
        }

        let score = match self.config.method {
            StrengthMethod::Contextual => contextual_score(
                bars,
                index,
                self.config.lookback,
                self.config.body_ratio,
            ),
            StrengthMethod::RangeExpansion => range_expansion_score(bars, index, &self.config),
        };

        if index >= self.cache.len() {
            self.cache.resize(index + 1, None);
        }
        self.cache[index] = Some(score);
        score
    }

    pub fn threshold(&self) -> f64 {
        self.config.threshold
    }

    /// Number of bars scored so far
    pub fn scored(&self) -> usize {
        self.cache.iter().filter(|s| s.is_some()).count()
    }
}
