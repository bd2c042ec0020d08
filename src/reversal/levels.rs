//! Support/resistance levels
//!
//! Pivot highs and lows of the history before a confirmation are clustered
//! into levels, then paired into non-overlapping candidate zones above the
//! current price. The trade gate uses the second zone's resistance as the
//! reward side of a reward:risk check.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::indicators::round_dp;
use crate::Bar;

use super::config::LevelsConfig;

/// A support paired with the first resistance wide enough above it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateZone {
    pub support: f64,
    pub resistance: f64,
}

impl CandidateZone {
    pub fn width(&self) -> f64 {
        self.resistance - self.support
    }
}

/// Clustered levels, each list ascending
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Levels {
    pub supports: Vec<f64>,
    pub resistances: Vec<f64>,
}

fn local_extrema(
    values: &[f64],
    window: usize,
    dominates: impl Fn(f64, f64) -> bool,
) -> Vec<usize> {
    if values.is_empty() || window == 0 {
        return Vec::new();
    }
    let last = values.len() - 1;
    (0..values.len())
        .filter(|&j| {
            let lo = j.saturating_sub(window);
            let hi = (j + window).min(last);
            (lo..=hi).all(|k| k == j || dominates(values[j], values[k]))
        })
        .collect()
}

/// Indices whose value is <= every neighbour within `window` bars
pub fn local_minima(values: &[f64], window: usize) -> Vec<usize> {
    local_extrema(values, window, |v, other| v <= other)
}

/// Indices whose value is >= every neighbour within `window` bars
pub fn local_maxima(values: &[f64], window: usize) -> Vec<usize> {
    local_extrema(values, window, |v, other| v >= other)
}

/// Group sorted values whose distance to the running cluster mean stays
/// within `threshold`. Singleton clusters are dropped.
pub fn cluster_levels(values: &[f64], threshold: f64) -> Vec<f64> {
    let mut sorted: Vec<OrderedFloat<f64>> = values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .map(OrderedFloat)
        .collect();
    sorted.sort();

    let mut clusters: Vec<Vec<f64>> = Vec::new();
    for OrderedFloat(value) in sorted {
        match clusters.last_mut() {
            Some(cluster) if (value - cluster.iter().mean()).abs() <= threshold => {
                cluster.push(value)
            }
            _ => clusters.push(vec![value]),
        }
    }

    clusters
        .into_iter()
        .filter(|c| c.len() >= 2)
        .map(|c| round_dp(c.iter().mean(), 5))
        .collect()
}

/// Cluster pivot lows into supports and pivot highs into resistances
pub fn find_levels(bars: &[Bar], window: usize, clustering_threshold: f64) -> Levels {
    let lows: Vec<f64> = bars.iter().map(|b| b.mid.l).collect();
    let highs: Vec<f64> = bars.iter().map(|b| b.mid.h).collect();

    let pivot_lows: Vec<f64> = local_minima(&lows, window)
        .into_iter()
        .map(|i| lows[i])
        .collect();
    let pivot_highs: Vec<f64> = local_maxima(&highs, window)
        .into_iter()
        .map(|i| highs[i])
        .collect();

    Levels {
        supports: cluster_levels(&pivot_lows, clustering_threshold),
        resistances: cluster_levels(&pivot_highs, clustering_threshold),
    }
}

/// Up to `num_zones` ascending, non-overlapping zones strictly above `price`.
///
/// Each support above price (and more than `min_gap` above the previous
/// zone's resistance) is paired with the first resistance at least
/// `min_width` above it.
pub fn candidate_zones(
    price: f64,
    levels: &Levels,
    num_zones: usize,
    min_gap: f64,
    min_width: f64,
) -> Vec<CandidateZone> {
    let mut zones = Vec::with_capacity(num_zones);
    let mut last_resistance = price;

    for &support in levels.supports.iter().filter(|&&s| s > price) {
        if zones.len() >= num_zones {
            break;
        }
        if support <= last_resistance + min_gap {
            continue;
        }
        let resistance = levels
            .resistances
            .iter()
            .copied()
            .find(|&r| r > support && r - support >= min_width);
        if let Some(resistance) = resistance {
            zones.push(CandidateZone {
                support,
                resistance,
            });
            last_resistance = resistance;
        }
    }

    zones
}

/// Locates candidate zones for one instrument
pub struct LevelLocator {
    config: LevelsConfig,
    pip_size: f64,
}

impl LevelLocator {
    pub fn new(config: LevelsConfig, pip_size: f64) -> Self {
        Self { config, pip_size }
    }

    pub fn min_reward_risk(&self) -> f64 {
        self.config.min_reward_risk
    }

    /// Zones above the confirmation close, computed from the bars strictly
    /// before `confirmation_index`. Empty when that history is shorter than
    /// two pivot windows.
    pub fn zones_at(&self, bars: &[Bar], confirmation_index: usize) -> Vec<CandidateZone> {
        let Some(confirmation) = bars.get(confirmation_index) else {
            return Vec::new();
        };
        let history = &bars[..confirmation_index];
        if history.len() < self.config.window * 2 {
            return Vec::new();
        }

        let levels = find_levels(
            history,
            self.config.window,
            self.config.clustering_pips * self.pip_size,
        );
        candidate_zones(
            confirmation.mid.c,
            &levels,
            self.config.num_zones,
            self.config.min_gap_pips * self.pip_size,
            self.config.min_width_pips * self.pip_size,
        )
    }
}

/// (second zone resistance - entry) / (entry - confirmation low).
///
/// `None` with fewer than two zones or non-positive risk.
pub fn reward_risk(zones: &[CandidateZone], entry: f64, confirmation_low: f64) -> Option<f64> {
    let second = zones.get(1)?;
    let risk = entry - confirmation_low;
    if risk <= 0.0 {
        return None;
    }
    Some((second.resistance - entry) / risk)
}
