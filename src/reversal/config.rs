//! Bottom Reversal Configuration
//!
//! Every tunable of the pipeline lives here. Serde defaults carry the values
//! the strategy was originally researched with; the engine itself only ever
//! sees a fully populated struct.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReversalConfig {
    #[serde(default)]
    pub trend: TrendConfig,

    #[serde(default)]
    pub setup: SetupConfig,

    #[serde(default)]
    pub strength: StrengthConfig,

    /// Support/resistance gating. Absent = confirmations are never gated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<LevelsConfig>,

    #[serde(default)]
    pub trade: TradeConfig,
}

impl Default for ReversalConfig {
    fn default() -> Self {
        Self {
            trend: TrendConfig::default(),
            setup: SetupConfig::default(),
            strength: StrengthConfig::default(),
            levels: None,
            trade: TradeConfig::default(),
        }
    }
}

impl ReversalConfig {
    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: &str| Err(EngineError::InvalidConfig(msg.to_string()));

        if self.trend.windows.is_empty() {
            return invalid("trend.windows must not be empty");
        }
        if self.trend.windows.contains(&0) {
            return invalid("trend.windows must all be > 0");
        }
        if self.trend.windows.iter().collect::<BTreeSet<_>>().len() < 2 {
            return invalid("trend.windows needs at least two distinct lengths");
        }
        if self.setup.bottom_lookback == 0 {
            return invalid("setup.bottom_lookback must be > 0");
        }
        if self.setup.invalidation_pips < 0.0 {
            return invalid("setup.invalidation_pips must be >= 0");
        }
        if self.strength.lookback == 0 {
            return invalid("strength.lookback must be > 0");
        }
        if !(self.strength.body_ratio > 0.0 && self.strength.body_ratio <= 1.0) {
            return invalid("strength.body_ratio must be in (0, 1]");
        }
        if self.trade.stop_offset_pips < 0.0 {
            return invalid("trade.stop_offset_pips must be >= 0");
        }

        match self.trade.target {
            TargetPolicy::RiskMultiple { ratio } if ratio <= 0.0 => {
                return invalid("trade.target.ratio must be > 0");
            }
            TargetPolicy::SecondZone if self.levels.is_none() => {
                return invalid("trade.target = second_zone requires a levels section");
            }
            _ => {}
        }

        if let TrailingPolicy::FixedPips { pips } = self.trade.trailing {
            if pips <= 0.0 {
                return invalid("trade.trailing.pips must be > 0");
            }
        }

        if let Some(r) = self.trade.breakeven_at_r {
            if r <= 0.0 {
                return invalid("trade.breakeven_at_r must be > 0");
            }
        }

        if let Some(levels) = &self.levels {
            if levels.window == 0 {
                return invalid("levels.window must be > 0");
            }
            if levels.num_zones < 2 {
                return invalid("levels.num_zones must be >= 2 for the reward:risk gate");
            }
        }

        Ok(())
    }

    /// Longest configured trend window, i.e. the minimum history required
    pub fn required_history(&self) -> usize {
        self.trend.windows.iter().copied().max().unwrap_or(0)
    }
}

/// Moving-average windows used for the downtrend label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendConfig {
    /// Window lengths; a bar is in downtrend when shorter averages sit
    /// strictly below longer ones (default: [10, 150])
    #[serde(default = "default_trend_windows")]
    pub windows: Vec<usize>,
}

fn default_trend_windows() -> Vec<usize> {
    vec![10, 150]
}

impl Default for TrendConfig {
    fn default() -> Self {
        Self {
            windows: default_trend_windows(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupConfig {
    /// Trailing window (bars, inclusive) a bottom's low must be the minimum of (default: 60)
    #[serde(default = "default_bottom_lookback")]
    pub bottom_lookback: usize,

    /// Abandon an exited setup once price runs this far above the zone (default: 55)
    #[serde(default = "default_invalidation_pips")]
    pub invalidation_pips: f64,

    /// Bars allowed between reentry and confirmation (default: 15)
    #[serde(default = "default_max_reentry_spacing")]
    pub max_reentry_spacing: usize,
}

fn default_bottom_lookback() -> usize {
    60
}
fn default_invalidation_pips() -> f64 {
    55.0
}
fn default_max_reentry_spacing() -> usize {
    15
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            bottom_lookback: default_bottom_lookback(),
            invalidation_pips: default_invalidation_pips(),
            max_reentry_spacing: default_max_reentry_spacing(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrengthMethod {
    /// Body size against the trailing mean range, graded in [0, 1]
    Contextual,
    /// Range expansion + decisive body + close near high, scored 0 or 1
    RangeExpansion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrengthConfig {
    #[serde(default = "default_strength_method")]
    pub method: StrengthMethod,

    /// Bars of trailing history for the mean range (default: 200)
    #[serde(default = "default_strength_lookback")]
    pub lookback: usize,

    /// Minimum body / range for a candle to count at all (default: 0.7)
    #[serde(default = "default_body_ratio")]
    pub body_ratio: f64,

    /// Score a reentry bar must exceed to confirm (default: 0.7)
    #[serde(default = "default_strength_threshold")]
    pub threshold: f64,

    /// Range expansion method only: range must exceed mean range × this (default: 1.5)
    #[serde(default = "default_range_multiplier")]
    pub range_multiplier: f64,

    /// Range expansion method only: max (high - close) / range (default: 0.2)
    #[serde(default = "default_close_proximity")]
    pub close_proximity: f64,
}

fn default_strength_method() -> StrengthMethod {
    StrengthMethod::Contextual
}
fn default_strength_lookback() -> usize {
    200
}
fn default_body_ratio() -> f64 {
    0.7
}
fn default_strength_threshold() -> f64 {
    0.7
}
fn default_range_multiplier() -> f64 {
    1.5
}
fn default_close_proximity() -> f64 {
    0.2
}

impl Default for StrengthConfig {
    fn default() -> Self {
        Self {
            method: default_strength_method(),
            lookback: default_strength_lookback(),
            body_ratio: default_body_ratio(),
            threshold: default_strength_threshold(),
            range_multiplier: default_range_multiplier(),
            close_proximity: default_close_proximity(),
        }
    }
}

/// Support/resistance settings. Distances are in pips of the instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelsConfig {
    /// Bars on each side a pivot must dominate (default: 3)
    #[serde(default = "default_levels_window")]
    pub window: usize,

    /// Max distance from a cluster's running mean (default: 50)
    #[serde(default = "default_clustering_pips")]
    pub clustering_pips: f64,

    /// Candidate zones to collect above price (default: 3)
    #[serde(default = "default_num_zones")]
    pub num_zones: usize,

    /// Minimum resistance - support width (default: 15)
    #[serde(default = "default_min_width_pips")]
    pub min_width_pips: f64,

    /// Minimum gap above the previous zone's resistance (default: 0)
    #[serde(default)]
    pub min_gap_pips: f64,

    /// Minimum (zone 2 resistance - entry) / (entry - confirmation low) (default: 1.0)
    #[serde(default = "default_min_reward_risk")]
    pub min_reward_risk: f64,
}

fn default_levels_window() -> usize {
    3
}
fn default_clustering_pips() -> f64 {
    50.0
}
fn default_num_zones() -> usize {
    3
}
fn default_min_width_pips() -> f64 {
    15.0
}
fn default_min_reward_risk() -> f64 {
    1.0
}

impl Default for LevelsConfig {
    fn default() -> Self {
        Self {
            window: default_levels_window(),
            clustering_pips: default_clustering_pips(),
            num_zones: default_num_zones(),
            min_width_pips: default_min_width_pips(),
            min_gap_pips: 0.0,
            min_reward_risk: default_min_reward_risk(),
        }
    }
}

/// Where the initial take-profit comes from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetPolicy {
    /// entry + (entry - stop) × ratio
    RiskMultiple { ratio: f64 },
    /// Resistance of the second candidate zone
    SecondZone,
}

/// How the trailing stop distance is fixed once the target is reached
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrailingPolicy {
    /// Close the trade at the target
    Off,
    /// Trail by the original target - entry distance
    TargetDistance,
    /// Trail by a fixed number of pips
    FixedPips { pips: f64 },
}

/// Which quotes drive entries and exits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriceView {
    Mid,
    /// Enter on the ask close, manage exits on bid prices (falls back to mid)
    BidAsk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeConfig {
    /// Stop distance below the zone low (default: 0)
    #[serde(default)]
    pub stop_offset_pips: f64,

    #[serde(default = "default_target")]
    pub target: TargetPolicy,

    #[serde(default = "default_trailing")]
    pub trailing: TrailingPolicy,

    /// Move the stop to entry once price reaches entry + r × initial risk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakeven_at_r: Option<f64>,

    #[serde(default = "default_price_view")]
    pub price_view: PriceView,
}

fn default_target() -> TargetPolicy {
    TargetPolicy::RiskMultiple { ratio: 0.5 }
}
fn default_trailing() -> TrailingPolicy {
    TrailingPolicy::TargetDistance
}
fn default_price_view() -> PriceView {
    PriceView::Mid
}

impl Default for TradeConfig {
    fn default() -> Self {
        Self {
            stop_offset_pips: 0.0,
            target: default_target(),
            trailing: default_trailing(),
            breakeven_at_r: None,
            price_view: default_price_view(),
        }
    }
}
