//! Bottom reversal pipeline
//!
//! Trend labels feed the bottom/zone state machine; strong reentry candles
//! confirm setups; the optional level locator gates confirmations; the
//! trade simulator turns the survivors into pip-denominated trades.

pub mod candle;
pub mod config;
pub mod levels;
pub mod setup;
pub mod simulator;
pub mod trend;

pub use candle::StrengthEvaluator;
pub use config::{
    LevelsConfig, PriceView, ReversalConfig, SetupConfig, StrengthConfig, StrengthMethod,
    TargetPolicy, TradeConfig, TrailingPolicy, TrendConfig,
};
pub use levels::{CandidateZone, LevelLocator};
pub use setup::{SetupEvent, SetupStage, SetupState, SetupTracker, Zone};
pub use simulator::{OpenTrade, TradeEvent, TradeSimulator};
pub use trend::{TrendClassifier, TrendLabels};
