//! Trade simulation
//!
//! Holds at most one open long trade per pair. On every bar after entry the
//! stop is checked first, then the optional breakeven move, then the target,
//! which either closes the trade or hands it over to a trailing stop.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::indicators::round_dp;
use crate::{Bar, CloseReason, Granularity, Ohlc, Pair, TradeRecord, TradeStage};

use super::config::{PriceView, TargetPolicy, TradeConfig, TrailingPolicy};
use super::levels::CandidateZone;
use super::setup::Zone;

/// Live state of the open trade
#[derive(Debug, Clone, PartialEq)]
pub struct OpenTrade {
    pub entry_index: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub initial_stop_loss: f64,
    pub initial_take_profit: f64,
    pub stop_loss: f64,
    /// `None` once the trade is trailing
    pub take_profit: Option<f64>,
    pub stage: TradeStage,
    pub trailing_distance: Option<f64>,
    pub zone: Zone,
    pub reward_risk: Option<f64>,
}

/// What happened to the open trade on a bar
#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    MovedToBreakeven,
    TrailingStarted,
    StopTrailed,
    Closed(Box<TradeRecord>),
}

impl TradeEvent {
    pub fn label(&self) -> &'static str {
        match self {
            TradeEvent::MovedToBreakeven => "breakeven",
            TradeEvent::TrailingStarted => "trailing_started",
            TradeEvent::StopTrailed => "stop_trailed",
            TradeEvent::Closed(record) => match record.close_reason {
                CloseReason::Stop => "closed_stop",
                CloseReason::Target => "closed_target",
                CloseReason::StillOpen => "still_open",
            },
        }
    }
}

fn entry_price(bar: &Bar, view: PriceView) -> f64 {
    match view {
        PriceView::Mid => bar.mid.c,
        PriceView::BidAsk => bar.ask.map_or(bar.mid.c, |ask| ask.c),
    }
}

fn exit_candle(bar: &Bar, view: PriceView) -> Ohlc {
    match view {
        PriceView::Mid => bar.mid,
        PriceView::BidAsk => bar.bid.unwrap_or(bar.mid),
    }
}

pub struct TradeSimulator {
    config: TradeConfig,
    pip_size: f64,
    pair: Pair,
    granularity: Granularity,
    open: Option<OpenTrade>,
}

impl TradeSimulator {
    pub fn new(config: TradeConfig, pip_size: f64, pair: Pair, granularity: Granularity) -> Self {
        Self {
            config,
            pip_size,
            pair,
            granularity,
            open: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn open_trade(&self) -> Option<&OpenTrade> {
        self.open.as_ref()
    }

    /// Price difference expressed in pips, rounded to 0.1
    pub fn pips(&self, from: f64, to: f64) -> f64 {
        round_dp((to - from) / self.pip_size, 1)
    }

    /// Price a trade opened on `bar` would be filled at
    pub fn entry_price_at(&self, bar: &Bar) -> f64 {
        entry_price(bar, self.config.price_view)
    }

    /// Open a long trade on the close of confirmation bar `index`.
    ///
    /// Returns `None` (and opens nothing) when a trade is already live, the
    /// stop would not sit below entry, or no target above entry exists.
    pub fn open(
        &mut self,
        bars: &[Bar],
        index: usize,
        zone: Zone,
        candidates: &[CandidateZone],
        reward_risk: Option<f64>,
    ) -> Option<&OpenTrade> {
        if self.open.is_some() {
            return None;
        }
        let bar = bars.get(index)?;
        let entry = entry_price(bar, self.config.price_view);
        let stop = zone.low - self.config.stop_offset_pips * self.pip_size;

        let risk = entry - stop;
        if risk <= 0.0 {
            debug!(index, entry, stop, "entry rejected: stop not below entry");
            return None;
        }

        let target = match self.config.target {
            TargetPolicy::RiskMultiple { ratio } => entry + risk * ratio,
            TargetPolicy::SecondZone => match candidates.get(1) {
                Some(zone) => zone.resistance,
                None => {
                    debug!(index, "entry rejected: no second zone for target");
                    return None;
                }
            },
        };
        if target <= entry {
            debug!(index, entry, target, "entry rejected: target not above entry");
            return None;
        }

        info!(
            "{} {} opened at {} (index {}): entry={:.5} stop={:.5} target={:.5}",
            self.pair, self.granularity, bar.time, index, entry, stop, target
        );

        self.open = Some(OpenTrade {
            entry_index: index,
            entry_time: bar.time,
            entry_price: entry,
            initial_stop_loss: stop,
            initial_take_profit: target,
            stop_loss: stop,
            take_profit: Some(target),
            stage: TradeStage::Initial,
            trailing_distance: None,
            zone,
            reward_risk,
        });
        self.open.as_ref()
    }

    /// Manage the open trade on bar `index`. The entry bar itself is skipped.
    pub fn update(&mut self, bars: &[Bar], index: usize) -> Option<TradeEvent> {
        let bar = bars.get(index)?;
        let view = self.config.price_view;
        let trade = self.open.as_mut()?;
        if index <= trade.entry_index {
            return None;
        }
        let candle = exit_candle(bar, view);

        if candle.l <= trade.stop_loss {
            let exit = trade.stop_loss;
            return self.close(index, bar.time, exit, CloseReason::Stop);
        }

        let mut event = None;

        if trade.stage == TradeStage::Initial {
            if let Some(r) = self.config.breakeven_at_r {
                let trigger =
                    trade.entry_price + r * (trade.entry_price - trade.initial_stop_loss);
                if candle.h >= trigger && trade.stop_loss < trade.entry_price {
                    trade.stop_loss = trade.entry_price;
                    trade.stage = TradeStage::Breakeven;
                    event = Some(TradeEvent::MovedToBreakeven);
                }
            }
        }

        if let Some(distance) = trade.trailing_distance {
            let candidate = candle.c - distance;
            if candidate > trade.stop_loss {
                trade.stop_loss = candidate;
                return Some(TradeEvent::StopTrailed);
            }
            return event;
        }

        if let Some(target) = trade.take_profit {
            if candle.h >= target {
                let distance = match self.config.trailing {
                    TrailingPolicy::Off => {
                        return self.close(index, bar.time, target, CloseReason::Target);
                    }
                    TrailingPolicy::TargetDistance => target - trade.entry_price,
                    TrailingPolicy::FixedPips { pips } => pips * self.pip_size,
                };
                trade.stage = TradeStage::Trailing;
                trade.take_profit = None;
                trade.trailing_distance = Some(distance);
                trade.stop_loss = trade.stop_loss.max(candle.c - distance);
                debug!(index, stop = trade.stop_loss, distance, "target reached, trailing");
                return Some(TradeEvent::TrailingStarted);
            }
        }

        event
    }

    /// Report a trade still open after the last bar, marked to its close
    pub fn finish(&mut self, bars: &[Bar]) -> Option<TradeRecord> {
        let last = bars.len().checked_sub(1)?;
        let mark = exit_candle(&bars[last], self.config.price_view).c;
        let trade = self.open.take()?;
        Some(self.record(trade, last, None, mark, CloseReason::StillOpen))
    }

    fn close(
        &mut self,
        index: usize,
        time: DateTime<Utc>,
        exit_price: f64,
        reason: CloseReason,
    ) -> Option<TradeEvent> {
        let trade = self.open.take()?;
        let record = self.record(trade, index, Some(time), exit_price, reason);
        info!(
            "{} {} closed at {} (index {}): {} {:+.1} pips",
            self.pair, self.granularity, time, index, reason, record.pips
        );
        Some(TradeEvent::Closed(Box::new(record)))
    }

    fn record(
        &self,
        trade: OpenTrade,
        index: usize,
        exit_time: Option<DateTime<Utc>>,
        exit_price: f64,
        reason: CloseReason,
    ) -> TradeRecord {
        let still_open = reason == CloseReason::StillOpen;
        TradeRecord {
            pair: self.pair.clone(),
            granularity: self.granularity,
            entry_index: trade.entry_index,
            entry_time: trade.entry_time,
            entry_price: trade.entry_price,
            initial_stop_loss: trade.initial_stop_loss,
            initial_take_profit: trade.initial_take_profit,
            stop_loss: trade.stop_loss,
            take_profit: trade.take_profit,
            stage: trade.stage,
            close_reason: reason,
            exit_index: (!still_open).then_some(index),
            exit_time,
            exit_price,
            pips: self.pips(trade.entry_price, exit_price),
            duration_bars: index.saturating_sub(trade.entry_index),
            zone_low: trade.zone.low,
            zone_high: trade.zone.high,
            bottom_index: trade.zone.origin_index,
            reward_risk: trade.reward_risk,
        }
    }
}
