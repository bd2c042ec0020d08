//! Backtesting engine
//!
//! One forward fold per (pair, granularity): trend labels are computed up
//! front, then every usable bar manages the open trade, advances the setup
//! machine and, on a confirmation, tries to open a trade. Independent
//! series are fanned out on the rayon pool.

use chrono::{DateTime, Utc};
use indicatif::ProgressBar;
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::{debug, info};

use crate::error::{EngineError, EngineResult};
use crate::instruments::Instrument;
use crate::reversal::levels::{self, LevelLocator};
use crate::reversal::{
    ReversalConfig, SetupEvent, SetupStage, SetupTracker, StrengthEvaluator, TradeEvent,
    TradeSimulator, TrendClassifier, Zone,
};
use crate::{Bar, Granularity, Pair, PipMetrics, TradeRecord};

/// Per-bar analysis output, appended once per usable bar
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRow {
    pub index: usize,
    pub time: DateTime<Utc>,
    pub close: f64,
    pub in_downtrend: bool,
    pub strength: f64,
    pub setup: SetupStage,
    pub zone_low: Option<f64>,
    pub zone_high: Option<f64>,
    pub setup_event: Option<&'static str>,
    pub trade_event: Option<&'static str>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestResult {
    pub pair: Pair,
    pub granularity: Granularity,
    pub trades: Vec<TradeRecord>,
    pub rows: Vec<AnalysisRow>,
    pub metrics: PipMetrics,
}

/// One independent series to backtest
#[derive(Debug, Clone)]
pub struct BacktestJob {
    pub pair: Pair,
    pub granularity: Granularity,
    pub instrument: Instrument,
    pub bars: Vec<Bar>,
}

#[derive(Debug)]
pub struct JobOutcome {
    pub pair: Pair,
    pub granularity: Granularity,
    pub result: EngineResult<BacktestResult>,
}

/// Backtest engine
pub struct Backtester {
    config: ReversalConfig,
}

impl Backtester {
    pub fn new(config: ReversalConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Backtester { config })
    }

    pub fn config(&self) -> &ReversalConfig {
        &self.config
    }

    /// Run the full pipeline over one ordered bar sequence
    pub fn run(
        &self,
        pair: &Pair,
        granularity: Granularity,
        instrument: &Instrument,
        bars: &[Bar],
    ) -> EngineResult<BacktestResult> {
        check_ordering(bars)?;

        let labels = TrendClassifier::new(&self.config.trend.windows)?.classify(bars)?;
        let pip_size = instrument.pip_size();

        let mut tracker =
            SetupTracker::new(&self.config.setup, self.config.strength.threshold, pip_size);
        let mut strength = StrengthEvaluator::new(self.config.strength.clone(), bars.len());
        let locator = self
            .config
            .levels
            .clone()
            .map(|levels| LevelLocator::new(levels, pip_size));
        let mut simulator = TradeSimulator::new(
            self.config.trade.clone(),
            pip_size,
            pair.clone(),
            granularity,
        );

        info!(
            "{} {}: scanning {} bars from index {} (pip size {})",
            pair,
            granularity,
            bars.len(),
            labels.first_usable(),
            pip_size
        );

        let mut trades = Vec::new();
        let mut rows = Vec::with_capacity(labels.len());

        for (index, bar) in bars.iter().enumerate().skip(labels.first_usable()) {
            let in_downtrend = labels.get(index).unwrap_or(false);
            let score = strength.score(bars, index);

            // Exits first: a trade closed on this bar blocks a same-bar reentry
            let trade_event = simulator.update(bars, index);
            let closed_this_bar = matches!(trade_event, Some(TradeEvent::Closed(_)));
            let mut trade_label = trade_event.as_ref().map(TradeEvent::label);
            if let Some(TradeEvent::Closed(record)) = trade_event {
                trades.push(*record);
            }

            let setup_event = tracker.step(bars, index, in_downtrend, score);
            if let Some(SetupEvent::Confirmed { zone, .. }) = setup_event {
                if simulator.is_open() || closed_this_bar {
                    debug!(index, "confirmation ignored: trade live or closed on this bar");
                } else if self.try_open(&mut simulator, locator.as_ref(), bars, index, zone) {
                    trade_label = Some("opened");
                }
            }

            let state = tracker.state();
            let open = simulator.open_trade();
            rows.push(AnalysisRow {
                index,
                time: bar.time,
                close: bar.mid.c,
                in_downtrend,
                strength: score,
                setup: state.stage(),
                zone_low: state.zone().map(|z| z.low),
                zone_high: state.zone().map(|z| z.high),
                setup_event: setup_event.as_ref().map(SetupEvent::label),
                trade_event: trade_label,
                stop_loss: open.map(|t| t.stop_loss),
                take_profit: open.and_then(|t| t.take_profit),
            });
        }

        if let Some(record) = simulator.finish(bars) {
            trades.push(record);
        }

        let metrics = calculate_metrics(&trades);
        info!(
            "{} {}: {} trades, {:+.1} pips",
            pair, granularity, metrics.total_trades, metrics.total_pips
        );

        Ok(BacktestResult {
            pair: pair.clone(),
            granularity,
            trades,
            rows,
            metrics,
        })
    }

    /// Apply the optional level gate, then hand the confirmation to the simulator
    fn try_open(
        &self,
        simulator: &mut TradeSimulator,
        locator: Option<&LevelLocator>,
        bars: &[Bar],
        index: usize,
        zone: Zone,
    ) -> bool {
        let (zones, reward_risk) = match locator {
            None => (Vec::new(), None),
            Some(locator) => {
                let zones = locator.zones_at(bars, index);
                let bar = &bars[index];
                let entry = simulator.entry_price_at(bar);
                match levels::reward_risk(&zones, entry, bar.mid.l) {
                    Some(rr) if rr >= locator.min_reward_risk() => (zones, Some(rr)),
                    rr => {
                        debug!(index, zones = zones.len(), ?rr, "confirmation gated out");
                        return false;
                    }
                }
            }
        };

        simulator
            .open(bars, index, zone, &zones, reward_risk)
            .is_some()
    }

    /// Run independent jobs, in parallel unless `sequential`
    pub fn run_jobs(
        &self,
        jobs: &[BacktestJob],
        sequential: bool,
        progress_bar: &ProgressBar,
    ) -> Vec<JobOutcome> {
        info!("Backtesting {} series", jobs.len());

        let run_one = |job: &BacktestJob| {
            let result = self.run(&job.pair, job.granularity, &job.instrument, &job.bars);
            progress_bar.inc(1);
            JobOutcome {
                pair: job.pair.clone(),
                granularity: job.granularity,
                result,
            }
        };

        if sequential {
            jobs.iter().map(run_one).collect()
        } else {
            jobs.par_iter().map(run_one).collect()
        }
    }
}

/// Timestamps must be strictly increasing
fn check_ordering(bars: &[Bar]) -> EngineResult<()> {
    match bars
        .iter()
        .tuple_windows()
        .position(|(prev, next)| next.time <= prev.time)
    {
        Some(i) => Err(EngineError::UnorderedBars { index: i + 1 }),
        None => Ok(()),
    }
}

/// Pip statistics over closed trades; still-open trades are only counted
pub fn calculate_metrics(trades: &[TradeRecord]) -> PipMetrics {
    if trades.is_empty() {
        return PipMetrics::default();
    }

    let closed: Vec<&TradeRecord> = trades.iter().filter(|t| t.is_closed()).collect();
    let winning_trades: Vec<&TradeRecord> =
        closed.iter().copied().filter(|t| t.pips > 0.0).collect();
    let losing_trades: Vec<&TradeRecord> =
        closed.iter().copied().filter(|t| t.pips <= 0.0).collect();

    let win_rate = if !closed.is_empty() {
        (winning_trades.len() as f64 / closed.len() as f64) * 100.0
    } else {
        0.0
    };

    let gross_profits: f64 = winning_trades.iter().map(|t| t.pips).sum();
    let gross_losses: f64 = losing_trades.iter().map(|t| t.pips.abs()).sum();

    let profit_factor = if gross_losses > 0.0 {
        gross_profits / gross_losses
    } else if gross_profits > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let avg_win = if !winning_trades.is_empty() {
        gross_profits / winning_trades.len() as f64
    } else {
        0.0
    };

    let avg_loss = if !losing_trades.is_empty() {
        gross_losses / losing_trades.len() as f64
    } else {
        0.0
    };

    let largest_win = winning_trades.iter().map(|t| t.pips).fold(0.0, f64::max);
    let largest_loss = losing_trades.iter().map(|t| t.pips).fold(0.0, f64::min);

    let avg_duration_bars = if !closed.is_empty() {
        closed.iter().map(|t| t.duration_bars as f64).mean()
    } else {
        0.0
    };

    PipMetrics {
        total_trades: trades.len(),
        closed_trades: closed.len(),
        open_trades: trades.len() - closed.len(),
        winning_trades: winning_trades.len(),
        losing_trades: losing_trades.len(),
        win_rate,
        total_pips: closed.iter().map(|t| t.pips).sum(),
        avg_win,
        avg_loss,
        largest_win,
        largest_loss,
        profit_factor,
        avg_duration_bars,
    }
}
