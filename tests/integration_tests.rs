//! Integration tests for the fx-reversal pipeline
//!
//! These tests drive the full engine (trend, setup machine, strength,
//! levels gate, simulator) over synthetic bar series with known outcomes.

use approx::assert_relative_eq;
use chrono::{Duration, TimeZone, Utc};
use indicatif::ProgressBar;

use fx_reversal::backtest::{BacktestJob, BacktestResult, Backtester};
use fx_reversal::instruments::Instrument;
use fx_reversal::reversal::{
    LevelLocator, LevelsConfig, PriceView, ReversalConfig, SetupConfig, SetupStage, StrengthConfig,
    StrengthMethod, TargetPolicy, TradeConfig, TrailingPolicy, TrendConfig,
};
use fx_reversal::{data, Bar, CloseReason, Config, Granularity, Ohlc, Pair, TradeStage};

// =============================================================================
// Test Utilities
// =============================================================================

type Quad = (f64, f64, f64, f64);

/// Steady decline into a bottom at index 80, a move out of the zone, a
/// reentry at 90 and a strong bullish candle at 92.
fn setup_candles() -> Vec<Quad> {
    let mut candles: Vec<Quad> = (0..=80)
        .map(|i| {
            let c = 1.2000 - 0.0010 * i as f64;
            let o = c + 0.0004;
            (o, o + 0.0002, c - 0.0002, c)
        })
        .collect();

    candles.extend(std::iter::repeat((1.1203, 1.1205, 1.1199, 1.1201)).take(4));
    candles.push((1.1208, 1.1214, 1.1207, 1.1212));
    candles.extend(std::iter::repeat((1.1210, 1.1212, 1.1208, 1.1209)).take(4));
    candles.push((1.1208, 1.1209, 1.1203, 1.1206));
    candles.push((1.1205, 1.1207, 1.1202, 1.1204));
    candles.push((1.1204, 1.1226, 1.1202, 1.1224));
    candles
}

/// Setup followed by a steady climb up to index 199
fn rising_after_entry() -> Vec<Quad> {
    let mut candles = setup_candles();
    for k in 1..=107 {
        let c = 1.1224 + 0.0002 * k as f64;
        candles.push((c - 0.0001, c + 0.00015, c - 0.0003, c));
    }
    candles
}

/// Setup followed by a steady decline up to index 149
fn falling_after_entry() -> Vec<Quad> {
    let mut candles = setup_candles();
    for k in 1..=57 {
        let c = 1.1224 - 0.0002 * k as f64;
        candles.push((c + 0.0001, c + 0.0002, c - 0.0002, c));
    }
    candles
}

/// Same setup as `setup_candles`, but the first 49 bars swing between two
/// ranges so the history before the confirmation holds repeated pivot lows
/// and highs above the entry: 1.1600-1.1700 first, then 1.1300-1.1500.
fn swing_setup_candles() -> Vec<Quad> {
    let leg = |p: usize| (if p <= 4 { p } else { 8 - p }) as f64;
    let mut candles: Vec<Quad> = Vec::new();
    let mut prev: Option<f64> = None;
    for i in 0..49 {
        let c = if i < 24 {
            1.1600 + 0.0025 * leg(i % 8)
        } else {
            1.1300 + 0.0050 * leg((i - 24) % 8)
        };
        let o = prev.unwrap_or(c);
        candles.push((o, o.max(c) + 0.0002, o.min(c) - 0.0002, c));
        prev = Some(c);
    }
    candles.extend_from_slice(&setup_candles()[49..]);

    for k in 1..=107 {
        let c = 1.1224 + 0.0002 * k as f64;
        candles.push((c - 0.0001, c + 0.00015, c - 0.0003, c));
    }
    candles
}

fn swing_levels(min_reward_risk: f64) -> LevelsConfig {
    LevelsConfig {
        window: 3,
        clustering_pips: 50.0,
        num_zones: 3,
        min_width_pips: 15.0,
        min_gap_pips: 0.0,
        min_reward_risk,
    }
}

/// Bid/ask one pip either side of every mid price
fn with_spread(bars: Vec<Bar>) -> Vec<Bar> {
    let shift = |o: Ohlc, d: f64| Ohlc::new(o.o + d, o.h + d, o.l + d, o.c + d);
    bars.into_iter()
        .map(|b| {
            let mid = b.mid;
            b.with_bid_ask(shift(mid, -0.0001), shift(mid, 0.0001))
        })
        .collect()
}

fn to_bars(candles: &[Quad], scale: f64) -> Vec<Bar> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    candles
        .iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| {
            Bar::new(
                t0 + Duration::hours(i as i64),
                Ohlc::new(o * scale, h * scale, l * scale, c * scale),
                1000.0,
            )
            .unwrap()
        })
        .collect()
}

fn fixture_config() -> ReversalConfig {
    ReversalConfig {
        trend: TrendConfig {
            windows: vec![10, 50],
        },
        setup: SetupConfig {
            bottom_lookback: 60,
            invalidation_pips: 50.0,
            max_reentry_spacing: 15,
        },
        strength: StrengthConfig {
            method: StrengthMethod::Contextual,
            lookback: 20,
            body_ratio: 0.7,
            threshold: 0.7,
            range_multiplier: 1.5,
            close_proximity: 0.2,
        },
        levels: None,
        trade: TradeConfig {
            stop_offset_pips: 5.0,
            target: TargetPolicy::RiskMultiple { ratio: 2.0 },
            trailing: TrailingPolicy::Off,
            breakeven_at_r: None,
            price_view: PriceView::Mid,
        },
    }
}

fn run(config: ReversalConfig, pair: &str, bars: &[Bar]) -> BacktestResult {
    let pair = Pair::new(pair);
    let instrument = Instrument::fallback_for(&pair);
    Backtester::new(config)
        .unwrap()
        .run(&pair, Granularity::H1, &instrument, bars)
        .unwrap()
}

/// Deterministic oscillating decline with periodic recoveries
fn wavy_bars(count: usize) -> Vec<Bar> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let x = i as f64;
            let c = 1.1500 - 0.00015 * x + 0.0040 * (x / 9.0).sin() + 0.0015 * (x / 2.3).cos();
            let o = c - 0.0006 * (x / 1.7).sin();
            let h = o.max(c) + 0.0003 + 0.0002 * (x / 3.1).cos().abs();
            let l = o.min(c) - 0.0003 - 0.0002 * (x / 4.3).sin().abs();
            Bar::new(t0 + Duration::hours(i as i64), Ohlc::new(o, h, l, c), 500.0).unwrap()
        })
        .collect()
}

// =============================================================================
// End-to-end Scenarios
// =============================================================================

#[test]
fn test_reversal_hits_target() {
    let bars = to_bars(&rising_after_entry(), 1.0);
    let result = run(fixture_config(), "EUR_USD", &bars);

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry_index, 92);
    assert_eq!(trade.bottom_index, 80);
    assert_relative_eq!(trade.entry_price, 1.1224, epsilon = 1e-9);
    assert_relative_eq!(trade.initial_stop_loss, 1.1193, epsilon = 1e-9);
    assert_relative_eq!(trade.initial_take_profit, 1.1286, epsilon = 1e-9);
    assert_relative_eq!(trade.zone_low, 1.1198, epsilon = 1e-9);
    assert_relative_eq!(trade.zone_high, 1.1206, epsilon = 1e-9);
    assert_eq!(trade.close_reason, CloseReason::Target);
    assert_eq!(trade.exit_index, Some(123));
    assert_eq!(trade.duration_bars, 31);
    assert_eq!(trade.pips, 62.0);

    assert_eq!(result.metrics.total_trades, 1);
    assert_eq!(result.metrics.winning_trades, 1);
    assert_relative_eq!(result.metrics.total_pips, 62.0);
    assert_relative_eq!(result.metrics.win_rate, 100.0);
}

#[test]
fn test_reversal_stopped_out() {
    let bars = to_bars(&falling_after_entry(), 1.0);
    let result = run(fixture_config(), "EUR_USD", &bars);

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry_index, 92);
    assert_eq!(trade.close_reason, CloseReason::Stop);
    assert_eq!(trade.exit_index, Some(107));
    assert_relative_eq!(trade.exit_price, 1.1193, epsilon = 1e-9);
    assert_eq!(trade.pips, -31.0);

    assert_eq!(result.metrics.losing_trades, 1);
    assert_relative_eq!(result.metrics.largest_loss, -31.0);
    assert_eq!(result.metrics.profit_factor, 0.0);
}

#[test]
fn test_jpy_pair_uses_two_decimal_pips() {
    let bars = to_bars(&rising_after_entry(), 100.0);
    let result = run(fixture_config(), "USD_JPY", &bars);

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_relative_eq!(trade.entry_price, 112.24, epsilon = 1e-7);
    assert_relative_eq!(trade.initial_stop_loss, 111.93, epsilon = 1e-7);
    assert_eq!(trade.close_reason, CloseReason::Target);
    assert_eq!(trade.pips, 62.0);
}

#[test]
fn test_jpy_pair_stopped_out() {
    let bars = to_bars(&falling_after_entry(), 100.0);
    let result = run(fixture_config(), "USD_JPY", &bars);

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.close_reason, CloseReason::Stop);
    assert_relative_eq!(trade.exit_price, 111.93, epsilon = 1e-7);
    assert_eq!(trade.pips, -31.0);
}

#[test]
fn test_trailing_trade_still_open_at_end() {
    let mut config = fixture_config();
    config.trade.trailing = TrailingPolicy::TargetDistance;

    let bars = to_bars(&rising_after_entry(), 1.0);
    let result = run(config, "EUR_USD", &bars);

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.close_reason, CloseReason::StillOpen);
    assert_eq!(trade.stage, TradeStage::Trailing);
    assert_eq!(trade.exit_index, None);
    assert_eq!(trade.take_profit, None);
    assert_relative_eq!(trade.exit_price, 1.1438, epsilon = 1e-9);
    assert_eq!(trade.pips, 214.0);

    assert_eq!(result.metrics.open_trades, 1);
    assert_eq!(result.metrics.closed_trades, 0);

    // The stop only ever ratchets up while the trade is live
    let stops: Vec<f64> = result.rows.iter().filter_map(|r| r.stop_loss).collect();
    assert_eq!(stops.len(), 200 - 92);
    assert!(stops.windows(2).all(|w| w[1] >= w[0]));
    assert!(stops.last().unwrap() > &trade.initial_stop_loss);
}

#[test]
fn test_rows_trace_setup_stages() {
    let bars = to_bars(&rising_after_entry(), 1.0);
    let result = run(fixture_config(), "EUR_USD", &bars);

    // One row per bar once the 50-bar average is populated
    assert_eq!(result.rows.len(), 200 - 49);
    assert_eq!(result.rows[0].index, 49);

    let row = |i: usize| &result.rows[i - 49];
    assert_eq!(row(80).setup_event, Some("bottom"));
    assert_eq!(row(84).setup, SetupStage::Bottom);
    assert_eq!(row(85).setup_event, Some("exited"));
    assert_eq!(row(90).setup_event, Some("reentry"));
    assert_eq!(row(92).setup_event, Some("confirmed"));
    assert_eq!(row(92).trade_event, Some("opened"));
    assert_eq!(row(92).strength, 1.0);
    assert_eq!(row(123).trade_event, Some("closed_target"));
    assert_eq!(row(150).setup, SetupStage::Confirmation);

    for r in &result.rows {
        if let (Some(low), Some(high)) = (r.zone_low, r.zone_high) {
            assert!(low < high, "zone at {} is inverted", r.index);
        }
    }
}

#[test]
fn test_rising_market_never_trades() {
    let candles: Vec<Quad> = (0..300)
        .map(|i| {
            let c = 1.0500 + 0.0005 * i as f64;
            (c - 0.0003, c + 0.0002, c - 0.0005, c)
        })
        .collect();
    let result = run(fixture_config(), "EUR_USD", &to_bars(&candles, 1.0));

    assert!(result.trades.is_empty());
    assert!(result.rows.iter().all(|r| !r.in_downtrend));
    assert!(result.rows.iter().all(|r| r.setup == SetupStage::Idle));
}

#[test]
fn test_level_gate_opens_at_second_zone_target() {
    let bars = to_bars(&swing_setup_candles(), 1.0);
    let zones = LevelLocator::new(swing_levels(1.0), 0.0001).zones_at(&bars, 92);
    assert!(zones.len() >= 2, "fixture must yield two zones: {:?}", zones);
    assert_relative_eq!(zones[0].support, 1.1298, epsilon = 1e-9);
    assert_relative_eq!(zones[1].resistance, 1.1702, epsilon = 1e-9);
    let rr = (zones[1].resistance - 1.1224) / (1.1224 - 1.1202);

    let mut config = fixture_config();
    config.levels = Some(swing_levels(1.0));
    config.trade.target = TargetPolicy::SecondZone;
    let result = run(config, "EUR_USD", &bars);

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_eq!(trade.entry_index, 92);
    assert_relative_eq!(trade.initial_take_profit, zones[1].resistance, epsilon = 1e-12);
    assert_relative_eq!(trade.reward_risk.unwrap(), rr, epsilon = 1e-9);
    assert_eq!(trade.close_reason, CloseReason::StillOpen);
}

#[test]
fn test_level_gate_blocks_just_below_minimum() {
    let bars = to_bars(&swing_setup_candles(), 1.0);
    let zones = LevelLocator::new(swing_levels(1.0), 0.0001).zones_at(&bars, 92);
    assert!(zones.len() >= 2);
    let rr = (zones[1].resistance - 1.1224) / (1.1224 - 1.1202);

    let mut config = fixture_config();
    config.levels = Some(swing_levels(rr * 1.01));
    let result = run(config, "EUR_USD", &bars);

    assert!(result.trades.is_empty());
    assert_eq!(result.rows[92 - 49].setup_event, Some("confirmed"));
    assert_eq!(result.rows[92 - 49].trade_event, None);

    let mut config = fixture_config();
    config.levels = Some(swing_levels(rr * 0.99));
    assert_eq!(run(config, "EUR_USD", &bars).trades.len(), 1);
}

#[test]
fn test_level_gate_measures_from_ask_entry() {
    let bars = with_spread(to_bars(&swing_setup_candles(), 1.0));
    let zones = LevelLocator::new(swing_levels(1.0), 0.0001).zones_at(&bars, 92);
    assert!(zones.len() >= 2);
    let ask_rr = (zones[1].resistance - 1.1225) / (1.1225 - 1.1202);
    let mid_rr = (zones[1].resistance - 1.1224) / (1.1224 - 1.1202);

    let mut config = fixture_config();
    config.trade.price_view = PriceView::BidAsk;
    config.levels = Some(swing_levels(1.0));
    let result = run(config.clone(), "EUR_USD", &bars);

    assert_eq!(result.trades.len(), 1);
    let trade = &result.trades[0];
    assert_relative_eq!(trade.entry_price, 1.1225, epsilon = 1e-9);
    assert_relative_eq!(trade.reward_risk.unwrap(), ask_rr, epsilon = 1e-9);

    // A minimum between the ask and mid ratios must block the trade
    config.levels = Some(swing_levels((ask_rr + mid_rr) / 2.0));
    assert!(run(config, "EUR_USD", &bars).trades.is_empty());
}

#[test]
fn test_level_gate_blocks_without_zones() {
    let mut config = fixture_config();
    config.levels = Some(LevelsConfig {
        min_reward_risk: 1000.0,
        ..LevelsConfig::default()
    });

    let bars = to_bars(&rising_after_entry(), 1.0);
    let result = run(config, "EUR_USD", &bars);

    assert!(result.trades.is_empty());
    assert_eq!(result.rows[92 - 49].setup_event, Some("confirmed"));
    assert_eq!(result.rows[92 - 49].trade_event, None);
}

#[test]
fn test_insufficient_history_is_an_error() {
    let bars = to_bars(&setup_candles()[..40], 1.0);
    let pair = Pair::new("EUR_USD");
    let err = Backtester::new(fixture_config())
        .unwrap()
        .run(&pair, Granularity::H1, &Instrument::fallback_for(&pair), &bars)
        .unwrap_err();
    assert!(err.to_string().contains("insufficient history"));
}

// =============================================================================
// Properties
// =============================================================================

#[test]
fn test_runs_are_deterministic() {
    let bars = wavy_bars(600);
    let first = run(fixture_config(), "EUR_USD", &bars);
    let second = run(fixture_config(), "EUR_USD", &bars);

    assert_eq!(
        serde_json::to_string(&first.trades).unwrap(),
        serde_json::to_string(&second.trades).unwrap()
    );
    assert_eq!(first.rows, second.rows);
}

#[test]
fn test_at_most_one_trade_open() {
    let mut config = fixture_config();
    config.trade.target = TargetPolicy::RiskMultiple { ratio: 0.5 };
    let result = run(config, "EUR_USD", &wavy_bars(1500));

    for pair in result.trades.windows(2) {
        let exit = pair[0].exit_index.expect("only the last trade may be open");
        assert!(pair[1].entry_index > exit);
    }
    for trade in &result.trades {
        assert!(trade.initial_stop_loss < trade.entry_price);
        assert!(trade.initial_take_profit > trade.entry_price);
        assert!(trade.zone_low < trade.zone_high);
    }
}

#[test]
fn test_parallel_and_sequential_jobs_agree() {
    let jobs = vec![
        BacktestJob {
            pair: Pair::new("EUR_USD"),
            granularity: Granularity::H1,
            instrument: Instrument::fallback_for(&Pair::new("EUR_USD")),
            bars: to_bars(&rising_after_entry(), 1.0),
        },
        BacktestJob {
            pair: Pair::new("USD_JPY"),
            granularity: Granularity::H1,
            instrument: Instrument::fallback_for(&Pair::new("USD_JPY")),
            bars: to_bars(&falling_after_entry(), 100.0),
        },
        BacktestJob {
            pair: Pair::new("GBP_USD"),
            granularity: Granularity::H1,
            instrument: Instrument::fallback_for(&Pair::new("GBP_USD")),
            bars: to_bars(&setup_candles()[..20], 1.0),
        },
    ];

    let backtester = Backtester::new(fixture_config()).unwrap();
    let parallel = backtester.run_jobs(&jobs, false, &ProgressBar::hidden());
    let sequential = backtester.run_jobs(&jobs, true, &ProgressBar::hidden());

    assert_eq!(parallel.len(), 3);
    for (p, s) in parallel.iter().zip(&sequential) {
        assert_eq!(p.pair, s.pair);
        match (&p.result, &s.result) {
            (Ok(a), Ok(b)) => assert_eq!(a.trades, b.trades),
            (Err(a), Err(b)) => assert_eq!(a, b),
            _ => panic!("parallel and sequential outcomes differ for {}", p.pair),
        }
    }

    let jpy = parallel[1].result.as_ref().unwrap();
    assert_eq!(jpy.trades[0].pips, -31.0);
    assert!(parallel[2].result.is_err());
}

// =============================================================================
// Files and Configuration
// =============================================================================

#[test]
fn test_results_export_to_csv() {
    let dir = tempfile::tempdir().unwrap();
    let bars = to_bars(&rising_after_entry(), 1.0);
    let result = run(fixture_config(), "EUR_USD", &bars);

    let trades_path = data::save_records(dir.path().join("EUR_USD_H1_trades.csv"), &result.trades)
        .unwrap();
    let rows_path =
        data::save_records(dir.path().join("EUR_USD_H1_analyzed.csv"), &result.rows).unwrap();

    let trades_csv = std::fs::read_to_string(trades_path).unwrap();
    assert!(trades_csv.starts_with("pair,granularity,entry_index"));
    assert!(trades_csv.contains("EUR_USD,H1,92"));
    assert!(trades_csv.contains(",target,"));

    let rows_csv = std::fs::read_to_string(rows_path).unwrap();
    assert_eq!(rows_csv.lines().count(), 1 + result.rows.len());
    assert!(rows_csv.contains("confirmed,opened"));
}

#[test]
fn test_bar_files_feed_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let pair = Pair::new("EUR_USD");
    let path = data::bar_file(dir.path(), &pair, Granularity::H1);

    data::save_bars(&path, &to_bars(&rising_after_entry(), 1.0)).unwrap();
    let loaded = data::load_bars(&path).unwrap();
    let result = run(fixture_config(), "EUR_USD", &loaded);

    assert_eq!(result.trades.len(), 1);
    assert_eq!(result.trades[0].pips, 62.0);
}

#[test]
fn test_shipped_configs_load() {
    let root = env!("CARGO_MANIFEST_DIR");

    let h1 = Config::from_file(format!("{}/configs/reversal_h1.json", root)).unwrap();
    assert_eq!(h1.strategy.trend.windows, vec![10, 150]);
    assert!(h1.strategy.levels.is_none());
    assert!(Backtester::new(h1.strategy).is_ok());

    let h4 = Config::from_file(format!("{}/configs/reversal_h4_levels.json", root)).unwrap();
    assert_eq!(h4.backtest.granularities, vec![Granularity::H4]);
    assert_eq!(h4.strategy.trade.target, TargetPolicy::SecondZone);
    assert_eq!(h4.strategy.trade.price_view, PriceView::BidAsk);
    assert!(h4.strategy.levels.is_some());
}
