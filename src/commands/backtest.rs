//! Backtest command implementation

use anyhow::{Context, Result};
use fx_reversal::backtest::{BacktestJob, Backtester};
use fx_reversal::instruments::InstrumentCollection;
use fx_reversal::{data, Config, Granularity};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use tracing::{debug, info, warn};

pub fn run(
    config_path: String,
    pairs_override: Option<String>,
    granularities_override: Option<String>,
    from_override: Option<String>,
    to_override: Option<String>,
    sequential: bool,
    no_save: bool,
) -> Result<()> {
    info!("Starting backtest");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(pairs) = pairs_override {
        info!("Overriding pairs to: {}", pairs);
        config.backtest.pairs = pairs.split(',').map(|s| s.trim().to_string()).collect();
    }

    if let Some(granularities) = granularities_override {
        info!("Overriding granularities to: {}", granularities);
        config.backtest.granularities = granularities
            .split(',')
            .map(|s| s.trim().parse::<Granularity>())
            .collect::<Result<Vec<_>>>()?;
    }

    if let Some(from) = from_override {
        info!("Overriding start date to: {}", from);
        config.backtest.from = Some(from);
    }

    if let Some(to) = to_override {
        info!("Overriding end date to: {}", to);
        config.backtest.to = Some(to);
    }

    let (start, end) = config.backtest.date_range()?;
    let instruments = InstrumentCollection::load_or_default(&config.backtest.instruments_file)?;

    // Load data
    info!("Loading data from: {}", config.backtest.data_dir);
    let mut jobs = Vec::new();
    for pair in config.backtest.pairs() {
        for &granularity in &config.backtest.granularities {
            let path = data::bar_file(&config.backtest.data_dir, &pair, granularity);
            if !path.exists() {
                warn!("No data file {} (run `download` first)", path.display());
                continue;
            }

            let bars = data::filter_bars_by_date(data::load_bars(&path)?, start, end);
            debug!("{} {}: {} bars after date filter", pair, granularity, bars.len());

            jobs.push(BacktestJob {
                instrument: instruments.resolve(&pair),
                pair: pair.clone(),
                granularity,
                bars,
            });
        }
    }

    if jobs.is_empty() {
        anyhow::bail!("No bar data found in {}", config.backtest.data_dir);
    }

    let backtester = Backtester::new(config.strategy.clone()).context("Invalid strategy section")?;

    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("⚡ {percent:>3}%|{bar:40}| {pos}/{len} [{elapsed}<{eta}, {per_sec}] ✓ {msg}")?
            .progress_chars("█░ "),
    );
    pb.set_message("backtesting...");
    pb.tick();

    let outcomes = backtester.run_jobs(&jobs, sequential, &pb);
    pb.finish_with_message("done");

    println!("\n{}", "=".repeat(100));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(100));
    println!(
        "{:<10} {:<5} {:>7} {:>6} {:>7} {:>5} {:>8} {:>11} {:>10} {:>10} {:>8}",
        "Pair", "Gran", "Trades", "Wins", "Losses", "Open", "Win%", "Total pips", "Best", "Worst", "PF"
    );
    println!("{}", "-".repeat(100));

    let results_dir = Path::new(&config.backtest.results_dir);
    let mut failures = 0;

    for outcome in &outcomes {
        let result = match &outcome.result {
            Ok(result) => result,
            Err(e) => {
                failures += 1;
                warn!("{} {} failed: {}", outcome.pair, outcome.granularity, e);
                println!("{:<10} {:<5} error: {}", outcome.pair, outcome.granularity, e);
                continue;
            }
        };

        let m = &result.metrics;
        println!(
            "{:<10} {:<5} {:>7} {:>6} {:>7} {:>5} {:>7.2}% {:>11.1} {:>10.1} {:>10.1} {:>8.2}",
            result.pair,
            result.granularity,
            m.total_trades,
            m.winning_trades,
            m.losing_trades,
            m.open_trades,
            m.win_rate,
            m.total_pips,
            m.largest_win,
            m.largest_loss,
            m.profit_factor
        );

        if !no_save {
            let stem = format!("{}_{}", result.pair, result.granularity);
            data::save_records(results_dir.join(format!("{}_trades.csv", stem)), &result.trades)?;
            data::save_records(results_dir.join(format!("{}_analyzed.csv", stem)), &result.rows)?;
        }
    }

    println!("{}", "=".repeat(100));
    if !no_save {
        println!("Trade logs written to {}", results_dir.display());
    }

    info!(
        "Backtest completed: {} series, {} failed",
        outcomes.len(),
        failures
    );

    Ok(())
}
