//! Download command - fetch historical candles from OANDA

use anyhow::Result;
use chrono::{Duration, Utc};
use fx_reversal::oanda::OandaClient;
use fx_reversal::{data, Config};
use tracing::{info, warn};

/// Lookback used when neither the CLI nor the config gives a start date
const DEFAULT_HISTORY_DAYS: i64 = 365;

pub fn run(config_path: String, from: Option<String>, to: Option<String>) -> Result<()> {
    info!("Starting data download from OANDA");

    let mut config = Config::from_file(&config_path)?;
    if from.is_some() {
        config.backtest.from = from;
    }
    if to.is_some() {
        config.backtest.to = to;
    }

    let (start, end) = config.backtest.date_range()?;
    let end = end.unwrap_or_else(Utc::now);
    let start = start.unwrap_or(end - Duration::days(DEFAULT_HISTORY_DAYS));
    if start >= end {
        anyhow::bail!("Start date {} is not before end date {}", start, end);
    }

    let client = OandaClient::new(&config.oanda)?;
    let pairs = config.backtest.pairs();

    println!("\n{}", "=".repeat(60));
    println!("DOWNLOADING HISTORICAL CANDLES FROM OANDA");
    println!("{}", "=".repeat(60));
    println!("  Pairs:         {:?}", config.backtest.pairs);
    println!("  Granularities: {:?}", config.backtest.granularities);
    println!("  From:          {}", start);
    println!("  To:            {}", end);
    println!("  Output:        {}", config.backtest.data_dir);
    println!("{}\n", "=".repeat(60));

    let mut total_candles = 0;
    let mut success_count = 0;
    let mut total_downloads = 0;
    let mut incomplete = Vec::new();

    for pair in &pairs {
        println!("\n{}:", pair);

        for &granularity in &config.backtest.granularities {
            total_downloads += 1;
            print!("  Downloading {} {}... ", pair, granularity);

            let saved = client
                .collect_candles(pair, granularity, start, end)
                .and_then(|series| {
                    let path = data::bar_file(&config.backtest.data_dir, pair, granularity);
                    data::save_bars(path, &series.bars).map(|_| series)
                });

            match saved {
                Ok(series) => {
                    total_candles += series.bars.len();
                    success_count += 1;
                    if series.is_complete() {
                        println!("✓ {} candles", series.bars.len());
                    } else {
                        println!(
                            "⚠ {} candles, {} page(s) failed",
                            series.bars.len(),
                            series.failed_pages.len()
                        );
                        for (page_start, page_end) in &series.failed_pages {
                            warn!("{} {} missing {} -> {}", pair, granularity, page_start, page_end);
                        }
                        incomplete.push((format!("{} {}", pair, granularity), series.failed_pages));
                    }
                }
                Err(e) => {
                    warn!("{} {} download failed: {:#}", pair, granularity, e);
                    println!("✗ Error: {}", e);
                }
            }
        }
    }

    println!("\n{}", "=".repeat(60));
    println!("DOWNLOAD COMPLETE");
    println!("{}", "=".repeat(60));
    println!("  Successful: {}/{}", success_count, total_downloads);
    println!("  Total candles: {}", total_candles);
    if !incomplete.is_empty() {
        println!("  Incomplete series (gaps from failed pages):");
        for (name, pages) in &incomplete {
            println!("    {}: {} page(s)", name, pages.len());
            for (page_start, page_end) in pages {
                println!("      {} -> {}", page_start, page_end);
            }
        }
    }
    println!("{}", "=".repeat(60));

    Ok(())
}
