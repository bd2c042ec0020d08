//! FX bottom-reversal backtester - main entry point
//!
//! This binary provides three subcommands:
//! - backtest: Run the reversal pipeline over cached candles
//! - download: Download historical candles from OANDA
//! - instruments: Refresh the cached instrument metadata

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::{info, Subscriber};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "fx-reversal")]
#[command(about = "FX bottom-reversal backtester with OANDA data download", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the reversal backtest
    Backtest {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/reversal_h1.json")]
        config: String,

        /// Pairs to test (comma-separated, overrides config). E.g., "EUR_USD,USD_JPY"
        #[arg(short, long)]
        pairs: Option<String>,

        /// Granularities to test (comma-separated, overrides config). E.g., "H1,H4"
        #[arg(short, long)]
        granularities: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<String>,

        /// Run sequentially instead of parallel
        #[arg(long)]
        sequential: bool,

        /// Print results without writing trade logs
        #[arg(long)]
        no_save: bool,
    },

    /// Download historical candles from OANDA
    Download {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/reversal_h1.json")]
        config: String,

        /// Start date (YYYY-MM-DD, overrides config)
        #[arg(long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD, overrides config; defaults to now)
        #[arg(long)]
        to: Option<String>,
    },

    /// Fetch instrument metadata for the configured account
    Instruments {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/reversal_h1.json")]
        config: String,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    let log_dir = Path::new("logs");
    std::fs::create_dir_all(log_dir)?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );

    let subscriber = build_subscriber(verbose, log_dir, &log_filename, file_only);
    tracing::subscriber::set_global_default(subscriber)?;

    if !file_only {
        info!("Logging initialized");
        info!("Log file: {}", log_dir.join(&log_filename).display());
    }

    Ok(())
}

/// Console + file layers, or file only to keep the console clean for a progress bar
fn build_subscriber(
    verbose: bool,
    log_dir: &Path,
    log_filename: &str,
    file_only: bool,
) -> Box<dyn Subscriber + Send + Sync> {
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let file_appender = tracing_appender::rolling::never(log_dir, log_filename);

    if file_only {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        Box::new(
            tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer),
        )
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        // Same format without ANSI colors
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        Box::new(
            tracing_subscriber::registry()
                .with(env_filter)
                .with(console_layer)
                .with(file_layer),
        )
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Backtest { .. } => ("backtest", true),
        Commands::Download { .. } => ("download", false),
        Commands::Instruments { .. } => ("instruments", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Backtest {
            config,
            pairs,
            granularities,
            from,
            to,
            sequential,
            no_save,
        } => commands::backtest::run(config, pairs, granularities, from, to, sequential, no_save),

        Commands::Download { config, from, to } => commands::download::run(config, from, to),

        Commands::Instruments { config } => commands::instruments::run(config),
    }
}
