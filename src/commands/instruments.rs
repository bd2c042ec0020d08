//! Instruments command - cache account instrument metadata

use anyhow::Result;
use fx_reversal::instruments::InstrumentCollection;
use fx_reversal::oanda::OandaClient;
use fx_reversal::Config;
use tracing::info;

pub fn run(config_path: String) -> Result<()> {
    let config = Config::from_file(&config_path)?;
    let client = OandaClient::new(&config.oanda)?;

    info!("Fetching instruments for the configured account");
    let instruments = InstrumentCollection::new(client.fetch_instruments()?);
    instruments.save(&config.backtest.instruments_file)?;

    println!("\n{}", "=".repeat(60));
    println!("INSTRUMENTS ({})", instruments.len());
    println!("{}", "=".repeat(60));
    for pair in config.backtest.pairs() {
        match instruments.get(&pair) {
            Some(i) => println!(
                "  {:<10} pip location {:>3}, precision {}",
                i.name, i.pip_location, i.display_precision
            ),
            None => println!("  {:<10} not offered on this account", pair),
        }
    }
    println!("  Saved to: {}", config.backtest.instruments_file);
    println!("{}", "=".repeat(60));

    Ok(())
}
