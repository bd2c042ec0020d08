//! Configuration management
//!
//! Handles loading and parsing of JSON configuration files with environment
//! variable support for API credentials.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::data::parse_date;
use crate::reversal::ReversalConfig;
use crate::{Granularity, Pair};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub oanda: OandaConfig,
    #[serde(default)]
    pub backtest: BacktestConfig,
    #[serde(default)]
    pub strategy: ReversalConfig,
}

impl Config {
    /// Load configuration from JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).context("Failed to read config file")?;
        let mut config: Config =
            serde_json::from_str(&contents).context("Failed to parse config JSON")?;

        // Load API credentials from environment if not set
        if let Ok(api_key) = std::env::var("OANDA_API_KEY") {
            config.oanda.api_key = Some(api_key);
        }
        if let Ok(account_id) = std::env::var("OANDA_ACCOUNT_ID") {
            config.oanda.account_id = Some(account_id);
        }

        config
            .strategy
            .validate()
            .context("Invalid strategy section")?;

        Ok(config)
    }
}

/// Candle API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OandaConfig {
    #[serde(default = "default_oanda_url")]
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_oanda_url() -> String {
    "https://api-fxpractice.oanda.com/v3".to_string()
}

impl Default for OandaConfig {
    fn default() -> Self {
        OandaConfig {
            url: default_oanda_url(),
            account_id: None,
            api_key: None,
        }
    }
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_results_dir")]
    pub results_dir: String,
    #[serde(default = "default_instruments_file")]
    pub instruments_file: String,
    #[serde(default = "default_pairs")]
    pub pairs: Vec<String>,
    #[serde(default = "default_granularities")]
    pub granularities: Vec<Granularity>,
    /// Inclusive start of the analysed range (RFC 3339 or YYYY-MM-DD)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

fn default_data_dir() -> String {
    "data".to_string()
}
fn default_results_dir() -> String {
    "results".to_string()
}
fn default_instruments_file() -> String {
    "data/instruments.json".to_string()
}
fn default_pairs() -> Vec<String> {
    vec!["EUR_USD".to_string(), "USD_JPY".to_string()]
}
fn default_granularities() -> Vec<Granularity> {
    vec![Granularity::H1]
}

impl Default for BacktestConfig {
    fn default() -> Self {
        BacktestConfig {
            data_dir: default_data_dir(),
            results_dir: default_results_dir(),
            instruments_file: default_instruments_file(),
            pairs: default_pairs(),
            granularities: default_granularities(),
            from: None,
            to: None,
        }
    }
}

impl BacktestConfig {
    pub fn pairs(&self) -> Vec<Pair> {
        self.pairs.iter().map(Pair::new).collect()
    }

    /// Parsed `from`/`to` bounds
    pub fn date_range(
        &self,
    ) -> Result<(Option<chrono::DateTime<chrono::Utc>>, Option<chrono::DateTime<chrono::Utc>>)>
    {
        let start = self.from.as_deref().map(parse_date).transpose()?;
        let end = self.to.as_deref().map(parse_date).transpose()?;
        Ok((start, end))
    }
}
