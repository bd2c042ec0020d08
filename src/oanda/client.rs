//! OANDA API client for fetching historical candles
//!
//! Candles are requested with `price=MBA` so every bar carries mid, bid and
//! ask. Long ranges are split into pages of at most 3000 candles.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use std::thread::sleep;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

use super::types::{CandlesResponse, InstrumentsResponse, OandaCandle};
use crate::config::OandaConfig;
use crate::instruments::Instrument;
use crate::{Bar, Granularity, Pair};

/// Maximum candles per request (OANDA limit is 5000)
pub const CANDLES_PER_REQUEST: i64 = 3000;

/// Attempts per page before it is given up
const MAX_ATTEMPTS: u32 = 3;

/// Rate limit delay between requests (ms)
const RATE_LIMIT_DELAY_MS: u64 = 100;

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// OANDA v3 REST client
#[derive(Debug, Clone)]
pub struct OandaClient {
    client: Client,
    base_url: String,
    account_id: Option<String>,
}

impl OandaClient {
    pub fn new(config: &OandaConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_deref()
            .context("OANDA API key missing (set OANDA_API_KEY)")?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key))
                .context("API key is not a valid header value")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(OandaClient {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            account_id: config.account_id.clone(),
        })
    }

    fn get<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .context("Failed to send request to OANDA")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            anyhow::bail!("OANDA API error {}: {}", status, body);
        }

        response.json().context("Failed to parse OANDA response")
    }

    /// Complete candles in `[from, to]` for one page
    pub fn fetch_candles(
        &self,
        pair: &Pair,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Bar>> {
        let params = [
            ("granularity", granularity.as_str().to_string()),
            ("price", "MBA".to_string()),
            ("from", from.format(DATE_FORMAT).to_string()),
            ("to", to.format(DATE_FORMAT).to_string()),
        ];

        debug!("Fetching candles: pair={}, granularity={}, from={}, to={}", pair, granularity, from, to);

        let response: CandlesResponse =
            self.get(&format!("instruments/{}/candles", pair), &params)?;

        Ok(response
            .candles
            .iter()
            .filter_map(OandaCandle::to_bar)
            .collect())
    }

    fn fetch_with_retry(
        &self,
        pair: &Pair,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Option<Vec<Bar>> {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetch_candles(pair, granularity, from, to) {
                Ok(bars) => return Some(bars),
                Err(e) => warn!(
                    "{} {} {} -> {}: attempt {}/{} failed: {}",
                    pair, granularity, from, to, attempt, MAX_ATTEMPTS, e
                ),
            }
        }
        None
    }

    /// Fetch a full range page by page into one sorted, de-duplicated series
    pub fn collect_candles(
        &self,
        pair: &Pair,
        granularity: Granularity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<CandleSeries> {
        let series = collect_pages(page_windows(from, to, granularity), |start, end| {
            let bars = self.fetch_with_retry(pair, granularity, start, end);
            match &bars {
                Some(b) if !b.is_empty() => {
                    info!("{} {} {} {} --> {} candles loaded", pair, granularity, start, end, b.len())
                }
                Some(_) => debug!("{} {} {} {} --> no candles", pair, granularity, start, end),
                None => warn!("{} {} {} {} --> page failed, series has a gap", pair, granularity, start, end),
            }
            sleep(StdDuration::from_millis(RATE_LIMIT_DELAY_MS));
            bars
        });

        if series.bars.is_empty() {
            anyhow::bail!("No candles fetched for {} {}", pair, granularity);
        }

        info!(
            "Fetched {} candles for {} {} ({} failed pages)",
            series.bars.len(),
            pair,
            granularity,
            series.failed_pages.len()
        );
        Ok(series)
    }

    /// Tradable instruments of the configured account
    pub fn fetch_instruments(&self) -> Result<Vec<Instrument>> {
        let account_id = self
            .account_id
            .as_deref()
            .context("OANDA account id missing (set OANDA_ACCOUNT_ID)")?;
        let response: InstrumentsResponse =
            self.get(&format!("accounts/{}/instruments", account_id), &[])?;
        Ok(response.instruments)
    }
}

/// Merged candles plus the pages that failed every attempt
#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    pub bars: Vec<Bar>,
    pub failed_pages: Vec<(DateTime<Utc>, DateTime<Utc>)>,
}

impl CandleSeries {
    pub fn is_complete(&self) -> bool {
        self.failed_pages.is_empty()
    }
}

/// Run `fetch` over every page; `None` marks the page as failed
pub fn collect_pages<F>(windows: Vec<(DateTime<Utc>, DateTime<Utc>)>, mut fetch: F) -> CandleSeries
where
    F: FnMut(DateTime<Utc>, DateTime<Utc>) -> Option<Vec<Bar>>,
{
    let mut batches = Vec::new();
    let mut failed_pages = Vec::new();

    for (start, end) in windows {
        match fetch(start, end) {
            Some(bars) => batches.push(bars),
            None => failed_pages.push((start, end)),
        }
    }

    CandleSeries {
        bars: merge_batches(batches),
        failed_pages,
    }
}

/// Consecutive `[start, end)` pages of at most [`CANDLES_PER_REQUEST`] candles
pub fn page_windows(
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    granularity: Granularity,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let step = Duration::minutes(granularity.minutes() * CANDLES_PER_REQUEST);
    let mut windows = Vec::new();
    let mut start = from;

    while start < to {
        let end = (start + step).min(to);
        windows.push((start, end));
        start = end;
    }

    windows
}

/// Concatenate pages, sort by time and drop duplicate timestamps
pub fn merge_batches(batches: Vec<Vec<Bar>>) -> Vec<Bar> {
    let mut bars: Vec<Bar> = batches.into_iter().flatten().collect();
    bars.sort_by_key(|b| b.time);
    bars.dedup_by_key(|b| b.time);
    bars
}
