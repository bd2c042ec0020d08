//! OANDA v3 REST client for historical candles and instrument metadata.
//! Requires an API key and account id (see `OandaConfig`).

mod client;
mod types;

pub use client::{
    collect_pages, merge_batches, page_windows, CandleSeries, OandaClient, CANDLES_PER_REQUEST,
};
pub use types::*;
