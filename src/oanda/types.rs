//! OANDA API response types for candles and instruments

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::instruments::Instrument;
use crate::{Bar, Ohlc};

/// Prices arrive as decimal strings
#[derive(Debug, Clone, Deserialize)]
pub struct OandaOhlc {
    pub o: String,
    pub h: String,
    pub l: String,
    pub c: String,
}

impl OandaOhlc {
    pub fn parse(&self) -> Option<Ohlc> {
        Some(Ohlc::new(
            self.o.parse().ok()?,
            self.h.parse().ok()?,
            self.l.parse().ok()?,
            self.c.parse().ok()?,
        ))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OandaCandle {
    pub complete: bool,
    pub volume: f64,
    pub time: DateTime<Utc>,
    #[serde(default)]
    pub mid: Option<OandaOhlc>,
    #[serde(default)]
    pub bid: Option<OandaOhlc>,
    #[serde(default)]
    pub ask: Option<OandaOhlc>,
}

impl OandaCandle {
    /// Complete candles with a parseable, valid mid price become bars
    pub fn to_bar(&self) -> Option<Bar> {
        if !self.complete {
            return None;
        }
        let mid = self.mid.as_ref()?.parse()?;
        let bar = Bar {
            time: self.time,
            volume: self.volume,
            mid,
            bid: self.bid.as_ref().and_then(OandaOhlc::parse),
            ask: self.ask.as_ref().and_then(OandaOhlc::parse),
        };
        bar.is_valid().then_some(bar)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CandlesResponse {
    #[serde(default)]
    pub instrument: String,
    #[serde(default)]
    pub granularity: String,
    pub candles: Vec<OandaCandle>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentsResponse {
    pub instruments: Vec<Instrument>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const CANDLES_JSON: &str = r#"{
        "instrument": "EUR_USD",
        "granularity": "H1",
        "candles": [
            {"complete": true, "volume": 1520, "time": "2024-10-01T00:00:00.000000000Z",
             "mid": {"o": "1.11340", "h": "1.11380", "l": "1.11300", "c": "1.11352"},
             "bid": {"o": "1.11332", "h": "1.11372", "l": "1.11292", "c": "1.11344"},
             "ask": {"o": "1.11348", "h": "1.11388", "l": "1.11308", "c": "1.11360"}},
            {"complete": false, "volume": 12, "time": "2024-10-01T01:00:00.000000000Z",
             "mid": {"o": "1.11352", "h": "1.11360", "l": "1.11350", "c": "1.11355"}}
        ]
    }"#;

    #[test]
    fn test_candles_response_to_bars() {
        let response: CandlesResponse = serde_json::from_str(CANDLES_JSON).unwrap();
        assert_eq!(response.candles.len(), 2);

        let bars: Vec<Bar> = response.candles.iter().filter_map(OandaCandle::to_bar).collect();
        assert_eq!(bars.len(), 1, "incomplete candles are dropped");
        assert_eq!(bars[0].mid.c, 1.11352);
        assert_eq!(bars[0].ask.unwrap().c, 1.11360);
        assert_eq!(bars[0].volume, 1520.0);
    }

    #[test]
    fn test_unparseable_price_is_dropped() {
        let candle = OandaCandle {
            complete: true,
            volume: 1.0,
            time: Utc::now(),
            mid: Some(OandaOhlc {
                o: "x".into(),
                h: "1.1".into(),
                l: "1.0".into(),
                c: "1.05".into(),
            }),
            bid: None,
            ask: None,
        };
        assert!(candle.to_bar().is_none());
    }
}
