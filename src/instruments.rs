//! Instrument metadata
//!
//! Pip location and precision per tradable pair, cached on disk as
//! `instruments.json` in the broker's own field names.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::Pair;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instrument {
    pub name: String,
    #[serde(rename = "type")]
    pub instrument_type: String,
    pub display_name: String,
    /// Power of ten of one pip (-4 for most pairs, -2 for JPY crosses)
    pub pip_location: i32,
    #[serde(default)]
    pub display_precision: u32,
    #[serde(default)]
    pub trade_units_precision: i32,
    /// Sent as a decimal string by the API, stored as a number
    #[serde(default, deserialize_with = "number_or_string")]
    pub margin_rate: f64,
}

fn number_or_string<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

impl Instrument {
    /// Price value of one pip
    pub fn pip_size(&self) -> f64 {
        10f64.powi(self.pip_location)
    }

    /// Metadata guessed from the pair name when the cache has no entry
    pub fn fallback_for(pair: &Pair) -> Self {
        let (pip_location, display_precision) = if pair.is_jpy() { (-2, 3) } else { (-4, 5) };
        Self {
            name: pair.as_str().to_string(),
            instrument_type: "CURRENCY".to_string(),
            display_name: pair.as_str().replace('_', "/"),
            pip_location,
            display_precision,
            trade_units_precision: 0,
            margin_rate: 0.0,
        }
    }
}

/// Instruments keyed by name
#[derive(Debug, Clone, Default)]
pub struct InstrumentCollection {
    instruments: BTreeMap<String, Instrument>,
}

impl InstrumentCollection {
    pub fn new(instruments: impl IntoIterator<Item = Instrument>) -> Self {
        Self {
            instruments: instruments
                .into_iter()
                .map(|i| (i.name.clone(), i))
                .collect(),
        }
    }

    /// Load a JSON array of instruments
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read instruments file {}", path.display()))?;
        let instruments: Vec<Instrument> =
            serde_json::from_str(&contents).context("Failed to parse instruments JSON")?;
        info!("Loaded {} instruments from {}", instruments.len(), path.display());
        Ok(Self::new(instruments))
    }

    /// Load the cache if present, otherwise start empty
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::from_file(path)
        } else {
            warn!(
                "Instruments file {} not found, using pair-name fallbacks",
                path.display()
            );
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let list: Vec<&Instrument> = self.instruments.values().collect();
        let json = serde_json::to_string_pretty(&list)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write instruments file {}", path.display()))?;
        info!("Saved {} instruments to {}", list.len(), path.display());
        Ok(())
    }

    pub fn get(&self, pair: &Pair) -> Option<&Instrument> {
        self.instruments.get(pair.as_str())
    }

    /// Cached metadata, or the pair-name fallback
    pub fn resolve(&self, pair: &Pair) -> Instrument {
        match self.get(pair) {
            Some(instrument) => instrument.clone(),
            None => {
                let fallback = Instrument::fallback_for(pair);
                warn!(
                    "No metadata for {}, assuming pip location {}",
                    pair, fallback.pip_location
                );
                fallback
            }
        }
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instrument> {
        self.instruments.values()
    }
}
