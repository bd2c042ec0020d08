//! Trend classification
//!
//! Labels each bar "in downtrend" when the configured simple moving averages
//! of the mid close are strictly ordered, shortest window lowest.

use crate::error::{EngineError, EngineResult};
use crate::indicators::sma;
use crate::Bar;

/// Downtrend labels for the usable range of a bar sequence.
///
/// Bars before every average is populated carry no label at all.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendLabels {
    first_usable: usize,
    labels: Vec<bool>,
}

impl TrendLabels {
    /// Index of the first bar with a label
    pub fn first_usable(&self) -> usize {
        self.first_usable
    }

    /// Label for bar `index`, `None` inside the warm-up prefix
    pub fn get(&self, index: usize) -> Option<bool> {
        index
            .checked_sub(self.first_usable)
            .and_then(|offset| self.labels.get(offset).copied())
    }

    /// Number of labelled bars
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub struct TrendClassifier {
    windows: Vec<usize>,
}

impl TrendClassifier {
    pub fn new(windows: &[usize]) -> EngineResult<Self> {
        if windows.is_empty() || windows.contains(&0) {
            return Err(EngineError::InvalidConfig(
                "trend windows must be non-empty and > 0".to_string(),
            ));
        }
        let mut windows = windows.to_vec();
        windows.sort_unstable();
        windows.dedup();
        if windows.len() < 2 {
            return Err(EngineError::InvalidConfig(
                "trend needs at least two distinct windows".to_string(),
            ));
        }
        Ok(Self { windows })
    }

    pub fn longest_window(&self) -> usize {
        self.windows.last().copied().unwrap_or(0)
    }

    pub fn classify(&self, bars: &[Bar]) -> EngineResult<TrendLabels> {
        let required = self.longest_window();
        if bars.len() < required {
            return Err(EngineError::InsufficientHistory {
                bars: bars.len(),
                required,
            });
        }

        let closes: Vec<f64> = bars.iter().map(|b| b.mid.c).collect();
        let averages: Vec<Vec<Option<f64>>> =
            self.windows.iter().map(|&w| sma(&closes, w)).collect();

        let first_usable = required - 1;
        let labels = (first_usable..bars.len())
            .map(|i| {
                let values: Option<Vec<f64>> = averages.iter().map(|ma| ma[i]).collect();
                values
                    .map(|v| v.windows(2).all(|pair| pair[0] < pair[1]))
                    .unwrap_or(false)
            })
            .collect();

        Ok(TrendLabels {
            first_usable,
            labels,
        })
    }
}
