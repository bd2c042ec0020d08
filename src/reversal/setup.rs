//! Bottom/zone detection
//!
//! A per-bar state machine: a downtrend bottom arms a zone, price leaves the
//! zone upward, comes back into it, and a strong candle shortly after the
//! reentry confirms the setup. Every bar applies at most one transition.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::trailing_low;
use crate::Bar;

use super::config::SetupConfig;

/// Price band spanned by the bottom candle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub low: f64,
    pub high: f64,
    /// Index of the bar that formed the bottom
    pub origin_index: usize,
}

impl Zone {
    /// `None` unless `low < high`
    pub fn new(low: f64, high: f64, origin_index: usize) -> Option<Self> {
        if low.is_finite() && high.is_finite() && low < high {
            Some(Self {
                low,
                high,
                origin_index,
            })
        } else {
            None
        }
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.low && price <= self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetupState {
    Idle,
    Bottom { zone: Zone },
    ExitedZone { zone: Zone, exit_index: usize },
    Reentry { zone: Zone, reentry_index: usize },
    Confirmation { zone: Zone, confirmation_index: usize },
}

/// Data-free label of a [`SetupState`], used in analysis output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStage {
    Idle,
    Bottom,
    ExitedZone,
    Reentry,
    Confirmation,
}

impl SetupState {
    pub fn zone(&self) -> Option<Zone> {
        match *self {
            SetupState::Idle => None,
            SetupState::Bottom { zone }
            | SetupState::ExitedZone { zone, .. }
            | SetupState::Reentry { zone, .. }
            | SetupState::Confirmation { zone, .. } => Some(zone),
        }
    }

    pub fn stage(&self) -> SetupStage {
        match self {
            SetupState::Idle => SetupStage::Idle,
            SetupState::Bottom { .. } => SetupStage::Bottom,
            SetupState::ExitedZone { .. } => SetupStage::ExitedZone,
            SetupState::Reentry { .. } => SetupStage::Reentry,
            SetupState::Confirmation { .. } => SetupStage::Confirmation,
        }
    }
}

/// Transition taken on a bar
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SetupEvent {
    BottomArmed(Zone),
    Exited,
    Invalidated,
    Reentered,
    TimedOut,
    /// Entry signal for the trade simulator
    Confirmed { zone: Zone, index: usize },
}

impl SetupEvent {
    pub fn label(&self) -> &'static str {
        match self {
            SetupEvent::BottomArmed(_) => "bottom",
            SetupEvent::Exited => "exited",
            SetupEvent::Invalidated => "invalidated",
            SetupEvent::Reentered => "reentry",
            SetupEvent::TimedOut => "timed_out",
            SetupEvent::Confirmed { .. } => "confirmed",
        }
    }
}

pub struct SetupTracker {
    bottom_lookback: usize,
    invalidation_distance: f64,
    max_reentry_spacing: usize,
    strength_threshold: f64,
    state: SetupState,
}

impl SetupTracker {
    pub fn new(config: &SetupConfig, strength_threshold: f64, pip_size: f64) -> Self {
        Self {
            bottom_lookback: config.bottom_lookback,
            invalidation_distance: config.invalidation_pips * pip_size,
            max_reentry_spacing: config.max_reentry_spacing,
            strength_threshold,
            state: SetupState::Idle,
        }
    }

    pub fn state(&self) -> SetupState {
        self.state
    }

    /// Advance the machine by bar `index`.
    ///
    /// A fresh bottom takes precedence over everything else and replaces any
    /// setup in progress. `strength` is only consulted in the reentry stage.
    pub fn step(
        &mut self,
        bars: &[Bar],
        index: usize,
        in_downtrend: bool,
        strength: f64,
    ) -> Option<SetupEvent> {
        let candle = bars.get(index)?.mid;

        if in_downtrend && trailing_low(bars, index, self.bottom_lookback) == Some(candle.l) {
            return match Zone::new(candle.l, candle.h, index) {
                Some(zone) => {
                    debug!(index, low = zone.low, high = zone.high, "bottom armed");
                    self.state = SetupState::Bottom { zone };
                    Some(SetupEvent::BottomArmed(zone))
                }
                None => {
                    debug!(index, "zero-range bottom ignored");
                    None
                }
            };
        }

        match self.state {
            SetupState::Idle | SetupState::Confirmation { .. } => None,

            SetupState::Bottom { zone } => {
                if candle.l > zone.high {
                    self.state = SetupState::ExitedZone {
                        zone,
                        exit_index: index,
                    };
                    Some(SetupEvent::Exited)
                } else {
                    None
                }
            }

            SetupState::ExitedZone { zone, .. } => {
                if candle.h > zone.high + self.invalidation_distance {
                    debug!(index, high = candle.h, "setup invalidated");
                    self.state = SetupState::Idle;
                    Some(SetupEvent::Invalidated)
                } else if zone.contains(candle.l) {
                    self.state = SetupState::Reentry {
                        zone,
                        reentry_index: index,
                    };
                    Some(SetupEvent::Reentered)
                } else {
                    None
                }
            }

            SetupState::Reentry {
                zone,
                reentry_index,
            } => {
                if index > reentry_index + self.max_reentry_spacing {
                    self.state = SetupState::Idle;
                    Some(SetupEvent::TimedOut)
                } else if strength > self.strength_threshold {
                    debug!(index, strength, "setup confirmed");
                    self.state = SetupState::Confirmation {
                        zone,
                        confirmation_index: index,
                    };
                    Some(SetupEvent::Confirmed { zone, index })
                } else {
                    None
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ohlc;
    use chrono::{Duration, TimeZone, Utc};

    const PIP: f64 = 0.0001;

    fn bars(high_low: &[(f64, f64)]) -> Vec<Bar> {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        high_low
            .iter()
            .enumerate()
            .map(|(i, &(h, l))| {
                let mid = (h + l) / 2.0;
                Bar::new_unchecked(t0 + Duration::hours(i as i64), Ohlc::new(mid, h, l, mid), 100.0)
            })
            .collect()
    }

    fn tracker() -> SetupTracker {
        let config = SetupConfig {
            bottom_lookback: 3,
            invalidation_pips: 20.0,
            max_reentry_spacing: 2,
        };
        SetupTracker::new(&config, 0.7, PIP)
    }

    fn run(tracker: &mut SetupTracker, b: &[Bar], strengths: &[f64]) -> Vec<Option<SetupEvent>> {
        (0..b.len())
            .map(|i| tracker.step(b, i, true, strengths.get(i).copied().unwrap_or(0.0)))
            .collect()
    }

    #[test]
    fn test_full_sequence_confirms() {
        let b = bars(&[
            (1.1010, 1.1000),
            (1.1012, 1.1005),
            (1.1020, 1.1012),
            (1.1015, 1.1008),
            (1.1030, 1.1009),
        ]);
        let mut t = tracker();
        let events = run(&mut t, &b, &[0.0, 0.0, 0.0, 0.0, 0.9]);

        let zone = Zone::new(1.1000, 1.1010, 0).unwrap();
        assert_eq!(events[0], Some(SetupEvent::BottomArmed(zone)));
        assert_eq!(events[1], None);
        assert_eq!(events[2], Some(SetupEvent::Exited));
        assert_eq!(events[3], Some(SetupEvent::Reentered));
        assert_eq!(events[4], Some(SetupEvent::Confirmed { zone, index: 4 }));
        assert_eq!(t.state().stage(), SetupStage::Confirmation);
    }

    #[test]
    fn test_confirmation_is_terminal_until_next_bottom() {
        let b = bars(&[
            (1.1010, 1.1000),
            (1.1020, 1.1012),
            (1.1015, 1.1008),
            (1.1030, 1.1009),
            (1.1015, 1.1010),
            (1.1030, 1.1011),
        ]);
        let mut t = tracker();
        let events = run(&mut t, &b, &[0.0, 0.0, 0.0, 0.9, 0.9, 0.9]);
        assert!(matches!(events[3], Some(SetupEvent::Confirmed { .. })));
        assert_eq!(events[4], None);
        assert_eq!(events[5], None);
    }

    #[test]
    fn test_run_above_zone_invalidates() {
        let b = bars(&[
            (1.1010, 1.1000),
            (1.1012, 1.1005),
            (1.1020, 1.1012),
            (1.1031, 1.1020),
        ]);
        let mut t = tracker();
        let events = run(&mut t, &b, &[]);
        assert_eq!(events[3], Some(SetupEvent::Invalidated));
        assert_eq!(t.state(), SetupState::Idle);
    }

    #[test]
    fn test_reentry_times_out() {
        let b = bars(&[
            (1.1010, 1.1000),
            (1.1012, 1.1005),
            (1.1020, 1.1012),
            (1.1015, 1.1008),
            (1.1016, 1.1009),
            (1.1017, 1.1010),
            (1.1018, 1.1011),
        ]);
        let mut t = tracker();
        // Strong candle arrives one bar too late
        let events = run(&mut t, &b, &[0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.9]);
        assert_eq!(events[3], Some(SetupEvent::Reentered));
        assert_eq!(events[4], None);
        assert_eq!(events[5], None);
        assert_eq!(events[6], Some(SetupEvent::TimedOut));
    }

    #[test]
    fn test_threshold_is_strict() {
        let b = bars(&[
            (1.1010, 1.1000),
            (1.1020, 1.1012),
            (1.1015, 1.1008),
            (1.1030, 1.1009),
        ]);
        let mut t = tracker();
        let events = run(&mut t, &b, &[0.0, 0.0, 0.0, 0.7]);
        assert_eq!(events[3], None);
        assert_eq!(t.state().stage(), SetupStage::Reentry);
    }

    #[test]
    fn test_new_bottom_replaces_setup() {
        let b = bars(&[
            (1.1010, 1.1000),
            (1.1012, 1.1005),
            (1.1020, 1.1012),
            (1.0998, 1.0990),
        ]);
        let mut t = tracker();
        let events = run(&mut t, &b, &[]);
        let zone = Zone::new(1.0990, 1.0998, 3).unwrap();
        assert_eq!(events[3], Some(SetupEvent::BottomArmed(zone)));
        assert_eq!(t.state(), SetupState::Bottom { zone });
    }

    #[test]
    fn test_bottom_outside_downtrend_is_ignored() {
        let b = bars(&[(1.1010, 1.1000)]);
        let mut t = tracker();
        assert_eq!(t.step(&b, 0, false, 0.0), None);
        assert_eq!(t.state(), SetupState::Idle);
    }

    #[test]
    fn test_new_low_outside_downtrend_keeps_setup() {
        let b = bars(&[
            (1.1010, 1.1000),
            (1.1012, 1.1005),
            (1.1020, 1.1012),
            (1.0998, 1.0990),
        ]);
        let mut t = tracker();
        let zone = Zone::new(1.1000, 1.1010, 0).unwrap();
        assert_eq!(t.step(&b, 0, true, 0.0), Some(SetupEvent::BottomArmed(zone)));
        assert_eq!(t.step(&b, 1, true, 0.0), None);
        assert_eq!(t.step(&b, 2, true, 0.0), Some(SetupEvent::Exited));

        // Fresh low, but the trend has turned: no new zone and no reset
        assert_eq!(t.step(&b, 3, false, 0.0), None);
        assert_eq!(
            t.state(),
            SetupState::ExitedZone {
                zone,
                exit_index: 2
            }
        );
    }

    #[test]
    fn test_zero_range_bottom_does_not_arm() {
        let b = bars(&[(1.1000, 1.1000)]);
        let mut t = tracker();
        assert_eq!(t.step(&b, 0, true, 0.0), None);
        assert_eq!(t.state(), SetupState::Idle);
    }

    #[test]
    fn test_zone_requires_low_below_high() {
        assert!(Zone::new(1.1, 1.1, 0).is_none());
        assert!(Zone::new(1.2, 1.1, 0).is_none());
        let zone = Zone::new(1.1, 1.2, 7).unwrap();
        assert!(zone.contains(1.1) && zone.contains(1.2) && !zone.contains(1.21));
    }
}
