//! Pre-control zones and running decisions.
//!
//! Zones are derived from the tolerance only:
//!
//! - **Green**: middle 50% of the tolerance
//! - **Yellow**: outer 25% on each side, still inside the specification
//! - **Red**: outside the specification limits
//!
//! [`PreControlTracker`] applies the classic decision rules: five consecutive
//! greens qualify the process; afterwards a single yellow calls for checking
//! the next piece, two yellows on the same side call for an adjustment, and
//! two yellows on opposite sides or any red stop the process.
//!
//! # References
//!
//! - Shainin, D. (1984). "Better than good old X̄ and R charts", *ASQC Quality Congress*.
//! - Bhote, K.R. (1988). *World Class Quality*, Chapter 4.

use serde::{Deserialize, Serialize};

use super::chart::{ChartDesign, ControlLimits};
use super::zones::Side;
use crate::error::{SpcError, SpcResult};

/// Consecutive greens required to qualify a setup.
pub const QUALIFICATION_RUN: usize = 5;

/// Pre-control band of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreControlZone {
    Green,
    Yellow(Side),
    Red(Side),
}

/// Zone boundaries derived from LSL/USL.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PreControlZones {
    pub lsl: f64,
    pub usl: f64,
    /// Lower pre-control line, `LSL + tolerance / 4`.
    pub green_low: f64,
    /// Upper pre-control line, `USL - tolerance / 4`.
    pub green_high: f64,
}

impl PreControlZones {
    /// # Errors
    ///
    /// [`SpcError::Validation`] unless `lsl < usl` and both are finite.
    pub fn new(lsl: f64, usl: f64) -> SpcResult<Self> {
        if !lsl.is_finite() || !usl.is_finite() || lsl >= usl {
            return Err(SpcError::validation(format!(
                "pre-control requires finite LSL < USL, got {lsl}..{usl}"
            )));
        }
        let quarter = (usl - lsl) / 4.0;
        Ok(Self {
            lsl,
            usl,
            green_low: lsl + quarter,
            green_high: usl - quarter,
        })
    }

    /// Recovers the zones from pre-control [`ControlLimits`].
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if the limits were not built for pre-control.
    pub fn from_limits(limits: &ControlLimits) -> SpcResult<Self> {
        match limits.design {
            Some(ChartDesign::PreControl { lsl, usl }) => Self::new(lsl, usl),
            _ => Err(SpcError::validation(format!(
                "{} limits carry no pre-control design",
                limits.chart_type
            ))),
        }
    }

    /// Classifies a value. Pre-control lines belong to green, specification
    /// limits belong to yellow.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] for a non-finite value.
    pub fn classify(&self, value: f64) -> SpcResult<PreControlZone> {
        if !value.is_finite() {
            return Err(SpcError::validation(format!(
                "non-finite pre-control input {value}"
            )));
        }
        let zone = if value > self.usl {
            PreControlZone::Red(Side::Above)
        } else if value < self.lsl {
            PreControlZone::Red(Side::Below)
        } else if value > self.green_high {
            PreControlZone::Yellow(Side::Above)
        } else if value < self.green_low {
            PreControlZone::Yellow(Side::Below)
        } else {
            PreControlZone::Green
        };
        Ok(zone)
    }
}

/// Decision after a pre-control observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreControlAction {
    /// Setup not yet qualified; keep sampling.
    Qualifying { greens: usize },
    /// Qualified with this observation, or green while running.
    Continue,
    /// Single yellow: inspect the next piece.
    CheckNext,
    /// Two yellows on the same side: re-center the process.
    Adjust,
    /// Red, or two yellows on opposite sides: stop and requalify.
    Stop,
}

/// Stateful pre-control decision maker for one stream.
#[derive(Debug, Clone)]
pub struct PreControlTracker {
    zones: PreControlZones,
    consecutive_greens: usize,
    qualified: bool,
    last: Option<PreControlZone>,
}

impl PreControlTracker {
    pub fn new(zones: PreControlZones) -> Self {
        Self {
            zones,
            consecutive_greens: 0,
            qualified: false,
            last: None,
        }
    }

    pub fn zones(&self) -> &PreControlZones {
        &self.zones
    }

    pub fn is_qualified(&self) -> bool {
        self.qualified
    }

    /// Classifies `value` and returns the zone with the resulting decision.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] for a non-finite value; the tracker state is
    /// left untouched.
    pub fn observe(&mut self, value: f64) -> SpcResult<(PreControlZone, PreControlAction)> {
        let zone = self.zones.classify(value)?;
        let action = if self.qualified {
            self.running(zone)
        } else {
            self.qualifying(zone)
        };
        // An adjustment resets the yellow pair; the next yellow is a fresh check.
        self.last = (action != PreControlAction::Adjust).then_some(zone);
        Ok((zone, action))
    }

    fn qualifying(&mut self, zone: PreControlZone) -> PreControlAction {
        match zone {
            PreControlZone::Green => {
                self.consecutive_greens += 1;
                if self.consecutive_greens >= QUALIFICATION_RUN {
                    self.qualified = true;
                    PreControlAction::Continue
                } else {
                    PreControlAction::Qualifying {
                        greens: self.consecutive_greens,
                    }
                }
            }
            PreControlZone::Yellow(_) => {
                self.consecutive_greens = 0;
                PreControlAction::Qualifying { greens: 0 }
            }
            PreControlZone::Red(_) => {
                self.consecutive_greens = 0;
                PreControlAction::Stop
            }
        }
    }

    fn running(&mut self, zone: PreControlZone) -> PreControlAction {
        match (self.last, zone) {
            (_, PreControlZone::Green) => PreControlAction::Continue,
            (_, PreControlZone::Red(_)) => self.requalify(),
            (Some(PreControlZone::Yellow(prev)), PreControlZone::Yellow(side)) => {
                if prev == side {
                    PreControlAction::Adjust
                } else {
                    self.requalify()
                }
            }
            (_, PreControlZone::Yellow(_)) => PreControlAction::CheckNext,
        }
    }

    fn requalify(&mut self) -> PreControlAction {
        self.qualified = false;
        self.consecutive_greens = 0;
        PreControlAction::Stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zones() -> PreControlZones {
        // Tolerance 8..12: green 9..11
        PreControlZones::new(8.0, 12.0).unwrap()
    }

    fn qualified() -> PreControlTracker {
        let mut tracker = PreControlTracker::new(zones());
        for _ in 0..QUALIFICATION_RUN {
            tracker.observe(10.0).unwrap();
        }
        assert!(tracker.is_qualified());
        tracker
    }

    #[test]
    fn zone_boundaries() {
        let z = zones();
        assert!((z.green_low - 9.0).abs() < f64::EPSILON);
        assert!((z.green_high - 11.0).abs() < f64::EPSILON);
        assert_eq!(z.classify(10.0).unwrap(), PreControlZone::Green);
        assert_eq!(z.classify(11.0).unwrap(), PreControlZone::Green);
        assert_eq!(z.classify(9.0).unwrap(), PreControlZone::Green);
        assert_eq!(z.classify(11.5).unwrap(), PreControlZone::Yellow(Side::Above));
        assert_eq!(z.classify(8.5).unwrap(), PreControlZone::Yellow(Side::Below));
        assert_eq!(z.classify(12.0).unwrap(), PreControlZone::Yellow(Side::Above));
        assert_eq!(z.classify(12.1).unwrap(), PreControlZone::Red(Side::Above));
        assert_eq!(z.classify(7.9).unwrap(), PreControlZone::Red(Side::Below));
    }

    #[test]
    fn rejects_inverted_tolerance() {
        assert!(PreControlZones::new(5.0, 5.0).is_err());
        assert!(PreControlZones::new(f64::NAN, 5.0).is_err());
    }

    #[test]
    fn qualification_needs_five_greens() {
        let mut tracker = PreControlTracker::new(zones());
        for i in 1..QUALIFICATION_RUN {
            assert_eq!(
                tracker.observe(10.0).unwrap().1,
                PreControlAction::Qualifying { greens: i }
            );
        }
        assert_eq!(tracker.observe(10.0).unwrap().1, PreControlAction::Continue);
        assert!(tracker.is_qualified());
    }

    #[test]
    fn yellow_resets_qualification() {
        let mut tracker = PreControlTracker::new(zones());
        tracker.observe(10.0).unwrap();
        tracker.observe(10.0).unwrap();
        assert_eq!(
            tracker.observe(11.5).unwrap().1,
            PreControlAction::Qualifying { greens: 0 }
        );
        assert!(!tracker.is_qualified());
    }

    #[test]
    fn running_decisions() {
        let mut tracker = qualified();
        assert_eq!(tracker.observe(10.5).unwrap().1, PreControlAction::Continue);
        assert_eq!(tracker.observe(11.5).unwrap().1, PreControlAction::CheckNext);
        assert_eq!(tracker.observe(10.0).unwrap().1, PreControlAction::Continue);
        assert_eq!(tracker.observe(11.5).unwrap().1, PreControlAction::CheckNext);
        assert_eq!(tracker.observe(11.6).unwrap().1, PreControlAction::Adjust);
        assert!(tracker.is_qualified());
        assert_eq!(tracker.observe(11.6).unwrap().1, PreControlAction::CheckNext);
    }

    #[test]
    fn opposite_yellows_stop() {
        let mut tracker = qualified();
        tracker.observe(11.5).unwrap();
        assert_eq!(tracker.observe(8.5).unwrap().1, PreControlAction::Stop);
        assert!(!tracker.is_qualified());
    }

    #[test]
    fn red_stops() {
        let mut tracker = qualified();
        let (zone, action) = tracker.observe(13.0).unwrap();
        assert_eq!(zone, PreControlZone::Red(Side::Above));
        assert_eq!(action, PreControlAction::Stop);
        assert!(!tracker.is_qualified());
    }

    #[test]
    fn rejects_non_finite_input() {
        let z = zones();
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(
                matches!(z.classify(bad), Err(SpcError::Validation(_))),
                "{bad} must not classify as a zone"
            );
        }

        let mut tracker = PreControlTracker::new(zones());
        for _ in 0..QUALIFICATION_RUN - 1 {
            tracker.observe(10.0).unwrap();
        }
        assert!(tracker.observe(f64::NAN).is_err());
        // The rejected value neither counts as green nor resets the run.
        assert_eq!(tracker.observe(10.0).unwrap().1, PreControlAction::Continue);
        assert!(tracker.is_qualified());
    }
}
