//! Zone classification of individual chart points.
//!
//! Zones are sigma-distance bands around the center line:
//!
//! | Zone | Distance from CL |
//! |------|------------------|
//! | C    | `|d| <= 1σ`      |
//! | B    | `1σ < |d| <= 2σ` |
//! | A    | `2σ < |d|`       |
//!
//! A point beyond the control limits is reported as zone A with
//! `is_out_of_control = true`. Classification is a pure function of the value
//! and the [`ControlLimits`]; nothing is cached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::chart::ControlLimits;

/// Sigma band of a point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Zone {
    A,
    B,
    C,
}

/// Side of the center line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Above,
    Below,
}

/// A point annotated with its zone relative to a set of control limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZonePoint {
    /// Sequence number of the point within its stream.
    pub index: u64,
    pub timestamp: DateTime<Utc>,
    /// Plotted value (individual value or subgroup mean).
    pub value: f64,
    pub zone: Zone,
    /// `None` when the value sits exactly on the center line.
    pub side: Option<Side>,
    pub is_out_of_control: bool,
    /// Signed distance from the center line in sigmas; `None` for zero-variance limits.
    pub sigma_distance: Option<f64>,
}

impl ZonePoint {
    /// Zone A or beyond.
    pub fn beyond_two_sigma(&self) -> bool {
        self.zone == Zone::A
    }

    /// Zone B, zone A, or beyond.
    pub fn beyond_one_sigma(&self) -> bool {
        matches!(self.zone, Zone::A | Zone::B)
    }

    pub fn in_zone_c(&self) -> bool {
        self.zone == Zone::C
    }
}

/// Classifies `value` against `limits`.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use u_spc::spc::{classify, ChartType, ControlLimitCalculator, Side, Zone};
/// use u_spc::model::Measurement;
///
/// let now = Utc::now();
/// let baseline: Vec<Measurement> = [9.9, 10.1, 10.0, 9.8, 10.2, 10.0]
///     .iter()
///     .map(|&v| Measurement::new(now, v))
///     .collect();
/// let limits = ControlLimitCalculator::default()
///     .individuals("bore".into(), &baseline)
///     .unwrap();
///
/// let point = classify(7, now, limits.ucl + 0.01, &limits);
/// assert_eq!(point.zone, Zone::A);
/// assert_eq!(point.side, Some(Side::Above));
/// assert!(point.is_out_of_control);
/// ```
pub fn classify(index: u64, timestamp: DateTime<Utc>, value: f64, limits: &ControlLimits) -> ZonePoint {
    let distance = value - limits.center_line;
    let side = if distance > 0.0 {
        Some(Side::Above)
    } else if distance < 0.0 {
        Some(Side::Below)
    } else {
        None
    };

    let sigma = limits.sigma;
    let abs = distance.abs();
    let zone = if abs <= sigma {
        Zone::C
    } else if abs <= 2.0 * sigma {
        Zone::B
    } else {
        Zone::A
    };

    ZonePoint {
        index,
        timestamp,
        value,
        zone,
        side,
        is_out_of_control: limits.is_beyond(value),
        sigma_distance: (sigma > 0.0).then(|| distance / sigma),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::t;
    use crate::spc::chart::ChartType;

    fn limits() -> ControlLimits {
        // CL = 25, sigma = 1 → zones at 26/27, limits at 28/22
        ControlLimits::three_sigma("c".into(), ChartType::IMr, 25.0, 1.0)
    }

    fn zone_of(value: f64) -> (Zone, Option<Side>, bool) {
        let p = classify(0, t(0), value, &limits());
        (p.zone, p.side, p.is_out_of_control)
    }

    #[test]
    fn zone_bands() {
        assert_eq!(zone_of(25.5), (Zone::C, Some(Side::Above), false));
        assert_eq!(zone_of(24.5), (Zone::C, Some(Side::Below), false));
        assert_eq!(zone_of(26.5), (Zone::B, Some(Side::Above), false));
        assert_eq!(zone_of(23.5), (Zone::B, Some(Side::Below), false));
        assert_eq!(zone_of(27.5), (Zone::A, Some(Side::Above), false));
        assert_eq!(zone_of(22.5), (Zone::A, Some(Side::Below), false));
    }

    #[test]
    fn boundaries_belong_to_inner_zone() {
        assert_eq!(zone_of(26.0).0, Zone::C);
        assert_eq!(zone_of(27.0).0, Zone::B);
        assert_eq!(zone_of(28.0), (Zone::A, Some(Side::Above), false));
    }

    #[test]
    fn beyond_limits_is_zone_a_out_of_control() {
        assert_eq!(zone_of(28.5), (Zone::A, Some(Side::Above), true));
        assert_eq!(zone_of(21.0), (Zone::A, Some(Side::Below), true));
    }

    #[test]
    fn center_line_has_no_side() {
        let p = classify(0, t(0), 25.0, &limits());
        assert_eq!(p.zone, Zone::C);
        assert_eq!(p.side, None);
        assert_eq!(p.sigma_distance, Some(0.0));
    }

    #[test]
    fn zero_variance_limits() {
        let flat = ControlLimits::three_sigma("c".into(), ChartType::IMr, 10.0, 0.0);
        let on = classify(0, t(0), 10.0, &flat);
        assert_eq!(on.zone, Zone::C);
        assert!(!on.is_out_of_control);
        assert_eq!(on.sigma_distance, None);

        let off = classify(1, t(1), 10.001, &flat);
        assert_eq!(off.zone, Zone::A);
        assert!(off.is_out_of_control);
    }

    #[test]
    fn classification_is_rederivable() {
        let l = limits();
        let a = classify(3, t(3), 26.7, &l);
        let b = classify(3, t(3), 26.7, &l.clone());
        assert_eq!(a, b);
    }
}
