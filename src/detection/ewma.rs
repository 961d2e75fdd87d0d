//! Exponentially Weighted Moving Average (EWMA) chart for detecting small shifts.
//!
//! # Algorithm
//!
//! ```text
//! z_t = λ·x_t + (1 − λ)·z_{t-1},   z_0 = T
//! ```
//!
//! Time-varying control limits at observation t (1-based):
//!
//! ```text
//! T ± L·σ·sqrt(λ / (2 − λ) · (1 − (1 − λ)^(2t)))
//! ```
//!
//! which widen towards the steady-state limits `T ± L·σ·sqrt(λ / (2 − λ))`
//! reported by [`crate::spc::ControlLimitCalculator::ewma`].
//!
//! # Parameters
//!
//! - **λ**: smoothing weight in (0, 1]. λ = 1 degenerates to a Shewhart
//!   individuals chart. Typical range: 0.05-0.25.
//! - **L**: limit width in multiples of σ. Typical: 2.7-3.0.
//!
//! # Reference
//!
//! Roberts, S.W. (1959). "Control Chart Tests Based on Geometric Moving Averages",
//! *Technometrics* 1(3), pp. 239-250.

use serde::{Deserialize, Serialize};

use crate::error::{SpcError, SpcResult};
use crate::spc::{ChartDesign, ControlLimits, Side};

/// Statistics after one EWMA observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EwmaPoint {
    /// Zero-based position in the stream.
    pub index: u64,
    pub value: f64,
    /// EWMA statistic z_t.
    pub z: f64,
    /// Time-varying upper limit at this point.
    pub ucl: f64,
    /// Time-varying lower limit at this point.
    pub lcl: f64,
    /// Side of the breached limit, if any.
    pub signal: Option<Side>,
}

/// Streaming EWMA chart.
///
/// # Examples
///
/// ```
/// use u_spc::detection::Ewma;
///
/// let ewma = Ewma::new(10.0, 1.0, 0.2, 3.0).unwrap();
/// let points = ewma.analyze(&[10.0; 25]).unwrap();
/// assert!(points.iter().all(|p| p.z == 10.0 && p.signal.is_none()));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Ewma {
    target: f64,
    sigma: f64,
    lambda: f64,
    width: f64,
    z: f64,
    /// (1 − λ)^(2t) for the last processed t.
    decay: f64,
    count: u64,
}

impl Ewma {
    /// Creates a chart with target T, process σ, weight λ, and width L.
    ///
    /// # Arguments
    ///
    /// * `target` - In-control process mean T, also the starting statistic z_0
    /// * `sigma` - Process standard deviation
    /// * `lambda` - Weight of the newest observation, in (0, 1]
    /// * `width` - Limit width L in multiples of the statistic's σ
    ///
    /// # Reference
    ///
    /// Roberts (1959), *Technometrics* 1(3). λ = 0.2 with L = 3 is sensitive
    /// to shifts of 0.5σ to 2σ.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] unless T is finite, σ is positive and finite,
    /// λ lies in (0, 1], and L is positive and finite.
    pub fn new(target: f64, sigma: f64, lambda: f64, width: f64) -> SpcResult<Self> {
        if !target.is_finite() {
            return Err(SpcError::validation("EWMA target must be finite"));
        }
        if !sigma.is_finite() || sigma <= 0.0 {
            return Err(SpcError::validation("EWMA sigma must be positive and finite"));
        }
        if !lambda.is_finite() || lambda <= 0.0 || lambda > 1.0 {
            return Err(SpcError::validation("EWMA lambda must be in (0, 1]"));
        }
        if !width.is_finite() || width <= 0.0 {
            return Err(SpcError::validation("EWMA width must be positive and finite"));
        }
        Ok(Self {
            target,
            sigma,
            lambda,
            width,
            z: target,
            decay: 1.0,
            count: 0,
        })
    }

    /// Builds the chart from EWMA [`ControlLimits`].
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if the limits carry no EWMA design or σ is zero.
    pub fn from_limits(limits: &ControlLimits) -> SpcResult<Self> {
        match limits.design {
            Some(ChartDesign::Ewma {
                target,
                lambda,
                width,
                sigma,
            }) => Self::new(target, sigma, lambda, width),
            _ => Err(SpcError::validation(format!(
                "{} limits carry no EWMA design",
                limits.chart_type
            ))),
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn lambda(&self) -> f64 {
        self.lambda
    }

    /// Current statistic (T before any observation).
    pub fn current(&self) -> f64 {
        self.z
    }

    /// Steady-state limit half-width `L·σ·sqrt(λ / (2 − λ))`.
    pub fn steady_state_half_width(&self) -> f64 {
        self.width * self.sigma * (self.lambda / (2.0 - self.lambda)).sqrt()
    }

    /// Adds one observation.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if `x` is not finite; the state is unchanged.
    pub fn update(&mut self, x: f64) -> SpcResult<EwmaPoint> {
        if !x.is_finite() {
            return Err(SpcError::validation(format!("non-finite EWMA input {x}")));
        }
        let keep = 1.0 - self.lambda;
        self.z = self.lambda * x + keep * self.z;
        self.decay *= keep * keep;

        let half_width = self.steady_state_half_width() * (1.0 - self.decay).sqrt();
        let ucl = self.target + half_width;
        let lcl = self.target - half_width;
        let signal = if self.z > ucl {
            Some(Side::Above)
        } else if self.z < lcl {
            Some(Side::Below)
        } else {
            None
        };

        let point = EwmaPoint {
            index: self.count,
            value: x,
            z: self.z,
            ucl,
            lcl,
            signal,
        };
        self.count += 1;
        Ok(point)
    }

    /// Runs `data` through a fresh copy of this chart's design.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] on the first non-finite value.
    ///
    /// # Complexity
    ///
    /// Time: O(n), Space: O(n)
    pub fn analyze(&self, data: &[f64]) -> SpcResult<Vec<EwmaPoint>> {
        let mut fresh = Self::new(self.target, self.sigma, self.lambda, self.width)?;
        data.iter().map(|&x| fresh.update(x)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EwmaParams;
    use crate::spc::ControlLimitCalculator;

    #[test]
    fn constant_series_at_target_stays_at_target() {
        let ewma = Ewma::new(10.0, 1.0, 0.2, 3.0).unwrap();
        let points = ewma.analyze(&[10.0; 50]).unwrap();
        assert_eq!(points.len(), 50);
        for p in &points {
            assert_eq!(p.z, 10.0, "z drifted at index {}", p.index);
            assert!(p.signal.is_none());
        }
    }

    #[test]
    fn symmetric_noise_does_not_signal() {
        let ewma = Ewma::new(100.0, 5.0, 0.2, 3.0).unwrap();
        let data: Vec<f64> = (0..100)
            .map(|i| if i % 2 == 0 { 101.0 } else { 99.0 })
            .collect();
        assert!(
            ewma.analyze(&data).unwrap().iter().all(|p| p.signal.is_none()),
            "±0.2σ alternation should stay inside the limits"
        );
    }

    #[test]
    fn gradual_drift_detected() {
        let ewma = Ewma::new(0.0, 1.0, 0.2, 3.0).unwrap();
        let data: Vec<f64> = (0..100).map(|i| 0.1 * i as f64).collect();
        let points = ewma.analyze(&data).unwrap();
        assert!(
            points.iter().any(|p| p.signal == Some(Side::Above)),
            "upward drift of 0.1σ per point should signal"
        );
    }

    #[test]
    fn lambda_one_is_shewhart() {
        let ewma = Ewma::new(50.0, 5.0, 1.0, 3.0).unwrap();
        let data = [50.0, 55.0, 45.0, 70.0, 30.0];
        let points = ewma.analyze(&data).unwrap();
        for (p, x) in points.iter().zip(data) {
            assert!((p.z - x).abs() < 1e-12);
            assert!((p.ucl - 65.0).abs() < 1e-12);
        }
        assert_eq!(points[3].signal, Some(Side::Above));
        assert_eq!(points[4].signal, Some(Side::Below));
    }

    #[test]
    fn first_limit_is_narrow() {
        // UCL_1 = 3 * sqrt(0.2/1.8 * (1 - 0.64)) = 0.6
        let mut ewma = Ewma::new(0.0, 1.0, 0.2, 3.0).unwrap();
        let p = ewma.update(100.0).unwrap();
        assert!((p.ucl - 0.6).abs() < 1e-12, "ucl = {}", p.ucl);
        assert!((p.z - 20.0).abs() < 1e-12);
        assert_eq!(p.signal, Some(Side::Above));
    }

    #[test]
    fn limits_widen_to_steady_state() {
        let ewma = Ewma::new(0.0, 1.0, 0.2, 3.0).unwrap();
        let points = ewma.analyze(&[0.0; 200]).unwrap();
        let steady = ewma.steady_state_half_width();
        assert!(points[0].ucl < steady, "first limit {} should be inside {steady}", points[0].ucl);
        assert!(
            (points[199].ucl - steady).abs() < 1e-9,
            "limit should converge to {steady}, got {}",
            points[199].ucl
        );
        for w in points.windows(2) {
            assert!(w[1].ucl >= w[0].ucl);
            assert!((w[1].ucl + w[1].lcl).abs() < 1e-12);
        }
    }

    #[test]
    fn smaller_lambda_responds_slower() {
        let mut data = vec![0.0; 30];
        for x in data.iter_mut().skip(10) {
            *x = 2.0;
        }
        let slow = Ewma::new(0.0, 1.0, 0.05, 3.0).unwrap().analyze(&data).unwrap();
        let fast = Ewma::new(0.0, 1.0, 0.25, 3.0).unwrap().analyze(&data).unwrap();
        assert!(
            fast[15].z > slow[15].z,
            "λ = 0.25 should track the step faster: {} vs {}",
            fast[15].z,
            slow[15].z
        );
    }

    #[test]
    fn invalid_params_rejected() {
        assert!(Ewma::new(0.0, 0.0, 0.2, 3.0).is_err());
        assert!(Ewma::new(0.0, 1.0, 0.0, 3.0).is_err());
        assert!(Ewma::new(0.0, 1.0, 1.1, 3.0).is_err());
        assert!(Ewma::new(0.0, 1.0, 0.2, -1.0).is_err());
        assert!(Ewma::new(f64::INFINITY, 1.0, 0.2, 3.0).is_err());
    }

    #[test]
    fn rejects_non_finite_input() {
        let ewma = Ewma::new(0.0, 1.0, 0.2, 3.0).unwrap();
        assert!(ewma.analyze(&[0.0, f64::NAN]).is_err());
    }

    #[test]
    fn built_from_computed_limits() {
        let params = EwmaParams {
            target: Some(10.0),
            sigma: Some(1.0),
            ..EwmaParams::default()
        };
        let limits = ControlLimitCalculator::default()
            .ewma("c".into(), &[], &params)
            .unwrap();
        let ewma = Ewma::from_limits(&limits).unwrap();
        assert!((ewma.target() - 10.0).abs() < f64::EPSILON);
        assert!((ewma.target() + ewma.steady_state_half_width() - limits.ucl).abs() < 1e-12);
    }
}
