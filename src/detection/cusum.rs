//! Tabular two-sided CUSUM for detecting small persistent mean shifts.
//!
//! # Algorithm
//!
//! With target T, slack k, and decision interval H (all in measurement
//! units), the upper and lower cumulative sums are:
//!
//! ```text
//! C⁺_t = max(0, C⁺_{t-1} + (x_t − T − k))
//! C⁻_t = max(0, C⁻_{t-1} + (T − k − x_t))
//! ```
//!
//! with `C⁺_0 = C⁻_0 = 0`. A signal fires when `C⁺_t > H` (upward shift) or
//! `C⁻_t > H` (downward shift). The chart is usually designed as `k = 0.5σ`
//! and `H = hσ` with `h = 4` or `5`.
//!
//! # Reference
//!
//! Page, E.S. (1954). "Continuous inspection schemes", *Biometrika* 41(1-2), pp. 100-115.

use serde::{Deserialize, Serialize};

use crate::error::{SpcError, SpcResult};
use crate::spc::{ChartDesign, ControlLimits, Side};

/// Statistics after one CUSUM observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CusumPoint {
    /// Zero-based position in the stream.
    pub index: u64,
    pub value: f64,
    /// Upper cumulative sum C⁺.
    pub upper: f64,
    /// Lower cumulative sum C⁻.
    pub lower: f64,
    /// Direction of the shift when either sum exceeds H. Upward wins if both do.
    pub signal: Option<Side>,
}

/// Streaming CUSUM chart.
///
/// # Examples
///
/// ```
/// use u_spc::detection::Cusum;
///
/// // T = 10, k = 0.5, H = 5
/// let mut cusum = Cusum::new(10.0, 0.5, 5.0).unwrap();
/// for _ in 0..5 {
///     assert!(cusum.update(11.0).unwrap().signal.is_none());
/// }
/// // C⁺ grows by 0.5 per point and exceeds 5 on the 11th shifted point.
/// let signals = cusum.analyze(&[11.0; 20]).unwrap();
/// assert_eq!(signals.iter().position(|p| p.signal.is_some()), Some(10));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Cusum {
    target: f64,
    slack: f64,
    threshold: f64,
    upper: f64,
    lower: f64,
    count: u64,
}

impl Cusum {
    /// Creates a chart with target T, slack k, and decision threshold H.
    ///
    /// # Arguments
    ///
    /// * `target` - In-control process mean T
    /// * `slack` - Allowance k in measurement units, typically `0.5σ`
    /// * `threshold` - Decision interval H in measurement units, typically `4σ` or `5σ`
    ///
    /// # Reference
    ///
    /// Page (1954), *Biometrika* 41(1-2). k = 0.5σ is tuned to a 1σ shift;
    /// H = 5σ gives an in-control ARL of about 465.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] unless T is finite, k is finite and
    /// non-negative, and H is finite and positive.
    pub fn new(target: f64, slack: f64, threshold: f64) -> SpcResult<Self> {
        if !target.is_finite() {
            return Err(SpcError::validation("CUSUM target must be finite"));
        }
        if !slack.is_finite() || slack < 0.0 {
            return Err(SpcError::validation(
                "CUSUM slack must be finite and non-negative",
            ));
        }
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(SpcError::validation(
                "CUSUM decision threshold must be positive and finite",
            ));
        }
        Ok(Self {
            target,
            slack,
            threshold,
            upper: 0.0,
            lower: 0.0,
            count: 0,
        })
    }

    /// Builds the chart from CUSUM [`ControlLimits`].
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if the limits carry no CUSUM design or the
    /// design has a zero threshold (zero-variance baseline).
    pub fn from_limits(limits: &ControlLimits) -> SpcResult<Self> {
        match limits.design {
            Some(ChartDesign::Cusum {
                target,
                slack,
                threshold,
                ..
            }) => Self::new(target, slack, threshold),
            _ => Err(SpcError::validation(format!(
                "{} limits carry no CUSUM design",
                limits.chart_type
            ))),
        }
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn slack(&self) -> f64 {
        self.slack
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Current `(C⁺, C⁻)`.
    pub fn sums(&self) -> (f64, f64) {
        (self.upper, self.lower)
    }

    /// Adds one observation.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if `x` is not finite; the state is unchanged.
    pub fn update(&mut self, x: f64) -> SpcResult<CusumPoint> {
        if !x.is_finite() {
            return Err(SpcError::validation(format!("non-finite CUSUM input {x}")));
        }
        self.upper = (self.upper + (x - self.target - self.slack)).max(0.0);
        self.lower = (self.lower + (self.target - self.slack - x)).max(0.0);

        let signal = if self.upper > self.threshold {
            Some(Side::Above)
        } else if self.lower > self.threshold {
            Some(Side::Below)
        } else {
            None
        };

        let point = CusumPoint {
            index: self.count,
            value: x,
            upper: self.upper,
            lower: self.lower,
            signal,
        };
        self.count += 1;
        Ok(point)
    }

    /// Restarts both sums at zero, e.g. after a corrective action.
    pub fn reset(&mut self) {
        self.upper = 0.0;
        self.lower = 0.0;
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
    pub fn analyze(&self, data: &[f64]) -> SpcResult<Vec<CusumPoint>> {
        let mut fresh = Self::new(self.target, self.slack, self.threshold)?;
        data.iter().map(|&x| fresh.update(x)).collect()
    }
}
