//! Process capability indices (Cp, Cpk, Pp, Ppk, Cpm) and sigma level.
//!
//! Short-term indices (Cp, Cpk) use the σ chosen by the caller's
//! [`SigmaEstimator`]; long-term indices (Pp, Ppk) always use the overall
//! sample standard deviation. A zero or non-finite σ never produces
//! `Infinity`: the affected indices become [`Metric::Undefined`].
//!
//! # References
//!
//! - Montgomery (2019), *Introduction to Statistical Quality Control*, 8th ed.,
//!   Chapter 8.
//! - Kane (1986), "Process Capability Indices", *Journal of Quality Technology*
//!   18(1), pp. 41--52.
//! - Chan, Cheng & Spiring (1988), "A New Measure of Process Capability: Cpm",
//!   *Journal of Quality Technology* 20(3), pp. 162--175.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::sigma_level::{sigma_level_approx, sigma_level_exact, tail_ppm};
use crate::config::{CharacteristicSpec, LimitPolicy, SigmaEstimator, SpecLimits};
use crate::error::{SpcError, SpcResult, UndefinedMetricError};
use crate::model::{self, CharacteristicId, Measurement};
use crate::spc::factors::{self, D2_MOVING_RANGE};
use crate::stats;

/// A capability figure that may be undefined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Metric {
    Defined(f64),
    /// The σ estimate does not allow the index to be computed.
    Undefined(UndefinedMetricError),
    /// The index needs a specification limit or target that is absent.
    NotApplicable,
}

impl Metric {
    pub fn value(&self) -> Option<f64> {
        match self {
            Metric::Defined(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_defined(&self) -> bool {
        matches!(self, Metric::Defined(_))
    }

    pub fn undefined_reason(&self) -> Option<UndefinedMetricError> {
        match self {
            Metric::Undefined(reason) => Some(*reason),
            _ => None,
        }
    }

    fn map(self, f: impl FnOnce(f64) -> f64) -> Metric {
        match self {
            Metric::Defined(v) => Metric::Defined(f(v)),
            other => other,
        }
    }
}

fn min_metric(a: Metric, b: Metric) -> Metric {
    match (a, b) {
        (Metric::Defined(x), Metric::Defined(y)) => Metric::Defined(x.min(y)),
        (Metric::Undefined(r), _) | (_, Metric::Undefined(r)) => Metric::Undefined(r),
        (Metric::NotApplicable, other) | (other, Metric::NotApplicable) => other,
    }
}

/// Expected nonconforming parts per million under a normal model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedPpm {
    /// Below LSL, when an LSL is given.
    pub below: Option<f64>,
    /// Above USL, when a USL is given.
    pub above: Option<f64>,
    pub total: f64,
}

/// Capability report for one characteristic.
///
/// # Index interpretation
///
/// | Index   | Value   | Interpretation                      |
/// |---------|---------|-------------------------------------|
/// | Cp/Pp   | >= 1.33 | Process is capable                  |
/// | Cpk/Ppk | >= 1.33 | Process is capable and centered     |
/// | Cpm     | >= 1.33 | Process meets Taguchi loss criterion|
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityResult {
    pub characteristic_id: CharacteristicId,
    pub lsl: Option<f64>,
    pub usl: Option<f64>,
    pub target: Option<f64>,
    pub sample_size: usize,
    pub mean: f64,
    pub estimator: SigmaEstimator,
    /// σ used for Cp/Cpk.
    pub sigma_within: f64,
    /// Overall sample σ used for Pp/Ppk.
    pub sigma_overall: f64,
    /// `(USL − LSL) / 6σ_within`; requires both limits.
    pub cp: Metric,
    /// `min(Cpu, Cpl)`, or the single one-sided value.
    pub cpk: Metric,
    pub cpu: Metric,
    pub cpl: Metric,
    pub pp: Metric,
    pub ppk: Metric,
    pub ppu: Metric,
    pub ppl: Metric,
    /// `Cp / sqrt(1 + ((μ − T) / σ_within)²)`; requires both limits.
    pub cpm: Metric,
    /// `3·Cpk + 1.5`.
    pub sigma_level: Metric,
    /// From the expected PPM beyond both limits, see
    /// [`super::sigma_level_exact`].
    pub sigma_level_exact: Metric,
    /// Expected PPM from the within σ; `None` when that σ is undefined.
    pub expected_ppm: Option<ExpectedPpm>,
    /// Why short-term indices are undefined, if they are.
    pub undefined_reason: Option<UndefinedMetricError>,
}

/// Computes process capability from samples and specification limits.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use u_spc::capability::CapabilityAnalyzer;
/// use u_spc::config::{SigmaEstimator, SpecLimits};
/// use u_spc::model::Measurement;
///
/// let now = Utc::now();
/// let samples: Vec<Measurement> = [9.5, 10.0, 10.2, 9.8, 10.1, 10.3, 9.9, 10.0]
///     .iter()
///     .map(|&v| Measurement::new(now, v))
///     .collect();
/// let spec = SpecLimits::new(Some(9.0), Some(11.0)).unwrap();
///
/// let result = CapabilityAnalyzer::default()
///     .analyze("bore".into(), &samples, &spec, SigmaEstimator::Overall)
///     .unwrap();
/// assert_eq!(result.cp, result.pp);
/// assert!(result.cpk.value().unwrap() > 1.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct CapabilityAnalyzer {
    policy: LimitPolicy,
}

impl CapabilityAnalyzer {
    pub fn new(policy: LimitPolicy) -> Self {
        Self { policy }
    }

    /// Analyzes a characteristic using its configured limits and estimator.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if the spec has no specification limits,
    /// plus everything [`Self::analyze`] returns.
    pub fn analyze_spec(
        &self,
        spec: &CharacteristicSpec,
        samples: &[Measurement],
    ) -> SpcResult<CapabilityResult> {
        let limits = spec.spec_limits()?.ok_or_else(|| {
            SpcError::validation(format!(
                "capability of {} requires LSL or USL",
                spec.characteristic_id
            ))
        })?;
        self.analyze(
            spec.characteristic_id.clone(),
            samples,
            &limits,
            spec.sigma_estimator,
        )
    }

    /// Computes all indices.
    ///
    /// # Arguments
    ///
    /// * `characteristic_id` - Copied into the result
    /// * `samples` - Measurements in stream order; subgroup ids are only read
    ///   for [`SigmaEstimator::WithinRange`]
    /// * `spec` - Specification limits, at least one side
    /// * `estimator` - Source of the within σ used for Cp/Cpk
    ///
    /// [`SigmaEstimator::WithinRange`] groups `samples` by `subgroup_id` and
    /// uses `R̄/d2`; [`SigmaEstimator::MovingRange`] uses `MR̄/1.128` over
    /// the samples in the given order.
    ///
    /// # Errors
    ///
    /// - [`SpcError::Validation`] for empty or non-finite samples, an invalid
    ///   known σ, or malformed subgroups
    /// - [`SpcError::InsufficientData`] with fewer than
    ///   `policy.min_capability_samples` samples
    pub fn analyze(
        &self,
        characteristic_id: CharacteristicId,
        samples: &[Measurement],
        spec: &SpecLimits,
        estimator: SigmaEstimator,
    ) -> SpcResult<CapabilityResult> {
        let values = model::finite_values(samples)?;
        let required = self.policy.min_capability_samples.max(2);
        if values.len() < required {
            return Err(SpcError::insufficient(
                "capability samples",
                required,
                values.len(),
            ));
        }

        let mean = stats::mean(&values)
            .ok_or_else(|| SpcError::validation("capability samples are not finite"))?;
        let sigma_overall = stats::sample_std_dev(&values)
            .ok_or_else(|| SpcError::insufficient("capability samples", 2, values.len()))?;
        let sigma_within = match estimator {
            SigmaEstimator::Overall => sigma_overall,
            SigmaEstimator::Population => stats::population_std_dev(&values)
                .ok_or_else(|| SpcError::insufficient("capability samples", 2, values.len()))?,
            SigmaEstimator::MovingRange => {
                let mr_bar = stats::mean(&stats::moving_ranges(&values))
                    .ok_or_else(|| SpcError::insufficient("capability samples", 2, values.len()))?;
                mr_bar / D2_MOVING_RANGE
            }
            SigmaEstimator::WithinRange => within_range_sigma(samples)?,
            SigmaEstimator::Known(s) => {
                if !s.is_finite() || s <= 0.0 {
                    return Err(SpcError::validation(format!(
                        "known sigma must be positive and finite, got {s}"
                    )));
                }
                s
            }
        };

        let short = Indices::compute(spec, mean, sigma_within);
        let long = Indices::compute(spec, mean, sigma_overall);

        let cpm = match (short.potential, spec.nominal()) {
            (Metric::Defined(cp), Some(t)) => {
                let ratio = (mean - t) / sigma_within;
                Metric::Defined(cp / (1.0 + ratio * ratio).sqrt())
            }
            (Metric::Undefined(r), _) => Metric::Undefined(r),
            _ => Metric::NotApplicable,
        };

        let expected_ppm = short.reason.is_none().then(|| expected_ppm(spec, mean, sigma_within));
        let exact_level = match (short.k, expected_ppm) {
            (Metric::Defined(cpk), Some(ppm)) => {
                Metric::Defined(sigma_level_exact(ppm.total, 3.0 * cpk))
            }
            (Metric::Defined(_), None) => Metric::NotApplicable,
            (other, _) => other,
        };

        if let Some(reason) = short.reason.or(long.reason) {
            warn!(
                characteristic = %characteristic_id,
                %reason,
                sigma_within,
                sigma_overall,
                "capability indices undefined"
            );
        }

        let result = CapabilityResult {
            characteristic_id,
            lsl: spec.lsl,
            usl: spec.usl,
            target: spec.target,
            sample_size: values.len(),
            mean,
            estimator,
            sigma_within,
            sigma_overall,
            cp: short.potential,
            cpk: short.k,
            cpu: short.upper,
            cpl: short.lower,
            pp: long.potential,
            ppk: long.k,
            ppu: long.upper,
            ppl: long.lower,
            cpm,
            sigma_level: short.k.map(sigma_level_approx),
            sigma_level_exact: exact_level,
            expected_ppm,
            undefined_reason: short.reason,
        };
        debug!(
            characteristic = %result.characteristic_id,
            n = result.sample_size,
            mean,
            sigma_within,
            sigma_overall,
            cpk = ?result.cpk.value(),
            ppk = ?result.ppk.value(),
            "computed capability"
        );
        Ok(result)
    }
}

/// One family of indices (C or P) for a given σ.
struct Indices {
    potential: Metric,
    k: Metric,
    upper: Metric,
    lower: Metric,
    reason: Option<UndefinedMetricError>,
}

impl Indices {
    fn compute(spec: &SpecLimits, mean: f64, sigma: f64) -> Self {
        let reason = if !sigma.is_finite() {
            Some(UndefinedMetricError::NonFiniteSigma)
        } else if sigma == 0.0 {
            Some(UndefinedMetricError::ZeroVariance)
        } else {
            None
        };
        let metric = |v: Option<f64>| match (v, reason) {
            (None, _) => Metric::NotApplicable,
            (Some(_), Some(r)) => Metric::Undefined(r),
            (Some(v), None) => Metric::Defined(v),
        };

        let upper = metric(spec.usl.map(|u| (u - mean) / (3.0 * sigma)));
        let lower = metric(spec.lsl.map(|l| (mean - l) / (3.0 * sigma)));
        let potential = metric(spec.usl.zip(spec.lsl).map(|(u, l)| (u - l) / (6.0 * sigma)));
        Self {
            potential,
            k: min_metric(upper, lower),
            upper,
            lower,
            reason,
        }
    }
}

fn expected_ppm(spec: &SpecLimits, mean: f64, sigma: f64) -> ExpectedPpm {
    let below = spec.lsl.map(|l| tail_ppm((mean - l) / sigma));
    let above = spec.usl.map(|u| tail_ppm((u - mean) / sigma));
    ExpectedPpm {
        below,
        above,
        total: below.unwrap_or(0.0) + above.unwrap_or(0.0),
    }
}

/// `R̄ / d2` over equal-size subgroups.
fn within_range_sigma(samples: &[Measurement]) -> SpcResult<f64> {
    let subgroups = model::group_subgroups(samples)?;
    let n = subgroups[0].size();
    if let Some(bad) = subgroups.iter().find(|g| g.size() != n) {
        return Err(SpcError::validation(format!(
            "within-range sigma needs equal subgroup sizes: {} has {}, expected {n}",
            bad.id(),
            bad.size()
        )));
    }
    let f = factors::range_factors(n)?;
    let ranges: Vec<f64> = subgroups.iter().map(|g| g.range()).collect();
    let r_bar =
        stats::mean(&ranges).ok_or_else(|| SpcError::validation("subgroup ranges are not finite"))?;
    Ok(r_bar / f.d2)
}
