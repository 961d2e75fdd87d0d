//! Control limit calculation from baseline data.
//!
//! # Charts
//!
//! | Chart       | Center line | Limits                              | σ (zone width)     |
//! |-------------|-------------|-------------------------------------|--------------------|
//! | X-bar/R     | X-double-bar| CL ± A2·R̄                           | A2·R̄ / 3           |
//! | I-MR        | X-bar       | CL ± 3·MR̄/1.128                     | MR̄ / 1.128         |
//! | CUSUM       | 0           | ± h·σ (decision interval)           | process σ          |
//! | EWMA        | T           | T ± L·σ·sqrt(λ/(2−λ)) (steady state)| σ·sqrt(λ/(2−λ))    |
//! | Pre-control | (LSL+USL)/2 | LSL, USL                            | (USL−LSL) / 6      |
//!
//! A baseline whose dispersion is exactly zero yields limits collapsed onto the
//! center line with `zero_variance = true`; this is reported, not an error.
//!
//! # References
//!
//! - Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.,
//!   Chapters 6 and 9.
//! - ASTM E2587, Standard Practice for Use of Control Charts
//! - Shainin, D. (1984). "Better than good old X̄ and R charts", *ASQC Quality Congress*.

use tracing::{debug, warn};

use super::chart::{ChartDesign, ChartType, ControlLimits, DispersionLimits};
use super::factors::{self, D2_MOVING_RANGE, D4_MOVING_RANGE};
use crate::config::{CharacteristicSpec, ChartConfig, CusumParams, EwmaParams, LimitPolicy, SpecLimits};
use crate::error::{SpcError, SpcResult};
use crate::model::{self, CharacteristicId, Measurement, Subgroup};
use crate::stats;

/// Computes [`ControlLimits`] from baseline data.
///
/// Every method is a pure function of its arguments: identical baselines
/// produce bit-identical limits.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use u_spc::model::Measurement;
/// use u_spc::spc::ControlLimitCalculator;
///
/// let now = Utc::now();
/// let baseline: Vec<Measurement> = [10.0, 12.0, 11.0, 13.0, 10.0, 14.0]
///     .iter()
///     .map(|&v| Measurement::new(now, v))
///     .collect();
/// let limits = ControlLimitCalculator::default()
///     .individuals("torque".into(), &baseline)
///     .unwrap();
/// assert!(limits.ucl > limits.center_line);
/// assert!(!limits.zero_variance);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ControlLimitCalculator {
    policy: LimitPolicy,
}

impl ControlLimitCalculator {
    pub fn new(policy: LimitPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &LimitPolicy {
        &self.policy
    }

    /// Computes limits for a characteristic spec from its baseline measurements.
    ///
    /// X-bar/R baselines are grouped by `subgroup_id`; pre-control ignores the
    /// baseline and uses the specification limits.
    ///
    /// # Errors
    ///
    /// - [`SpcError::Validation`] for an invalid spec or malformed baseline
    /// - [`SpcError::InsufficientData`] when the baseline is below the policy minimum
    pub fn compute(
        &self,
        spec: &CharacteristicSpec,
        baseline: &[Measurement],
    ) -> SpcResult<ControlLimits> {
        spec.validate()?;
        let id = spec.characteristic_id.clone();
        match &spec.chart {
            ChartConfig::XbarR { subgroup_size } => {
                let subgroups = model::group_subgroups(baseline)?;
                self.xbar_r(id, &subgroups, *subgroup_size)
            }
            ChartConfig::IMr => self.individuals(id, baseline),
            ChartConfig::Cusum(params) => self.cusum(id, baseline, params),
            ChartConfig::Ewma(params) => self.ewma(id, baseline, params),
            ChartConfig::PreControl => {
                let limits = spec
                    .spec_limits()?
                    .ok_or_else(|| SpcError::validation("pre-control requires LSL and USL"))?;
                self.pre_control(id, &limits)
            }
        }
    }

    /// X-bar/R limits: `UCL/LCL = X-double-bar ± A2 · R̄`.
    ///
    /// The companion R chart limits (`D3·R̄`, `D4·R̄`) are attached as
    /// [`ControlLimits::dispersion`].
    ///
    /// # Errors
    ///
    /// - [`SpcError::Validation`] if `subgroup_size` is outside 2..=25 or any
    ///   subgroup has a different size
    /// - [`SpcError::InsufficientData`] with fewer than `policy.min_subgroups` subgroups
    pub fn xbar_r(
        &self,
        characteristic_id: CharacteristicId,
        subgroups: &[Subgroup],
        subgroup_size: usize,
    ) -> SpcResult<ControlLimits> {
        let f = factors::range_factors(subgroup_size)?;
        if let Some(bad) = subgroups.iter().find(|g| g.size() != subgroup_size) {
            return Err(SpcError::validation(format!(
                "subgroup {} has {} measurements, expected {subgroup_size}",
                bad.id(),
                bad.size()
            )));
        }
        if subgroups.len() < self.policy.min_subgroups {
            return Err(SpcError::insufficient(
                "X-bar/R baseline subgroups",
                self.policy.min_subgroups,
                subgroups.len(),
            ));
        }

        let means: Vec<f64> = subgroups.iter().map(Subgroup::mean).collect();
        let ranges: Vec<f64> = subgroups.iter().map(Subgroup::range).collect();
        let grand_mean = stats::mean(&means)
            .ok_or_else(|| SpcError::validation("subgroup means are not finite"))?;
        let r_bar = stats::mean(&ranges)
            .ok_or_else(|| SpcError::validation("subgroup ranges are not finite"))?;

        let half_width = f.a2 * r_bar;
        let mut limits = ControlLimits::three_sigma(
            characteristic_id,
            ChartType::XbarR,
            grand_mean,
            half_width / 3.0,
        )
        .with_sigma_within(r_bar / f.d2)
        .with_dispersion(DispersionLimits {
            center_line: r_bar,
            ucl: f.d4 * r_bar,
            lcl: f.d3 * r_bar,
        });
        limits.ucl = grand_mean + half_width;
        limits.lcl = grand_mean - half_width;

        debug!(
            characteristic = %limits.characteristic_id,
            subgroups = subgroups.len(),
            n = subgroup_size,
            grand_mean,
            r_bar,
            ucl = limits.ucl,
            lcl = limits.lcl,
            "computed X-bar/R limits"
        );
        warn_if_flat(&limits);
        Ok(limits)
    }

    /// Individuals limits: `σ̂ = MR̄ / 1.128`, `UCL/LCL = X-bar ± 3σ̂`.
    ///
    /// The companion MR chart limits (`0`, `3.267·MR̄`) are attached as
    /// [`ControlLimits::dispersion`].
    ///
    /// # Errors
    ///
    /// - [`SpcError::Validation`] if the series is empty or non-finite
    /// - [`SpcError::InsufficientData`] with fewer than `policy.min_individuals` points
    pub fn individuals(
        &self,
        characteristic_id: CharacteristicId,
        baseline: &[Measurement],
    ) -> SpcResult<ControlLimits> {
        let values = model::finite_values(baseline)?;
        let (x_bar, mr_bar) = self.mean_and_mr_bar(&values, "I-MR baseline points")?;
        let sigma = mr_bar / D2_MOVING_RANGE;

        let limits = ControlLimits::three_sigma(characteristic_id, ChartType::IMr, x_bar, sigma)
            .with_sigma_within(sigma)
            .with_dispersion(DispersionLimits {
                center_line: mr_bar,
                ucl: D4_MOVING_RANGE * mr_bar,
                lcl: 0.0,
            });

        debug!(
            characteristic = %limits.characteristic_id,
            points = values.len(),
            x_bar,
            mr_bar,
            ucl = limits.ucl,
            lcl = limits.lcl,
            "computed I-MR limits"
        );
        warn_if_flat(&limits);
        Ok(limits)
    }

    /// CUSUM design: decision interval `H = h·σ` around zero.
    ///
    /// `T` defaults to the baseline mean and `σ` to `MR̄ / 1.128`; when both
    /// are supplied the baseline may be empty. Slack defaults to `0.5σ`.
    ///
    /// # Errors
    ///
    /// - [`SpcError::Validation`] for invalid parameters or a malformed baseline
    /// - [`SpcError::InsufficientData`] when defaults must be estimated from a
    ///   baseline shorter than `policy.min_individuals`
    pub fn cusum(
        &self,
        characteristic_id: CharacteristicId,
        baseline: &[Measurement],
        params: &CusumParams,
    ) -> SpcResult<ControlLimits> {
        let (target, sigma) =
            self.target_and_sigma(baseline, params.target, params.sigma, "CUSUM baseline points")?;
        let slack = params.slack.unwrap_or(0.5 * sigma);
        let threshold = params.decision_interval * sigma;

        let limits = ControlLimits {
            characteristic_id,
            chart_type: ChartType::Cusum,
            center_line: 0.0,
            ucl: threshold,
            lcl: -threshold,
            sigma,
            sigma_within: Some(sigma),
            zero_variance: sigma == 0.0,
            dispersion: None,
            design: None,
        }
        .with_design(ChartDesign::Cusum {
            target,
            slack,
            threshold,
            sigma,
        });

        debug!(
            characteristic = %limits.characteristic_id,
            target,
            sigma,
            slack,
            threshold,
            "computed CUSUM design"
        );
        warn_if_flat(&limits);
        Ok(limits)
    }

    /// EWMA steady-state limits: `T ± L·σ·sqrt(λ / (2 − λ))`.
    ///
    /// The time-varying limits for early points are produced by
    /// [`crate::detection::Ewma`]. Defaults follow [`Self::cusum`].
    ///
    /// # Errors
    ///
    /// Same as [`Self::cusum`].
    pub fn ewma(
        &self,
        characteristic_id: CharacteristicId,
        baseline: &[Measurement],
        params: &EwmaParams,
    ) -> SpcResult<ControlLimits> {
        if !params.lambda.is_finite() || params.lambda <= 0.0 || params.lambda > 1.0 {
            return Err(SpcError::validation("EWMA lambda must be in (0, 1]"));
        }
        if !params.width.is_finite() || params.width <= 0.0 {
            return Err(SpcError::validation("EWMA width must be positive and finite"));
        }
        let (target, sigma) =
            self.target_and_sigma(baseline, params.target, params.sigma, "EWMA baseline points")?;
        let stat_sigma = sigma * (params.lambda / (2.0 - params.lambda)).sqrt();
        let half_width = params.width * stat_sigma;

        let limits = ControlLimits {
            characteristic_id,
            chart_type: ChartType::Ewma,
            center_line: target,
            ucl: target + half_width,
            lcl: target - half_width,
            sigma: stat_sigma,
            sigma_within: Some(sigma),
            zero_variance: sigma == 0.0,
            dispersion: None,
            design: None,
        }
        .with_design(ChartDesign::Ewma {
            target,
            lambda: params.lambda,
            width: params.width,
            sigma,
        });

        debug!(
            characteristic = %limits.characteristic_id,
            target,
            sigma,
            lambda = params.lambda,
            ucl = limits.ucl,
            lcl = limits.lcl,
            "computed EWMA limits"
        );
        warn_if_flat(&limits);
        Ok(limits)
    }

    /// Pre-control limits derived from the tolerance alone.
    ///
    /// `ucl`/`lcl` are the specification limits and `σ = (USL − LSL) / 6`.
    /// The green/yellow/red zones are available through
    /// [`super::PreControlZones::from_limits`].
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] unless both LSL and USL are present.
    pub fn pre_control(
        &self,
        characteristic_id: CharacteristicId,
        spec: &SpecLimits,
    ) -> SpcResult<ControlLimits> {
        let (lsl, usl) = match (spec.lsl, spec.usl) {
            (Some(l), Some(u)) => (l, u),
            _ => return Err(SpcError::validation("pre-control requires both LSL and USL")),
        };
        let tolerance = usl - lsl;
        let mut limits = ControlLimits::three_sigma(
            characteristic_id,
            ChartType::PreControl,
            (lsl + usl) / 2.0,
            tolerance / 6.0,
        )
        .with_design(ChartDesign::PreControl { lsl, usl });
        limits.ucl = usl;
        limits.lcl = lsl;

        debug!(
            characteristic = %limits.characteristic_id,
            lsl,
            usl,
            "computed pre-control zones"
        );
        Ok(limits)
    }

    fn mean_and_mr_bar(&self, values: &[f64], what: &'static str) -> SpcResult<(f64, f64)> {
        if values.len() < self.policy.min_individuals {
            return Err(SpcError::insufficient(
                what,
                self.policy.min_individuals,
                values.len(),
            ));
        }
        let x_bar =
            stats::mean(values).ok_or_else(|| SpcError::validation("baseline is not finite"))?;
        let mr_bar = stats::mean(&stats::moving_ranges(values))
            .ok_or_else(|| SpcError::insufficient(what, 2, values.len()))?;
        Ok((x_bar, mr_bar))
    }

    fn target_and_sigma(
        &self,
        baseline: &[Measurement],
        target: Option<f64>,
        sigma: Option<f64>,
        what: &'static str,
    ) -> SpcResult<(f64, f64)> {
        if let (Some(t), Some(s)) = (target, sigma) {
            return Ok((t, s));
        }
        let values = model::finite_values(baseline).map_err(|_| {
            SpcError::insufficient(what, self.policy.min_individuals, baseline.len())
        })?;
        let (x_bar, mr_bar) = self.mean_and_mr_bar(&values, what)?;
        Ok((
            target.unwrap_or(x_bar),
            sigma.unwrap_or(mr_bar / D2_MOVING_RANGE),
        ))
    }
}

fn warn_if_flat(limits: &ControlLimits) {
    if limits.zero_variance {
        warn!(
            characteristic = %limits.characteristic_id,
            chart = %limits.chart_type,
            center_line = limits.center_line,
            "baseline has zero variance; limits collapsed to the center line"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{series, subgrouped, t};

    fn calc() -> ControlLimitCalculator {
        ControlLimitCalculator::default()
    }

    /// 20 subgroups of n=5, each with mean 10.00 and range 0.04.
    fn flat_mean_baseline() -> Vec<Subgroup> {
        (0..20)
            .map(|i| {
                Subgroup::new(format!("g{i}"), vec![10.02, 9.98, 10.0, 10.0, 10.0], t(i)).unwrap()
            })
            .collect()
    }

    #[test]
    fn xbar_r_reference_scenario() {
        let limits = calc()
            .xbar_r("bore".into(), &flat_mean_baseline(), 5)
            .unwrap();
        assert!((limits.center_line - 10.0).abs() < 1e-12);
        // UCL = 10 + 0.577 * 0.04 = 10.02308
        assert!((limits.ucl - 10.023).abs() < 0.0005, "ucl = {}", limits.ucl);
        assert!((limits.lcl - 9.977).abs() < 0.0005, "lcl = {}", limits.lcl);
        assert!(!limits.zero_variance);

        let r = limits.dispersion.unwrap();
        assert!((r.center_line - 0.04).abs() < 1e-12);
        assert!((r.ucl - 2.114 * 0.04).abs() < 1e-12);
        assert!(r.lcl.abs() < f64::EPSILON);
        // sigma_within = R̄ / d2
        assert!((limits.sigma_within.unwrap() - 0.04 / 2.326).abs() < 1e-12);
    }

    #[test]
    fn xbar_r_textbook_values() {
        // Subgroup means 71.0, 54.5, 52.5, 63.0, 57.25; ranges 35, 54, 51, 36, 71.
        let data = [
            72.0, 84.0, 79.0, 49.0, 56.0, 87.0, 33.0, 42.0, 55.0, 73.0, 22.0, 60.0, 44.0, 80.0,
            54.0, 74.0, 97.0, 26.0, 48.0, 58.0,
        ];
        let calc = ControlLimitCalculator::new(LimitPolicy {
            min_subgroups: 5,
            ..LimitPolicy::default()
        });
        let groups = model::group_subgroups(&subgrouped(&data, 4)).unwrap();
        let limits = calc.xbar_r("c".into(), &groups, 4).unwrap();

        let grand_mean = (71.0 + 54.5 + 52.5 + 63.0 + 57.25) / 5.0;
        let r_bar = (35.0 + 54.0 + 51.0 + 36.0 + 71.0) / 5.0;
        assert!((limits.center_line - grand_mean).abs() < 1e-9);
        assert!((limits.ucl - (grand_mean + 0.729 * r_bar)).abs() < 1e-9);
        assert!((limits.sigma - 0.729 * r_bar / 3.0).abs() < 1e-9);
    }

    #[test]
    fn xbar_r_insufficient_subgroups() {
        let groups: Vec<Subgroup> = flat_mean_baseline().into_iter().take(19).collect();
        let err = calc().xbar_r("c".into(), &groups, 5).unwrap_err();
        assert_eq!(
            err,
            SpcError::InsufficientData {
                what: "X-bar/R baseline subgroups",
                required: 20,
                actual: 19
            }
        );
    }

    #[test]
    fn xbar_r_rejects_mismatched_subgroup() {
        let mut groups = flat_mean_baseline();
        groups.push(Subgroup::new("odd", vec![1.0, 2.0], t(99)).unwrap());
        assert!(matches!(
            calc().xbar_r("c".into(), &groups, 5),
            Err(SpcError::Validation(_))
        ));
    }

    #[test]
    fn xbar_r_rejects_out_of_table_size() {
        assert!(matches!(
            calc().xbar_r("c".into(), &flat_mean_baseline(), 26),
            Err(SpcError::Validation(_))
        ));
    }

    #[test]
    fn xbar_r_zero_range_flags_zero_variance() {
        let groups: Vec<Subgroup> = (0..20)
            .map(|i| Subgroup::new(format!("g{i}"), vec![10.0; 3], t(i)).unwrap())
            .collect();
        let limits = calc().xbar_r("c".into(), &groups, 3).unwrap();
        assert!(limits.zero_variance);
        assert_eq!(limits.ucl, limits.center_line);
        assert_eq!(limits.lcl, limits.center_line);
    }

    #[test]
    fn individuals_e2_factor() {
        // X-bar = 100, MR-bar = 10, UCL = 100 + 3 * 10 / 1.128 = 126.596
        let limits = calc().individuals("c".into(), &series(&[95.0, 105.0])).unwrap();
        assert!((limits.center_line - 100.0).abs() < f64::EPSILON);
        assert!((limits.ucl - 126.596).abs() < 0.01, "ucl = {}", limits.ucl);
        assert!((limits.lcl - 73.404).abs() < 0.01);
        let mr = limits.dispersion.unwrap();
        assert!((mr.ucl - 32.67).abs() < 1e-9);
    }

    #[test]
    fn individuals_needs_two_points() {
        assert!(matches!(
            calc().individuals("c".into(), &series(&[1.0])),
            Err(SpcError::InsufficientData { required: 2, actual: 1, .. })
        ));
        assert!(matches!(
            calc().individuals("c".into(), &[]),
            Err(SpcError::Validation(_))
        ));
    }

    #[test]
    fn individuals_constant_series_is_zero_variance() {
        let limits = calc().individuals("c".into(), &series(&[4.0; 10])).unwrap();
        assert!(limits.zero_variance);
        assert_eq!(limits.sigma, 0.0);
    }

    #[test]
    fn limits_are_deterministic() {
        let baseline = series(&[10.1, 9.7, 10.4, 10.0, 9.9, 10.3, 9.6, 10.2]);
        let a = calc().individuals("c".into(), &baseline).unwrap();
        let b = calc().individuals("c".into(), &baseline).unwrap();
        assert_eq!(a.ucl.to_bits(), b.ucl.to_bits());
        assert_eq!(a.lcl.to_bits(), b.lcl.to_bits());
        assert_eq!(a.center_line.to_bits(), b.center_line.to_bits());
        assert_eq!(a.sigma.to_bits(), b.sigma.to_bits());
    }

    #[test]
    fn cusum_defaults_from_baseline() {
        let baseline = series(&[9.0, 11.0, 9.0, 11.0]);
        let limits = calc()
            .cusum("c".into(), &baseline, &CusumParams::default())
            .unwrap();
        // MR-bar = 2, sigma = 2 / 1.128
        let sigma = 2.0 / 1.128;
        assert!((limits.sigma - sigma).abs() < 1e-12);
        assert!((limits.ucl - 5.0 * sigma).abs() < 1e-12);
        assert!((limits.lcl + 5.0 * sigma).abs() < 1e-12);
        match limits.design.unwrap() {
            ChartDesign::Cusum { target, slack, .. } => {
                assert!((target - 10.0).abs() < 1e-12);
                assert!((slack - 0.5 * sigma).abs() < 1e-12);
            }
            other => panic!("unexpected design {other:?}"),
        }
    }

    #[test]
    fn cusum_known_params_need_no_baseline() {
        let params = CusumParams {
            target: Some(5.0),
            sigma: Some(0.1),
            ..CusumParams::default()
        };
        let limits = calc().cusum("c".into(), &[], &params).unwrap();
        assert!((limits.ucl - 0.5).abs() < 1e-12);

        let partial = CusumParams {
            target: Some(5.0),
            ..CusumParams::default()
        };
        assert!(matches!(
            calc().cusum("c".into(), &[], &partial),
            Err(SpcError::InsufficientData { .. })
        ));
    }

    #[test]
    fn ewma_steady_state_limits() {
        let params = EwmaParams {
            lambda: 0.2,
            width: 3.0,
            target: Some(10.0),
            sigma: Some(1.0),
        };
        let limits = calc().ewma("c".into(), &[], &params).unwrap();
        // sqrt(0.2 / 1.8) = 1/3
        assert!((limits.ucl - 11.0).abs() < 1e-12, "ucl = {}", limits.ucl);
        assert!((limits.lcl - 9.0).abs() < 1e-12);
        assert!((limits.sigma - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn pre_control_from_spec() {
        let spec = SpecLimits::new(Some(9.0), Some(11.0)).unwrap();
        let limits = calc().pre_control("c".into(), &spec).unwrap();
        assert!((limits.center_line - 10.0).abs() < 1e-12);
        assert!((limits.ucl - 11.0).abs() < 1e-12);
        assert!((limits.lcl - 9.0).abs() < 1e-12);
        assert!((limits.sigma - 2.0 / 6.0).abs() < 1e-12);

        let one_sided = SpecLimits::new(None, Some(11.0)).unwrap();
        assert!(calc().pre_control("c".into(), &one_sided).is_err());
    }

    #[test]
    fn compute_dispatches_on_chart() {
        let spec = CharacteristicSpec::new("bore", ChartConfig::XbarR { subgroup_size: 5 });
        let data: Vec<f64> = (0..100)
            .map(|i| 10.0 + [0.02, -0.02, 0.0, 0.01, -0.01][i % 5])
            .collect();
        let limits = calc().compute(&spec, &subgrouped(&data, 5)).unwrap();
        assert_eq!(limits.chart_type, ChartType::XbarR);
        assert!((limits.center_line - 10.0).abs() < 1e-9);

        let pc = CharacteristicSpec::new("gap", ChartConfig::PreControl)
            .with_spec_limits(Some(1.0), Some(2.0));
        let limits = calc().compute(&pc, &[]).unwrap();
        assert_eq!(limits.chart_type, ChartType::PreControl);
    }

    #[test]
    fn compute_rejects_invalid_spec_before_computing() {
        let spec = CharacteristicSpec::new("bore", ChartConfig::IMr)
            .with_spec_limits(Some(2.0), Some(1.0));
        assert!(matches!(
            calc().compute(&spec, &series(&[1.0, 2.0, 3.0])),
            Err(SpcError::Validation(_))
        ));
    }
}
