//! Engine and characteristic configuration.
//!
//! Configuration is plain serde data, usually loaded from YAML:
//!
//! ```yaml
//! policy:
//!   min_subgroups: 20
//! characteristics:
//!   - characteristic_id: bore-diameter
//!     chart:
//!       type: xbar_r
//!       subgroup_size: 5
//!     lsl: 9.95
//!     usl: 10.05
//!     sigma_estimator: within_range
//!   - characteristic_id: torque
//!     chart:
//!       type: ewma
//!       lambda: 0.2
//!       width: 3.0
//!     usl: 12.0
//! ```

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{SpcError, SpcResult};
use crate::model::CharacteristicId;
use crate::spc::{factors, ChartType, RuleSet};

/// Minimum data requirements applied by the calculators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitPolicy {
    /// Minimum baseline subgroups for X-bar/R limits (default: 20).
    pub min_subgroups: usize,
    /// Minimum baseline observations for I-MR, CUSUM, and EWMA limits (default: 2).
    pub min_individuals: usize,
    /// Minimum samples for capability analysis (default: 2, never less than 2).
    pub min_capability_samples: usize,
}

impl Default for LimitPolicy {
    fn default() -> Self {
        Self {
            min_subgroups: 20,
            min_individuals: 2,
            min_capability_samples: 2,
        }
    }
}

impl LimitPolicy {
    fn validate(&self) -> SpcResult<()> {
        if self.min_subgroups == 0 {
            return Err(SpcError::Config("min_subgroups must be at least 1".into()));
        }
        if self.min_individuals < 2 {
            return Err(SpcError::Config(
                "min_individuals must be at least 2 (one moving range)".into(),
            ));
        }
        if self.min_capability_samples < 2 {
            return Err(SpcError::Config(
                "min_capability_samples must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

/// CUSUM chart parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CusumParams {
    /// Target mean T. Defaults to the baseline mean.
    #[serde(default)]
    pub target: Option<f64>,
    /// Slack (allowance) k in measurement units. Defaults to 0.5σ.
    #[serde(default)]
    pub slack: Option<f64>,
    /// Decision interval h in multiples of σ (default: 5).
    #[serde(default = "default_decision_interval")]
    pub decision_interval: f64,
    /// Known process σ. Defaults to the MR̄/d2 estimate from the baseline.
    #[serde(default)]
    pub sigma: Option<f64>,
}

fn default_decision_interval() -> f64 {
    5.0
}

impl Default for CusumParams {
    fn default() -> Self {
        Self {
            target: None,
            slack: None,
            decision_interval: default_decision_interval(),
            sigma: None,
        }
    }
}

/// EWMA chart parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EwmaParams {
    /// Smoothing weight λ in (0, 1] (default: 0.2).
    #[serde(default = "default_lambda")]
    pub lambda: f64,
    /// Limit width L in multiples of σ (default: 3).
    #[serde(default = "default_width")]
    pub width: f64,
    /// Target mean T (z_0). Defaults to the baseline mean.
    #[serde(default)]
    pub target: Option<f64>,
    /// Known process σ. Defaults to the MR̄/d2 estimate from the baseline.
    #[serde(default)]
    pub sigma: Option<f64>,
}

fn default_lambda() -> f64 {
    0.2
}

fn default_width() -> f64 {
    3.0
}

impl Default for EwmaParams {
    fn default() -> Self {
        Self {
            lambda: default_lambda(),
            width: default_width(),
            target: None,
            sigma: None,
        }
    }
}

/// Chart type together with its type-specific parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChartConfig {
    XbarR { subgroup_size: usize },
    IMr,
    Cusum(CusumParams),
    Ewma(EwmaParams),
    PreControl,
}

impl ChartConfig {
    pub fn chart_type(&self) -> ChartType {
        match self {
            ChartConfig::XbarR { .. } => ChartType::XbarR,
            ChartConfig::IMr => ChartType::IMr,
            ChartConfig::Cusum(_) => ChartType::Cusum,
            ChartConfig::Ewma(_) => ChartType::Ewma,
            ChartConfig::PreControl => ChartType::PreControl,
        }
    }

    fn validate(&self) -> SpcResult<()> {
        match self {
            ChartConfig::XbarR { subgroup_size } => {
                factors::range_factors(*subgroup_size)?;
            }
            ChartConfig::IMr | ChartConfig::PreControl => {}
            ChartConfig::Cusum(p) => {
                check_optional_finite("CUSUM target", p.target)?;
                if let Some(k) = p.slack {
                    if !k.is_finite() || k < 0.0 {
                        return Err(SpcError::validation(
                            "CUSUM slack must be finite and non-negative",
                        ));
                    }
                }
                if !p.decision_interval.is_finite() || p.decision_interval <= 0.0 {
                    return Err(SpcError::validation(
                        "CUSUM decision interval must be positive and finite",
                    ));
                }
                check_optional_sigma("CUSUM sigma", p.sigma)?;
            }
            ChartConfig::Ewma(p) => {
                if !p.lambda.is_finite() || p.lambda <= 0.0 || p.lambda > 1.0 {
                    return Err(SpcError::validation("EWMA lambda must be in (0, 1]"));
                }
                if !p.width.is_finite() || p.width <= 0.0 {
                    return Err(SpcError::validation(
                        "EWMA width must be positive and finite",
                    ));
                }
                check_optional_finite("EWMA target", p.target)?;
                check_optional_sigma("EWMA sigma", p.sigma)?;
            }
        }
        Ok(())
    }
}

fn check_optional_finite(name: &str, value: Option<f64>) -> SpcResult<()> {
    match value {
        Some(v) if !v.is_finite() => Err(SpcError::validation(format!("{name} must be finite"))),
        _ => Ok(()),
    }
}

fn check_optional_sigma(name: &str, value: Option<f64>) -> SpcResult<()> {
    match value {
        Some(s) if !s.is_finite() || s <= 0.0 => Err(SpcError::validation(format!(
            "{name} must be positive and finite"
        ))),
        _ => Ok(()),
    }
}

/// Which σ estimator feeds the short-term indices (Cp/Cpk).
///
/// Pp/Ppk always use the overall sample standard deviation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigmaEstimator {
    /// Overall sample standard deviation (n − 1). Cp == Pp.
    #[default]
    Overall,
    /// Population standard deviation (n).
    Population,
    /// R̄/d2 from equal-size subgroups.
    WithinRange,
    /// MR̄/1.128 from consecutive individuals.
    MovingRange,
    /// A σ supplied by the caller (e.g. from an earlier study).
    Known(f64),
}

/// Specification limits of a characteristic.
///
/// # Invariants
///
/// - At least one of `lsl` / `usl` is present
/// - `lsl < usl` when both are present
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpecLimits {
    pub lsl: Option<f64>,
    pub usl: Option<f64>,
    pub target: Option<f64>,
}

impl SpecLimits {
    /// Validates and builds specification limits.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if both limits are absent, any value is
    /// non-finite, or `lsl >= usl`.
    pub fn new(lsl: Option<f64>, usl: Option<f64>) -> SpcResult<Self> {
        if lsl.is_none() && usl.is_none() {
            return Err(SpcError::validation(
                "at least one specification limit (LSL or USL) is required",
            ));
        }
        check_optional_finite("LSL", lsl)?;
        check_optional_finite("USL", usl)?;
        if let (Some(l), Some(u)) = (lsl, usl) {
            if l >= u {
                return Err(SpcError::validation(format!(
                    "LSL ({l}) must be less than USL ({u})"
                )));
            }
        }
        Ok(Self {
            lsl,
            usl,
            target: None,
        })
    }

    /// Sets the target (nominal) value.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if `target` is non-finite.
    pub fn with_target(mut self, target: f64) -> SpcResult<Self> {
        check_optional_finite("target", Some(target))?;
        self.target = Some(target);
        Ok(self)
    }

    /// The explicit target, or the midpoint of a two-sided specification.
    pub fn nominal(&self) -> Option<f64> {
        self.target.or(match (self.lsl, self.usl) {
            (Some(l), Some(u)) => Some((l + u) / 2.0),
            _ => None,
        })
    }
}

/// Baseline/specification input for one characteristic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicSpec {
    pub characteristic_id: CharacteristicId,
    pub chart: ChartConfig,
    #[serde(default)]
    pub lsl: Option<f64>,
    #[serde(default)]
    pub usl: Option<f64>,
    #[serde(default)]
    pub target: Option<f64>,
    #[serde(default)]
    pub sigma_estimator: SigmaEstimator,
    #[serde(default)]
    pub rules: RuleSet,
}

impl CharacteristicSpec {
    pub fn new(characteristic_id: impl Into<CharacteristicId>, chart: ChartConfig) -> Self {
        Self {
            characteristic_id: characteristic_id.into(),
            chart,
            lsl: None,
            usl: None,
            target: None,
            sigma_estimator: SigmaEstimator::default(),
            rules: RuleSet::default(),
        }
    }

    pub fn with_spec_limits(mut self, lsl: Option<f64>, usl: Option<f64>) -> Self {
        self.lsl = lsl;
        self.usl = usl;
        self
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_sigma_estimator(mut self, estimator: SigmaEstimator) -> Self {
        self.sigma_estimator = estimator;
        self
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    /// Specification limits, or `None` if neither LSL nor USL is configured.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if configured limits are inconsistent.
    pub fn spec_limits(&self) -> SpcResult<Option<SpecLimits>> {
        if self.lsl.is_none() && self.usl.is_none() {
            return Ok(None);
        }
        let limits = SpecLimits::new(self.lsl, self.usl)?;
        match self.target {
            Some(t) => limits.with_target(t).map(Some),
            None => Ok(Some(limits)),
        }
    }

    /// Checks the spec for internal consistency.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] describing the first inconsistency found.
    pub fn validate(&self) -> SpcResult<()> {
        if self.characteristic_id.as_str().trim().is_empty() {
            return Err(SpcError::validation("characteristic_id must not be empty"));
        }
        self.chart.validate()?;
        let spec = self.spec_limits()?;
        if self.chart.chart_type() == ChartType::PreControl {
            match spec {
                Some(SpecLimits {
                    lsl: Some(_),
                    usl: Some(_),
                    ..
                }) => {}
                _ => {
                    return Err(SpcError::validation(
                        "pre-control requires both LSL and USL",
                    ))
                }
            }
        }
        if let SigmaEstimator::Known(s) = self.sigma_estimator {
            check_optional_sigma("known sigma", Some(s))?;
        }
        Ok(())
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub policy: LimitPolicy,
    pub characteristics: Vec<CharacteristicSpec>,
}

impl EngineConfig {
    /// Parses and validates a YAML configuration document.
    ///
    /// # Errors
    ///
    /// [`SpcError::Config`] on malformed YAML; validation errors otherwise.
    pub fn from_yaml_str(content: &str) -> SpcResult<Self> {
        let config: EngineConfig =
            serde_yml::from_str(content).map_err(|e| SpcError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the policy and every characteristic, and rejects duplicates.
    pub fn validate(&self) -> SpcResult<()> {
        self.policy.validate()?;
        let mut seen = HashSet::new();
        for spec in &self.characteristics {
            spec.validate()?;
            if !seen.insert(&spec.characteristic_id) {
                return Err(SpcError::Config(format!(
                    "duplicate characteristic: {}",
                    spec.characteristic_id
                )));
            }
        }
        Ok(())
    }

    pub fn characteristic(&self, id: &CharacteristicId) -> Option<&CharacteristicSpec> {
        self.characteristics
            .iter()
            .find(|s| &s.characteristic_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spc::RuleId;

    const SAMPLE: &str = r#"
policy:
  min_subgroups: 25
characteristics:
  - characteristic_id: bore-diameter
    chart:
      type: xbar_r
      subgroup_size: 5
    lsl: 9.95
    usl: 10.05
    sigma_estimator: within_range
  - characteristic_id: torque
    chart:
      type: ewma
      lambda: 0.1
    usl: 12.0
    rules: [1, 2, 5, 6]
  - characteristic_id: gap
    chart:
      type: cusum
      slack: 0.02
      decision_interval: 4.0
    lsl: 0.1
    sigma_estimator:
      known: 0.05
"#;

    #[test]
    fn parses_yaml() {
        let config = EngineConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.policy.min_subgroups, 25);
        assert_eq!(config.policy.min_individuals, 2);
        assert_eq!(config.characteristics.len(), 3);

        let bore = &config.characteristics[0];
        assert_eq!(bore.chart, ChartConfig::XbarR { subgroup_size: 5 });
        assert_eq!(bore.sigma_estimator, SigmaEstimator::WithinRange);
        assert_eq!(bore.rules, RuleSet::all());

        let torque = config.characteristic(&"torque".into()).unwrap();
        match &torque.chart {
            ChartConfig::Ewma(p) => {
                assert!((p.lambda - 0.1).abs() < f64::EPSILON);
                assert!((p.width - 3.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected chart {other:?}"),
        }
        assert!(torque.rules.is_enabled(RuleId::R5));
        assert!(!torque.rules.is_enabled(RuleId::R3));

        let gap = &config.characteristics[2];
        assert_eq!(gap.sigma_estimator, SigmaEstimator::Known(0.05));
        match &gap.chart {
            ChartConfig::Cusum(p) => assert!((p.decision_interval - 4.0).abs() < f64::EPSILON),
            other => panic!("unexpected chart {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_yaml() {
        let err = EngineConfig::from_yaml_str("characteristics: [").unwrap_err();
        assert!(matches!(err, SpcError::Config(_)));
    }

    #[test]
    fn rejects_duplicates() {
        let config = EngineConfig {
            policy: LimitPolicy::default(),
            characteristics: vec![
                CharacteristicSpec::new("a", ChartConfig::IMr),
                CharacteristicSpec::new("a", ChartConfig::IMr),
            ],
        };
        assert!(matches!(config.validate(), Err(SpcError::Config(_))));
    }

    #[test]
    fn rejects_inverted_spec_limits() {
        let spec =
            CharacteristicSpec::new("a", ChartConfig::IMr).with_spec_limits(Some(5.0), Some(5.0));
        assert!(matches!(spec.validate(), Err(SpcError::Validation(_))));
    }

    #[test]
    fn pre_control_needs_both_limits() {
        let spec = CharacteristicSpec::new("a", ChartConfig::PreControl)
            .with_spec_limits(None, Some(5.0));
        assert!(spec.validate().is_err());
        let spec = CharacteristicSpec::new("a", ChartConfig::PreControl)
            .with_spec_limits(Some(1.0), Some(5.0));
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn rejects_out_of_table_subgroup() {
        let spec = CharacteristicSpec::new("a", ChartConfig::XbarR { subgroup_size: 30 });
        assert!(spec.validate().is_err());
        let spec = CharacteristicSpec::new("a", ChartConfig::XbarR { subgroup_size: 1 });
        assert!(spec.validate().is_err());
    }

    #[test]
    fn rejects_bad_chart_params() {
        let ewma = ChartConfig::Ewma(EwmaParams {
            lambda: 1.5,
            ..EwmaParams::default()
        });
        assert!(CharacteristicSpec::new("a", ewma).validate().is_err());

        let cusum = ChartConfig::Cusum(CusumParams {
            decision_interval: 0.0,
            ..CusumParams::default()
        });
        assert!(CharacteristicSpec::new("a", cusum).validate().is_err());

        let known = CharacteristicSpec::new("a", ChartConfig::IMr)
            .with_sigma_estimator(SigmaEstimator::Known(-1.0));
        assert!(known.validate().is_err());
    }

    #[test]
    fn rejects_weak_policy() {
        let config = EngineConfig {
            policy: LimitPolicy {
                min_individuals: 1,
                ..LimitPolicy::default()
            },
            characteristics: vec![],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn nominal_defaults_to_midpoint() {
        let spec = SpecLimits::new(Some(9.0), Some(11.0)).unwrap();
        assert_eq!(spec.nominal(), Some(10.0));
        let spec = spec.with_target(10.5).unwrap();
        assert_eq!(spec.nominal(), Some(10.5));
        let one_sided = SpecLimits::new(None, Some(11.0)).unwrap();
        assert_eq!(one_sided.nominal(), None);
    }
}
