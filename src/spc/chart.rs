//! Core control chart types: chart kinds, control limits, and versioned
//! limit snapshots.
//!
//! Limits are recomputed whenever the baseline changes, so every set of
//! limits that rule evaluation runs against is published as an immutable
//! [`LimitSnapshot`] with a revision number. A [`RuleViolation`] carries a
//! [`LimitsRef`] back to the snapshot it was evaluated against.
//!
//! [`RuleViolation`]: super::RuleViolation
//!
//! # References
//!
//! - Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.
//! - ASTM E2587, Standard Practice for Use of Control Charts

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SpcError, SpcResult};
use crate::model::CharacteristicId;

/// Kinds of control chart the engine can build limits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChartType {
    /// X-bar and Range chart over fixed-size subgroups.
    XbarR,
    /// Individuals and Moving Range chart.
    IMr,
    /// Tabular two-sided cumulative sum chart.
    Cusum,
    /// Exponentially weighted moving average chart.
    Ewma,
    /// Pre-control zones derived from the specification limits.
    PreControl,
}

impl ChartType {
    /// Whether run rules (zone-based pattern tests) apply to this chart.
    ///
    /// Only Shewhart charts plot a statistic with 1σ/2σ/3σ zones.
    pub fn supports_run_rules(self) -> bool {
        matches!(self, ChartType::XbarR | ChartType::IMr)
    }
}

impl fmt::Display for ChartType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChartType::XbarR => "X-bar/R",
            ChartType::IMr => "I-MR",
            ChartType::Cusum => "CUSUM",
            ChartType::Ewma => "EWMA",
            ChartType::PreControl => "pre-control",
        };
        f.write_str(name)
    }
}

/// Limits of the companion dispersion chart (R chart or MR chart).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DispersionLimits {
    pub center_line: f64,
    pub ucl: f64,
    pub lcl: f64,
}

/// Fully resolved chart parameters, fixed at the time limits were computed.
///
/// Defaults (baseline mean as target, MR̄/d2 as σ, slack 0.5σ) are already
/// applied, so a snapshot reproduces its chart without the original config.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChartDesign {
    Cusum {
        target: f64,
        /// Slack k in measurement units.
        slack: f64,
        /// Decision threshold H = h·σ in measurement units.
        threshold: f64,
        sigma: f64,
    },
    Ewma {
        target: f64,
        lambda: f64,
        width: f64,
        sigma: f64,
    },
    PreControl {
        lsl: f64,
        usl: f64,
    },
}

/// Control limits for one characteristic and chart type.
///
/// # Invariants
///
/// - `lcl <= center_line <= ucl`
/// - All values are finite
/// - `zero_variance` is `true` exactly when `sigma == 0`, in which case the
///   limits have collapsed onto the center line
///
/// For X-bar/R and I-MR charts `sigma` is the standard error of the plotted
/// statistic, so `ucl = center_line + 3 * sigma`. For CUSUM the limits are the
/// decision interval `±h·σ` around zero; for EWMA they are the steady-state
/// limits; for pre-control `ucl`/`lcl` are the specification limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlLimits {
    pub characteristic_id: CharacteristicId,
    pub chart_type: ChartType,
    pub center_line: f64,
    pub ucl: f64,
    pub lcl: f64,
    /// Zone width (one standard error of the plotted statistic).
    pub sigma: f64,
    /// Within-process sigma estimate (R̄/d2 or MR̄/d2), when one was derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sigma_within: Option<f64>,
    pub zero_variance: bool,
    /// Companion R or MR chart limits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispersion: Option<DispersionLimits>,
    /// Resolved parameters of CUSUM, EWMA, and pre-control charts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<ChartDesign>,
}

impl ControlLimits {
    /// Symmetric 3σ limits around `center_line`.
    pub(crate) fn three_sigma(
        characteristic_id: CharacteristicId,
        chart_type: ChartType,
        center_line: f64,
        sigma: f64,
    ) -> Self {
        Self {
            characteristic_id,
            chart_type,
            center_line,
            ucl: center_line + 3.0 * sigma,
            lcl: center_line - 3.0 * sigma,
            sigma,
            sigma_within: None,
            zero_variance: sigma == 0.0,
            dispersion: None,
            design: None,
        }
    }

    pub(crate) fn with_sigma_within(mut self, sigma_within: f64) -> Self {
        self.sigma_within = Some(sigma_within);
        self
    }

    pub(crate) fn with_dispersion(mut self, dispersion: DispersionLimits) -> Self {
        self.dispersion = Some(dispersion);
        self
    }

    pub(crate) fn with_design(mut self, design: ChartDesign) -> Self {
        self.design = Some(design);
        self
    }

    /// Whether `value` lies outside `[lcl, ucl]`.
    pub fn is_beyond(&self, value: f64) -> bool {
        value > self.ucl || value < self.lcl
    }
}

/// Reference from a violation to the limit snapshot it was evaluated against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LimitsRef {
    pub characteristic_id: CharacteristicId,
    pub revision: u32,
}

impl fmt::Display for LimitsRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@r{}", self.characteristic_id, self.revision)
    }
}

/// An immutable, published set of control limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitSnapshot {
    revision: u32,
    limits: ControlLimits,
}

impl LimitSnapshot {
    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn limits(&self) -> &ControlLimits {
        &self.limits
    }

    pub fn reference(&self) -> LimitsRef {
        LimitsRef {
            characteristic_id: self.limits.characteristic_id.clone(),
            revision: self.revision,
        }
    }
}

/// Append-only history of limit snapshots for one characteristic.
///
/// Publishing never mutates earlier snapshots; revisions start at 1 and
/// increase by one per publication.
#[derive(Debug, Clone)]
pub struct LimitHistory {
    characteristic_id: CharacteristicId,
    snapshots: Vec<LimitSnapshot>,
}

impl LimitHistory {
    pub fn new(characteristic_id: CharacteristicId) -> Self {
        Self {
            characteristic_id,
            snapshots: Vec::new(),
        }
    }

    /// Publishes a new snapshot and returns it.
    ///
    /// # Errors
    ///
    /// [`SpcError::Validation`] if the limits belong to another characteristic.
    pub fn publish(&mut self, limits: ControlLimits) -> SpcResult<LimitSnapshot> {
        if limits.characteristic_id != self.characteristic_id {
            return Err(SpcError::validation(format!(
                "limits for {} cannot be published to history of {}",
                limits.characteristic_id, self.characteristic_id
            )));
        }
        let revision = self.snapshots.len() as u32 + 1;
        let snapshot = LimitSnapshot { revision, limits };
        info!(
            characteristic = %self.characteristic_id,
            revision,
            chart = %snapshot.limits.chart_type,
            "published control limit snapshot"
        );
        self.snapshots.push(snapshot.clone());
        Ok(snapshot)
    }

    /// The most recently published snapshot.
    pub fn current(&self) -> Option<&LimitSnapshot> {
        self.snapshots.last()
    }

    /// Looks up a snapshot by revision.
    pub fn get(&self, revision: u32) -> Option<&LimitSnapshot> {
        revision
            .checked_sub(1)
            .and_then(|i| self.snapshots.get(i as usize))
    }

    /// Resolves a violation's limit reference.
    pub fn resolve(&self, reference: &LimitsRef) -> Option<&LimitSnapshot> {
        if reference.characteristic_id != self.characteristic_id {
            return None;
        }
        self.get(reference.revision)
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}
