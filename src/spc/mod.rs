//! Statistical Process Control (SPC) charts and run rules.
//!
//! Data flows leaf-first through the submodules:
//!
//! 1. [`ControlLimitCalculator`] turns a baseline into [`ControlLimits`]
//!    for X-bar/R, I-MR, CUSUM, EWMA, or pre-control charts.
//! 2. [`LimitHistory`] publishes those limits as an immutable, revisioned
//!    [`LimitSnapshot`].
//! 3. [`classify`] maps each plotted value to a [`ZonePoint`].
//! 4. [`RuleEvaluator`] keeps a bounded buffer per stream and tests the eight
//!    Western Electric rules on every arrival.
//! 5. [`ViolationAggregator`] collects the resulting [`RuleViolation`]s with
//!    their evidence.
//!
//! # References
//!
//! - Montgomery, D.C. (2019). *Introduction to Statistical Quality Control*, 8th ed.
//! - ASTM E2587, Standard Practice for Use of Control Charts
//! - Western Electric (1956). *Statistical Quality Control Handbook*.

mod chart;
mod evaluator;
pub mod factors;
mod limits;
mod precontrol;
mod rules;
mod violations;
mod zones;

pub use chart::{
    ChartDesign, ChartType, ControlLimits, DispersionLimits, LimitHistory, LimitSnapshot,
    LimitsRef,
};
pub use evaluator::{evaluate_series, PointEvaluation, RuleEvaluator};
pub use limits::ControlLimitCalculator;
pub use precontrol::{
    PreControlAction, PreControlTracker, PreControlZone, PreControlZones, QUALIFICATION_RUN,
};
pub use rules::{RuleDef, RuleId, RuleSet, Severity, MAX_WINDOW, RULES};
pub use violations::{Evidence, RuleViolation, ViolationAggregator, ViolationRecord, ViolationSummary};
pub use zones::{classify, Side, Zone, ZonePoint};
