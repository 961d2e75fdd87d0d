//! # u-spc
//!
//! Statistical process control (SPC) engine: control limits, zone
//! classification, Western Electric run rules, small-shift detection, and
//! process capability.
//!
//! The engine operates on raw `f64` measurements addressed to named
//! characteristics. Each characteristic is an independent stream with its
//! own versioned control limits and rule state.
//!
//! ## Modules
//!
//! - [`spc`]: Control limits (X̄-R, I-MR, CUSUM, EWMA, pre-control), zones, run rules, violations
//! - [`detection`]: Streaming CUSUM and EWMA shift detectors
//! - [`capability`]: Process capability indices (Cp, Cpk, Pp, Ppk, Cpm) and sigma levels
//! - [`monitor`]: Per-characteristic monitors and the multi-stream [`SpcEngine`]
//! - [`config`]: YAML-loadable engine configuration
//! - [`model`]: Measurements, subgroups, and characteristic identity
//!
//! ## Design Philosophy
//!
//! - **Deterministic**: the same inputs always yield the same limits, zones, and violations
//! - **Explicit failure**: invalid input fails fast; undefined indices are values, never `NaN`
//! - **Research-backed**: constants and rules reference the SPC literature
//!
//! ## Example
//!
//! ```
//! use chrono::{Duration, TimeZone, Utc};
//! use u_spc::config::{ChartConfig, CharacteristicSpec, EngineConfig};
//! use u_spc::model::{Measurement, MeasurementRecord};
//! use u_spc::spc::RuleId;
//! use u_spc::SpcEngine;
//!
//! let config = EngineConfig {
//!     characteristics: vec![CharacteristicSpec::new("bore", ChartConfig::IMr)],
//!     ..EngineConfig::default()
//! };
//! let mut engine = SpcEngine::new(config).unwrap();
//!
//! let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
//! let baseline: Vec<Measurement> = [10.0, 10.2, 9.8, 10.1, 9.9, 10.0]
//!     .iter()
//!     .enumerate()
//!     .map(|(i, &v)| Measurement::new(t0 + Duration::seconds(i as i64), v))
//!     .collect();
//! engine.calibrate(&"bore".into(), &baseline).unwrap();
//!
//! let outcome = engine
//!     .submit(&MeasurementRecord {
//!         characteristic_id: "bore".into(),
//!         measurement: Measurement::new(t0 + Duration::minutes(1), 12.0),
//!     })
//!     .unwrap();
//! assert_eq!(outcome.violations()[0].rule_id, RuleId::R1);
//! assert_eq!(engine.violations().len(), 1);
//! ```

pub mod capability;
pub mod config;
pub mod detection;
pub mod error;
pub mod model;
pub mod monitor;
pub mod spc;
pub mod stats;

pub use error::{SpcError, SpcResult, UndefinedMetricError};
pub use monitor::{CharacteristicMonitor, MonitorOutcome, Observation, SpcEngine};
