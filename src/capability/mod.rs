//! Process capability analysis.
//!
//! # Indices
//!
//! - **Cp**, **Cpk**: short-term capability, σ from a caller-selected estimator
//! - **Pp**, **Ppk**: long-term performance, overall sample σ
//! - **Cpm**: Taguchi capability (deviation from target)
//! - **Sigma level**: `3·Cpk + 1.5` and the exact value from the normal tail
//!
//! Indices that cannot be computed are reported as [`Metric`] values rather
//! than errors.
//!
//! # References
//!
//! - Montgomery (2019), *Introduction to Statistical Quality Control*, 8th ed.

mod indices;
mod sigma_level;

pub use indices::{CapabilityAnalyzer, CapabilityResult, ExpectedPpm, Metric};
pub use sigma_level::{
    ppm_to_sigma, sigma_level_approx, sigma_level_exact, sigma_to_ppm, tail_ppm, SIGMA_SHIFT,
};
