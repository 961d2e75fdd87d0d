//! Control chart factor tables for subgroup sizes n = 2..=25.
//!
//! All constants (A2, d2, D3, D4) are sourced from ASTM E2587, Standard
//! Practice for Use of Control Charts in Statistical Process Control.
//! Index 0 corresponds to n = 2. Sizes outside the table are rejected,
//! never extrapolated.

use crate::error::{SpcError, SpcResult};

/// Smallest tabulated subgroup size.
pub const MIN_SUBGROUP_SIZE: usize = 2;
/// Largest tabulated subgroup size.
pub const MAX_SUBGROUP_SIZE: usize = 25;

/// A2 factors: UCL/LCL = X-double-bar ± A2 · R-bar.
const A2: [f64; 24] = [
    1.880, 1.023, 0.729, 0.577, 0.483, 0.419, 0.373, 0.337, 0.308, 0.285, 0.266, 0.249, 0.235,
    0.223, 0.212, 0.203, 0.194, 0.187, 0.180, 0.173, 0.167, 0.162, 0.157, 0.153,
];

/// d2 factors: sigma-hat = R-bar / d2.
const D2: [f64; 24] = [
    1.128, 1.693, 2.059, 2.326, 2.534, 2.704, 2.847, 2.970, 3.078, 3.173, 3.258, 3.336, 3.407,
    3.472, 3.532, 3.588, 3.640, 3.689, 3.735, 3.778, 3.819, 3.858, 3.895, 3.931,
];

/// D3 factors: LCL_R = D3 · R-bar.
const D3: [f64; 24] = [
    0.0, 0.0, 0.0, 0.0, 0.0, 0.076, 0.136, 0.184, 0.223, 0.256, 0.283, 0.307, 0.328, 0.347, 0.363,
    0.378, 0.391, 0.403, 0.415, 0.425, 0.434, 0.443, 0.451, 0.459,
];

/// D4 factors: UCL_R = D4 · R-bar.
const D4: [f64; 24] = [
    3.267, 2.574, 2.282, 2.114, 2.004, 1.924, 1.864, 1.816, 1.777, 1.744, 1.717, 1.693, 1.672,
    1.653, 1.637, 1.622, 1.608, 1.597, 1.585, 1.575, 1.566, 1.557, 1.548, 1.541,
];

/// d2 for a moving range of two consecutive observations.
pub const D2_MOVING_RANGE: f64 = 1.128;

/// D4 for a moving range of two consecutive observations.
pub const D4_MOVING_RANGE: f64 = 3.267;

/// The factor set for one subgroup size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RangeFactors {
    pub n: usize,
    pub a2: f64,
    pub d2: f64,
    pub d3: f64,
    pub d4: f64,
}

/// Looks up the factors for subgroup size `n`.
///
/// # Errors
///
/// [`SpcError::Validation`] if `n` is outside `2..=25`.
pub fn range_factors(n: usize) -> SpcResult<RangeFactors> {
    if !(MIN_SUBGROUP_SIZE..=MAX_SUBGROUP_SIZE).contains(&n) {
        return Err(SpcError::validation(format!(
            "subgroup size must be {MIN_SUBGROUP_SIZE}..={MAX_SUBGROUP_SIZE}, got {n}"
        )));
    }
    let idx = n - MIN_SUBGROUP_SIZE;
    Ok(RangeFactors {
        n,
        a2: A2[idx],
        d2: D2[idx],
        d3: D3[idx],
        d4: D4[idx],
    })
}
