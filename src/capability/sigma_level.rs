//! Sigma quality levels and expected defect rates.
//!
//! All conversions use the Motorola 1.5σ long-term shift convention:
//!
//! | Sigma | PPM (defects per million) |
//! |-------|--------------------------|
//! | 6.0   | 3.4                      |
//! | 5.0   | 233                      |
//! | 4.0   | 6,210                    |
//! | 3.0   | 66,807                   |
//! | 2.0   | 308,538                  |
//!
//! # References
//!
//! - Harry & Schroeder (2000), *Six Sigma: The Breakthrough Management
//!   Strategy Revolutionizing the World's Top Corporations*.
//! - Motorola University, "The Six Sigma Process".

use u_numflow::special::{inverse_normal_cdf, standard_normal_cdf};

/// Long-term mean shift assumed by the sigma-level convention.
pub const SIGMA_SHIFT: f64 = 1.5;

/// Converts a sigma quality level to a PPM defect rate:
/// `PPM = 1e6 · (1 − Φ(sigma − 1.5))`.
///
/// # Arguments
///
/// * `sigma` - Sigma quality level including the 1.5σ shift
///
/// # Examples
///
/// ```
/// use u_spc::capability::sigma_to_ppm;
///
/// assert!((sigma_to_ppm(6.0) - 3.4).abs() < 1.0);
/// assert!((sigma_to_ppm(3.0) - 66_807.0).abs() < 500.0);
/// ```
pub fn sigma_to_ppm(sigma: f64) -> f64 {
    1_000_000.0 * standard_normal_cdf(SIGMA_SHIFT - sigma)
}

/// Converts a PPM defect rate to a sigma quality level:
/// `sigma = Φ⁻¹(1 − PPM / 1e6) + 1.5`.
///
/// The quantile is taken from the lower tail (`−Φ⁻¹(PPM / 1e6)`) so small
/// rates keep their precision.
///
/// # Returns
///
/// `None` unless `ppm` lies strictly inside `(0, 1_000_000)`.
///
/// # Examples
///
/// ```
/// use u_spc::capability::ppm_to_sigma;
///
/// assert!((ppm_to_sigma(3.4).unwrap() - 6.0).abs() < 0.1);
/// assert!(ppm_to_sigma(0.0).is_none());
/// ```
pub fn ppm_to_sigma(ppm: f64) -> Option<f64> {
    if ppm.is_nan() || ppm <= 0.0 || ppm >= 1_000_000.0 {
        return None;
    }
    let z = -inverse_normal_cdf(ppm / 1_000_000.0);
    z.is_finite().then_some(z + SIGMA_SHIFT)
}

/// Short-cut sigma level `3·Cpk + 1.5`.
///
/// Only the nearer limit counts, so a centered two-sided process scores
/// higher here than its actual defect rate implies.
pub fn sigma_level_approx(cpk: f64) -> f64 {
    3.0 * cpk + SIGMA_SHIFT
}

/// Sigma level implied by the total expected defect rate.
///
/// # Arguments
///
/// * `total_ppm` - Expected PPM beyond both specification limits
/// * `z_nearer` - Distance from the mean to the nearer limit in σ (`3·Cpk`)
///
/// # Returns
///
/// `ppm_to_sigma(total_ppm)`, or `z_nearer + 1.5` when the rate underflows
/// to zero or saturates at one million.
///
/// # Reference
///
/// Montgomery (2019), *Introduction to Statistical Quality Control*, 8th ed.,
/// Section 8.2.
pub fn sigma_level_exact(total_ppm: f64, z_nearer: f64) -> f64 {
    ppm_to_sigma(total_ppm).unwrap_or(z_nearer + SIGMA_SHIFT)
}

/// Expected PPM beyond a limit `z` standard deviations from the mean
/// (negative `z` when the mean is already past the limit).
pub fn tail_ppm(z: f64) -> f64 {
    1_000_000.0 * standard_normal_cdf(-z)
}
