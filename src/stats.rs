//! Descriptive statistics used by the limit calculator and capability analyzer.
//!
//! Mean and sample standard deviation delegate to `u_numflow::stats`
//! (numerically stable, `None` on empty or non-finite input).

use u_numflow::stats as numflow;

/// Arithmetic mean, `None` for empty or non-finite data.
pub fn mean(data: &[f64]) -> Option<f64> {
    numflow::mean(data)
}

/// Sample standard deviation (n - 1 denominator), `None` if `n < 2`.
pub fn sample_std_dev(data: &[f64]) -> Option<f64> {
    numflow::std_dev(data)
}

/// Population standard deviation (n denominator), `None` if `n < 2`.
pub fn population_std_dev(data: &[f64]) -> Option<f64> {
    let n = data.len();
    let var = numflow::variance(data)?;
    Some((var * (n - 1) as f64 / n as f64).sqrt())
}

/// `max - min`, `None` for empty data or if any value is NaN.
pub fn range(data: &[f64]) -> Option<f64> {
    let first = *data.first()?;
    let mut lo = first;
    let mut hi = first;
    for &x in data {
        if x.is_nan() {
            return None;
        }
        lo = lo.min(x);
        hi = hi.max(x);
    }
    Some(hi - lo)
}

/// Moving ranges `|x_i - x_{i-1}|` for `i = 1..n`.
pub fn moving_ranges(data: &[f64]) -> Vec<f64> {
    data.windows(2).map(|w| (w[1] - w[0]).abs()).collect()
}
