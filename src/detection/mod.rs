//! Small-shift detection charts.
//!
//! Both charts keep streaming state and can also replay a batch:
//!
//! - [`Cusum`]: tabular two-sided cumulative sum (Page, 1954)
//! - [`Ewma`]: exponentially weighted moving average (Roberts, 1959)
//!
//! Designs are normally derived from [`crate::spc::ControlLimits`] through
//! `from_limits`, so the chart replays exactly the parameters of a published
//! limit snapshot.
//!
//! # References
//!
//! - Page, E.S. (1954). "Continuous Inspection Schemes",
//!   *Biometrika* 41(1/2), pp. 100-115.
//! - Roberts, S.W. (1959). "Control Chart Tests Based on Geometric Moving Averages",
//!   *Technometrics* 1(3), pp. 239-250.

mod cusum;
mod ewma;

pub use cusum::{Cusum, CusumPoint};
pub use ewma::{Ewma, EwmaPoint};
