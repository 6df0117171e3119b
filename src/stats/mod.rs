//! Sample statistics for timing batches.
//!
//! Standard deviations are population standard deviations (divisor `n`), which is
//! what the outlier filter fits its Gaussian with and what the stability gate
//! compares against the mean.

pub mod outlier;
pub mod stability;

pub use outlier::remove_outliers;
pub use stability::{is_stable, relative_std, NullHypothesis, Stability};

/// Arithmetic mean, or `None` for an empty batch.
pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Population standard deviation, or `None` for an empty batch.
///
/// A batch of identical values has a standard deviation of exactly zero, independent of
/// rounding in the mean.
pub fn std_dev(samples: &[f64]) -> Option<f64> {
    let mu = mean(samples)?;
    if samples.iter().all(|&x| x == samples[0]) {
        return Some(0.0);
    }
    let var = samples.iter().map(|x| (x - mu) * (x - mu)).sum::<f64>() / samples.len() as f64;
    Some(var.sqrt())
}
