use serde::{Deserialize, Serialize};

use super::{mean, std_dev};

/// Outcome of the stability gate for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Stability {
    pub stable: bool,
    /// Standard deviation divided by the mean.
    pub relative_std: f64,
}

/// Standard deviation relative to the mean.
///
/// Returns `None` for an empty batch or a batch with zero mean, where the ratio is undefined.
pub fn relative_std(samples: &[f64]) -> Option<f64> {
    let mu = mean(samples)?;
    if mu == 0.0 {
        return None;
    }
    Some(std_dev(samples)? / mu)
}

/// Judges whether a batch is stable: its relative standard deviation is at most
/// `max_relative_std`.
///
/// Returns `None` when the relative standard deviation is undefined (empty batch or zero
/// mean); callers must treat that as "not yet stable".
pub fn is_stable(samples: &[f64], max_relative_std: f64) -> Option<Stability> {
    let relative_std = relative_std(samples)?;
    Some(Stability {
        stable: relative_std <= max_relative_std,
        relative_std,
    })
}

/// A normal distribution describing the expected value of a test statistic.
///
/// Used to compare a candidate configuration's timing against a reference distribution
/// (for example the timings of the baseline configuration).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NullHypothesis {
    pub mean: f64,
    pub std_dev: f64,
}

impl NullHypothesis {
    pub const DEFAULT_SIGMA_FACTOR: f64 = 2.0;

    pub fn new(mean: f64, std_dev: f64) -> Self {
        Self { mean, std_dev }
    }

    /// Fits the hypothesis to a reference batch.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        Some(Self::new(mean(samples)?, std_dev(samples)?))
    }

    /// Two-sided test: `t` is consistent with the hypothesis when it lies within
    /// `sigma_factor` standard deviations of the hypothesised mean.
    pub fn accepts(&self, t: f64, sigma_factor: f64) -> bool {
        (t - self.mean).abs() <= sigma_factor * self.std_dev
    }

    /// Element-wise [`NullHypothesis::accepts`].
    pub fn accepts_each(&self, ts: &[f64], sigma_factor: f64) -> Vec<bool> {
        ts.iter().map(|&t| self.accepts(t, sigma_factor)).collect()
    }
}
