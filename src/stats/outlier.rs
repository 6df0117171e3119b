use statrs::distribution::{ContinuousCDF, Normal};
use tracing::warn;

use super::{mean, std_dev};

/// Removes samples that are improbable under a Gaussian fitted to the batch.
///
/// `percentile` is the total two-sided exclusion probability: with `0.1`, roughly the
/// fastest and slowest 5% are dropped when the samples are normally distributed. Only
/// samples strictly inside `[invCDF(percentile / 2), invCDF(1 - percentile / 2)]` are kept.
///
/// Batches of at most one sample, batches without spread and a non-positive
/// `percentile` are returned unchanged.
pub fn remove_outliers(samples: &[f64], percentile: f64) -> Vec<f64> {
    if samples.len() <= 1 || percentile <= 0.0 {
        return samples.to_vec();
    }

    let (Some(mu), Some(sigma)) = (mean(samples), std_dev(samples)) else {
        return samples.to_vec();
    };
    if sigma == 0.0 {
        return samples.to_vec();
    }
    if !(sigma > 0.0) || !sigma.is_finite() || !mu.is_finite() {
        warn!(sigma, mu, "degenerate spread in timing batch, skipping outlier removal");
        return samples.to_vec();
    }

    let dist = match Normal::new(mu, sigma) {
        Ok(dist) => dist,
        Err(err) => {
            warn!(%err, "could not fit gaussian to timing batch, skipping outlier removal");
            return samples.to_vec();
        }
    };
    let p = percentile.min(1.0);
    let min_allowed = dist.inverse_cdf(p / 2.0);
    let max_allowed = dist.inverse_cdf(1.0 - p / 2.0);

    samples
        .iter()
        .copied()
        .filter(|&x| x > min_allowed && x < max_allowed)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_spike_is_removed() {
        let filtered = remove_outliers(&[1.0, 1.0, 1.0, 1.0, 100.0], 0.1);
        assert_eq!(filtered, vec![1.0, 1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_tight_batch_is_kept() {
        let xs = [1.00, 1.01, 0.99, 1.02, 0.98, 1.00];
        assert_eq!(remove_outliers(&xs, 0.1), xs.to_vec());
    }

    #[test]
    fn test_order_is_preserved() {
        let xs = [3.0, 1.0, 2.0, 50.0, 2.0, 1.0, 3.0, 2.0];
        assert_eq!(
            remove_outliers(&xs, 0.1),
            vec![3.0, 1.0, 2.0, 2.0, 1.0, 3.0, 2.0]
        );
    }

    #[test]
    fn test_zero_percentile_is_noop() {
        let xs = [1.0, 1.0, 1.0, 1.0, 100.0];
        assert_eq!(remove_outliers(&xs, 0.0), xs.to_vec());
    }

    #[test]
    fn test_non_finite_samples_are_left_alone() {
        let xs = [1.0, f64::NAN, 2.0];
        let filtered = remove_outliers(&xs, 0.1);
        assert_eq!(filtered.len(), 3);
    }

    #[test]
    fn test_empty_batch() {
        assert!(remove_outliers(&[], 0.1).is_empty());
    }

    proptest! {
        #[test]
        fn prop_identical_samples_unchanged(x in 1e-6f64..1e3, n in 0usize..64, p in 0.0f64..0.99) {
            let xs = vec![x; n];
            prop_assert_eq!(remove_outliers(&xs, p), xs);
        }

        #[test]
        fn prop_small_batches_unchanged(
            x in proptest::collection::vec(-1e3f64..1e3, 0..=1),
            p in 0.0f64..0.99
        ) {
            prop_assert_eq!(remove_outliers(&x, p), x);
        }

        #[test]
        fn prop_result_is_subsequence(
            xs in proptest::collection::vec(0.0f64..10.0, 2..64),
            p in 0.0f64..0.5
        ) {
            let filtered = remove_outliers(&xs, p);
            prop_assert!(filtered.len() <= xs.len());
            let mut it = xs.iter();
            for f in &filtered {
                prop_assert!(it.any(|x| x == f));
            }
        }
    }
}
