//! Selection of a maximally spread subset of scalar values.

use crate::error::{Error, Result};

/// Finds `k` indices of `values` whose values are as spread out as possible.
///
/// Values are ordered ascending, then the interior value whose removal leaves the smallest
/// gap between its neighbours is dropped, repeatedly, until `k` remain. Ties go to the first
/// candidate in ascending-value order. The extremes are only ever dropped when `k == 1`, in
/// which case the index of the smallest value is returned.
///
/// The result lists indices in ascending order of their values.
pub fn most_diverse_subset(values: &[f64], k: usize) -> Result<Vec<usize>> {
    if k > values.len() {
        return Err(Error::InvalidArgument(format!(
            "cannot select {k} of {} values",
            values.len()
        )));
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&l, &r| values[l].total_cmp(&values[r]));

    match k {
        0 => return Ok(Vec::new()),
        1 => return Ok(vec![order[0]]),
        _ => {}
    }

    while order.len() > k {
        let mut remove = 1;
        let mut min_gap = values[order[order.len() - 1]] - values[order[0]];
        for i in 1..order.len() - 1 {
            let gap = values[order[i + 1]] - values[order[i - 1]];
            if gap < min_gap {
                min_gap = gap;
                remove = i;
            }
        }
        order.remove(remove);
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_one_per_cluster() {
        let values = [10.0, 11.0, 12.0, 50.0, 90.0, 91.0];
        let picked = most_diverse_subset(&values, 3).unwrap();
        assert_eq!(picked.len(), 3);
        assert!(picked.contains(&3));
        assert!(picked.contains(&0) || picked.contains(&2));
        assert!(picked.contains(&4) || picked.contains(&5));
        assert!(!picked.contains(&1));
        assert_eq!(picked, vec![0, 3, 5]);
    }

    #[test]
    fn test_unsorted_input() {
        let values = [91.0, 12.0, 50.0, 10.0, 90.0, 11.0];
        assert_eq!(most_diverse_subset(&values, 3).unwrap(), vec![3, 2, 0]);
    }

    #[test]
    fn test_edge_sizes() {
        let values = [3.0, 1.0, 2.0];
        assert_eq!(most_diverse_subset(&values, 0).unwrap(), Vec::<usize>::new());
        assert_eq!(most_diverse_subset(&values, 1).unwrap(), vec![1]);
        assert_eq!(most_diverse_subset(&values, 3).unwrap(), vec![1, 2, 0]);
        assert_eq!(most_diverse_subset(&[], 0).unwrap(), Vec::<usize>::new());
    }

    #[test]
    fn test_tie_removes_first_candidate() {
        // Every interior gap is 2.0, so index 1 goes first. Then 3.0 sits in the
        // narrowest gap.
        let values = [0.0, 1.0, 2.0, 3.0, 4.0];
        assert_eq!(most_diverse_subset(&values, 4).unwrap(), vec![0, 2, 3, 4]);
        assert_eq!(most_diverse_subset(&values, 3).unwrap(), vec![0, 2, 4]);
    }

    #[test]
    fn test_too_many_requested() {
        assert!(matches!(
            most_diverse_subset(&[1.0, 2.0], 3),
            Err(Error::InvalidArgument(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_selecting_all_returns_every_index(
            values in proptest::collection::vec(-1e6f64..1e6, 0..32)
        ) {
            let mut picked = most_diverse_subset(&values, values.len()).unwrap();
            picked.sort_unstable();
            prop_assert_eq!(picked, (0..values.len()).collect::<Vec<_>>());
        }

        #[test]
        fn prop_single_pick_is_minimum(values in proptest::collection::vec(-1e6f64..1e6, 1..32)) {
            let picked = most_diverse_subset(&values, 1).unwrap();
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            prop_assert_eq!(values[picked[0]], min);
        }

        #[test]
        fn prop_selection_is_idempotent(
            values in proptest::collection::vec(-1e6f64..1e6, 1..32),
            frac in 0.0f64..=1.0,
        ) {
            let k = ((values.len() as f64) * frac) as usize;
            let picked = most_diverse_subset(&values, k).unwrap();
            let subset: Vec<f64> = picked.iter().map(|&i| values[i]).collect();
            let again = most_diverse_subset(&subset, k).unwrap();
            let again: Vec<usize> = again.into_iter().map(|i| picked[i]).collect();
            let mut a = again.clone();
            let mut b = picked.clone();
            a.sort_unstable();
            b.sort_unstable();
            prop_assert_eq!(a, b);
        }
    }
}
