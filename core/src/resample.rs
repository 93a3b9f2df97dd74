//! Weighted-selection primitives shared by every sampling site in the crate.
//!
//! The per-step hazard selection and the mutation inheritance both draw one
//! index from a weight vector with a single uniform variate; initialization
//! and mutation resets draw uniformly from a value pool. Keeping both draws
//! here keeps the call sites free of cumulative-sum bookkeeping and makes the
//! acceptance rule testable in isolation.

/// Select one index from a weight vector by a single inverse-CDF scan.
///
/// `u` is a uniform variate in `[0, 1)` and `total` must be the sum of
/// `weights`. The scan accumulates normalized weights and accepts the first
/// index whose cumulative mass strictly exceeds `u`. If floating-point
/// residue leaves the final cumulative mass at or below `u`, the last index
/// is returned.
///
/// Zero-weight entries can never be accepted by the scan; the last-index
/// fallback is the one path that could land on one, and callers reject
/// all-zero weight vectors before drawing.
pub fn select_index(weights: &[f64], total: f64, u: f64) -> usize {
    assert!(!weights.is_empty(), "weight vector must be non-empty");
    let mut cumulative = 0.0;
    for (index, &weight) in weights.iter().enumerate() {
        cumulative += weight / total;
        if cumulative > u {
            return index;
        }
    }
    weights.len() - 1
}

/// Draw an index uniformly from a pool of `len` values.
///
/// The floor of `u * len` for `u` in `[0, 1)`, clamped so that rounding at
/// the upper edge cannot index past the end. Distributionally identical to
/// [`select_index`] over equal weights.
pub fn pool_index(u: f64, len: usize) -> usize {
    assert!(len > 0, "pool must be non-empty");
    ((u * len as f64) as usize).min(len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_accepts_first_exceeding_index() {
        let weights = [0.2, 0.3, 0.5];
        assert_eq!(select_index(&weights, 1.0, 0.1), 0);
        assert_eq!(select_index(&weights, 1.0, 0.4), 1);
        assert_eq!(select_index(&weights, 1.0, 0.9), 2);
    }

    #[test]
    fn acceptance_is_strict() {
        // Cumulative mass equal to u is not enough; the draw moves on.
        let weights = [0.5, 0.5];
        assert_eq!(select_index(&weights, 1.0, 0.5), 1);
        assert_eq!(select_index(&weights, 1.0, 0.0), 0);
    }

    #[test]
    fn unnormalized_weights_use_total() {
        let weights = [2.0, 3.0, 5.0];
        assert_eq!(select_index(&weights, 10.0, 0.1), 0);
        assert_eq!(select_index(&weights, 10.0, 0.4), 1);
        assert_eq!(select_index(&weights, 10.0, 0.9), 2);
    }

    #[test]
    fn exhausted_scan_falls_back_to_last_index() {
        assert_eq!(select_index(&[1.0], 1.0, 1.0), 0);
        assert_eq!(select_index(&[0.4, 0.6], 1.0, 1.0), 1);
    }

    #[test]
    fn zero_weight_entries_are_skipped() {
        let weights = [0.0, 0.0, 1.0];
        for u in [0.0, 0.25, 0.5, 0.75, 0.999] {
            assert_eq!(select_index(&weights, 1.0, u), 2);
        }
        assert_eq!(select_index(&[0.0, 1.0, 0.0], 1.0, 0.99), 1);
    }

    #[test]
    #[should_panic(expected = "weight vector must be non-empty")]
    fn empty_weights_panic() {
        select_index(&[], 0.0, 0.5);
    }

    #[test]
    fn pool_index_bounds() {
        assert_eq!(pool_index(0.0, 5), 0);
        assert_eq!(pool_index(0.2, 5), 1);
        assert_eq!(pool_index(0.999_999, 5), 4);
        assert_eq!(pool_index(0.5, 1), 0);
    }

    #[test]
    fn pool_index_matches_equal_weight_scan() {
        let len = 7;
        let weights = vec![1.0; len];
        let total = len as f64;
        for i in 0..100 {
            let u = i as f64 / 100.0;
            assert_eq!(pool_index(u, len), select_index(&weights, total, u));
        }
    }

    #[test]
    #[should_panic(expected = "pool must be non-empty")]
    fn empty_pool_panics() {
        pool_index(0.5, 0);
    }
}
