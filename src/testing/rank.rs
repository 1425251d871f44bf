//! Rank transforms shared by every clustered test.
//!
//! Callers centre by `mu` before ranking: signed-rank tests rank `|x - mu|`
//! and rank-sum tests shift the designated group by `mu`.
//!
//! Ties always receive the average of the positions they occupy. The weighted
//! mid-distribution function generalises the same rule: tied observations
//! contribute half of their combined weight to each other.

use crate::testing::ClusWilcoxError;
use anyhow::Result;
use std::cmp::Ordering;

/// Mid-ranks of `values`, tied values receiving the average of their ranks.
///
/// The ranks always sum to `n(n+1)/2`.
pub fn mid_ranks(values: &[f64]) -> Result<Vec<f64>> {
    let unit = vec![1.0; values.len()];
    let cdf = weighted_mid_cdf(values, &unit)?;
    Ok(cdf.into_iter().map(|c| c + 0.5).collect())
}

/// Weighted mid-distribution function evaluated at every observation.
///
/// For each value `v` returns `sum(w_k : v_k < v) + 0.5 * sum(w_k : v_k == v)`.
/// With unit weights this is `mid_rank - 0.5`; with weights summing to one it
/// is the empirical distribution function with the half-weight tie rule.
pub fn weighted_mid_cdf(values: &[f64], weights: &[f64]) -> Result<Vec<f64>> {
    if values.is_empty() {
        return Err(ClusWilcoxError::invalid_input("x", "cannot rank an empty sample"));
    }
    if values.len() != weights.len() {
        return Err(ClusWilcoxError::invalid_input(
            "weights",
            format!("expected {} weights, got {}", values.len(), weights.len()),
        ));
    }
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        return Err(ClusWilcoxError::invalid_input(
            "x",
            format!("non-finite value at index {}", idx),
        ));
    }

    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));

    let mut cdf = vec![0.0; values.len()];
    let mut below = 0.0;
    let mut i = 0;
    while i < order.len() {
        let val = values[order[i]];
        let mut j = i + 1;

        // Find tied values
        while j < order.len() && values[order[j]] == val {
            j += 1;
        }

        let tied: f64 = order[i..j].iter().map(|&k| weights[k]).sum();
        let mid = below + 0.5 * tied;
        for &k in &order[i..j] {
            cdf[k] = mid;
        }

        below += tied;
        i = j;
    }

    Ok(cdf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_mid_ranks_without_ties() {
        let ranks = mid_ranks(&[3.2, -1.0, 7.5, 0.4]).unwrap();
        assert_eq!(ranks, vec![3.0, 1.0, 4.0, 2.0]);
    }

    #[test]
    fn test_mid_ranks_average_ties() {
        let ranks = mid_ranks(&[2.0, 1.0, 2.0, 2.0, 5.0]).unwrap();
        assert_eq!(ranks, vec![3.0, 1.0, 3.0, 3.0, 5.0]);
    }

    #[test]
    fn test_rank_sum_invariant_with_ties() {
        let values = [1.0, 1.0, 4.0, 2.5, 2.5, 2.5, 9.0, 1.0, 0.0];
        let n = values.len() as f64;
        let total: f64 = mid_ranks(&values).unwrap().iter().sum();
        assert_relative_eq!(total, n * (n + 1.0) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_all_equal_values() {
        let ranks = mid_ranks(&[4.0; 6]).unwrap();
        assert!(ranks.iter().all(|&r| r == 3.5));
    }

    #[test]
    fn test_empty_sample_rejected() {
        let err = mid_ranks(&[]).unwrap_err();
        let kind = err.downcast_ref::<ClusWilcoxError>().unwrap();
        assert!(matches!(kind, ClusWilcoxError::InvalidInput { argument: "x", .. }));
    }

    #[test]
    fn test_weighted_mid_cdf() {
        // two clusters: {1.0, 3.0} weight 1/4 each, {2.0} weight 1/2
        let cdf = weighted_mid_cdf(&[1.0, 3.0, 2.0], &[0.25, 0.25, 0.5]).unwrap();
        assert_relative_eq!(cdf[0], 0.125, epsilon = 1e-12);
        assert_relative_eq!(cdf[2], 0.5, epsilon = 1e-12);
        assert_relative_eq!(cdf[1], 0.875, epsilon = 1e-12);
    }

    #[test]
    fn test_weighted_mid_cdf_length_mismatch() {
        assert!(weighted_mid_cdf(&[1.0, 2.0], &[1.0]).is_err());
    }
}
