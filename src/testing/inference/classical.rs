//! Independent-sample Wilcoxon moments.
//!
//! Closed forms with the usual tie corrections. The clustered methods reduce
//! to these values when every cluster has a single member.

use crate::testing::inference::RankStatistic;
use crate::testing::rank::mid_ranks;
use crate::testing::ClusWilcoxError;
use anyhow::Result;
use std::cmp::Ordering;

/// Sizes of the tie blocks among `ranks` (blocks of size one included).
pub fn tie_sizes(ranks: &[f64]) -> Vec<usize> {
    let mut sorted = ranks.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let mut sizes = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i + 1;
        while j < sorted.len() && sorted[j] == sorted[i] {
            j += 1;
        }
        sizes.push(j - i);
        i = j;
    }
    sizes
}

fn tie_correction(ranks: &[f64]) -> f64 {
    tie_sizes(ranks)
        .into_iter()
        .map(|t| {
            let t = t as f64;
            t * t * t - t
        })
        .sum()
}

/// `n(n+1)/4`, the null expectation of the positive-rank sum.
pub fn signed_rank_expectation(n: usize) -> f64 {
    let n = n as f64;
    n * (n + 1.0) / 4.0
}

/// `n1(n+1)/2`, the null expectation of the rank sum of `n1` out of `n` observations.
pub fn rank_sum_expectation(n1: usize, n: usize) -> f64 {
    n1 as f64 * (n as f64 + 1.0) / 2.0
}

/// Positive-rank sum of `x - mu` with its tie-corrected null moments.
///
/// Zero differences are dropped first.
pub fn signed_rank(x: &[f64], mu: f64) -> Result<RankStatistic> {
    let d: Vec<f64> = x.iter().map(|v| v - mu).filter(|v| *v != 0.0).collect();
    if d.is_empty() {
        return Err(ClusWilcoxError::degenerate("x", "all differences are zero"));
    }

    let abs: Vec<f64> = d.iter().map(|v| v.abs()).collect();
    let ranks = mid_ranks(&abs)?;
    let statistic = ranks
        .iter()
        .zip(&d)
        .filter(|(_, v)| **v > 0.0)
        .map(|(r, _)| r)
        .sum();

    let n = d.len() as f64;
    let variance = n * (n + 1.0) * (2.0 * n + 1.0) / 24.0 - tie_correction(&ranks) / 48.0;

    Ok(RankStatistic {
        statistic,
        expectation: signed_rank_expectation(d.len()),
        variance,
    })
}

/// Rank sum of the observations with `in_group[i] == true`, with tie-corrected
/// null moments.
pub fn rank_sum(x: &[f64], in_group: &[bool]) -> Result<RankStatistic> {
    if x.len() != in_group.len() {
        return Err(ClusWilcoxError::invalid_input(
            "group",
            format!("expected {} labels, got {}", x.len(), in_group.len()),
        ));
    }

    let ranks = mid_ranks(x)?;
    let n = x.len();
    let n1 = in_group.iter().filter(|&&g| g).count();
    let statistic = ranks
        .iter()
        .zip(in_group)
        .filter(|(_, g)| **g)
        .map(|(r, _)| r)
        .sum();

    let nf = n as f64;
    let n1f = n1 as f64;
    let n2f = (n - n1) as f64;
    let variance = if n > 1 {
        n1f * n2f / 12.0 * ((nf + 1.0) - tie_correction(&ranks) / (nf * (nf - 1.0)))
    } else {
        0.0
    };

    Ok(RankStatistic {
        statistic,
        expectation: rank_sum_expectation(n1, n),
        variance,
    })
}

/// Tie-corrected Kruskal-Wallis statistic for `labels` in `0..n_groups`.
pub fn kruskal_wallis(x: &[f64], labels: &[usize], n_groups: usize) -> Result<f64> {
    let ranks = mid_ranks(x)?;
    let n = x.len() as f64;

    let mut sums = vec![0.0; n_groups];
    let mut counts = vec![0usize; n_groups];
    for (&r, &g) in ranks.iter().zip(labels) {
        sums[g] += r;
        counts[g] += 1;
    }

    let between: f64 = sums
        .iter()
        .zip(&counts)
        .filter(|(_, c)| **c > 0)
        .map(|(s, c)| s * s / *c as f64)
        .sum();
    let h = 12.0 / (n * (n + 1.0)) * between - 3.0 * (n + 1.0);
    let correction = 1.0 - tie_correction(&ranks) / (n * n * n - n);
    if correction <= 0.0 {
        return Err(ClusWilcoxError::degenerate("x", "all values are tied"));
    }
    Ok(h / correction)
}
