//! Clustered signed-rank statistics.
//!
//! Both methods produce a positive-rank sum and a score per cluster such that
//! the centred statistic is the sum of the cluster scores. Under the null the
//! signs of whole clusters are exchangeable, so flipping a cluster negates its
//! score; the variance is the sum of squared scores.

use crate::testing::inference::classical::signed_rank_expectation;
use crate::testing::inference::exchangeable::ExchangeableModel;
use crate::testing::inference::RankStatistic;
use crate::testing::rank::{mid_ranks, weighted_mid_cdf};
use crate::testing::utils::ClusterLayout;
use anyhow::Result;
use tracing::debug;

/// Signed-rank moments with the per-cluster scores the sign-flip engine uses.
#[derive(Debug, Clone)]
pub struct SignedRankMoments {
    pub statistic: RankStatistic,
    /// `statistic - expectation == cluster_scores.sum()`
    pub cluster_scores: Vec<f64>,
}

/// Rosner-Glynn-Lee signed-rank statistic.
///
/// `d` holds the non-zero centred differences. Ranks are taken over `|d|`
/// for the whole sample. With unequal cluster sizes each cluster is weighted
/// by `1 / (1 + (g_i - 1) rho)`, `rho` being the intraclass correlation of
/// the signed ranks.
///
/// Each rank is positive with probability one half under the null, so the
/// expectation is `sum_i w_i R_i / 2` with `R_i` the rank total of cluster
/// `i`. It equals the classical `n (n + 1) / 4` for balanced clusters and
/// whenever the estimated `rho` is not positive (all weights are then one);
/// otherwise it depends on how the ranks fall across clusters.
pub fn rgl_signed_rank(d: &[f64], layout: &ClusterLayout) -> Result<SignedRankMoments> {
    let abs: Vec<f64> = d.iter().map(|v| v.abs()).collect();
    let ranks = mid_ranks(&abs)?;
    let signed: Vec<f64> = ranks.iter().zip(d).map(|(&r, &v)| r * v.signum()).collect();

    let balanced = layout.is_balanced();
    let weights = if balanced {
        vec![1.0; layout.n_clusters()]
    } else {
        size_weights(layout, &signed)
    };

    let mut statistic = 0.0;
    let mut weighted_total = 0.0;
    let mut variance = 0.0;
    let mut cluster_scores = Vec::with_capacity(layout.n_clusters());

    for (obs, &w) in layout.members.iter().zip(&weights) {
        let positive: f64 = obs.iter().filter(|&&o| d[o] > 0.0).map(|&o| ranks[o]).sum();
        let total: f64 = obs.iter().map(|&o| ranks[o]).sum();
        let cluster_signed: f64 = obs.iter().map(|&o| signed[o]).sum();

        statistic += w * positive;
        weighted_total += w * total;

        let score = w * cluster_signed / 2.0;
        variance += score * score;
        cluster_scores.push(score);
    }

    let expectation = if balanced {
        signed_rank_expectation(d.len())
    } else {
        weighted_total / 2.0
    };

    Ok(SignedRankMoments {
        statistic: RankStatistic {
            statistic,
            expectation,
            variance,
        },
        cluster_scores,
    })
}

/// Cluster weights `1 / (1 + (g_i - 1) rho)` scaled so that `sum w_i g_i = n`.
fn size_weights(layout: &ClusterLayout, signed: &[f64]) -> Vec<f64> {
    let unit = vec![1.0; signed.len()];
    let model = ExchangeableModel::estimate(&layout.members, signed, &unit);
    let rho = model.rho().clamp(0.0, 1.0);
    debug!(rho, "signed-rank intraclass correlation");

    let raw: Vec<f64> = layout
        .members
        .iter()
        .map(|obs| 1.0 / (1.0 + (obs.len() as f64 - 1.0) * rho))
        .collect();
    let mass: f64 = raw
        .iter()
        .zip(&layout.members)
        .map(|(w, obs)| w * obs.len() as f64)
        .sum();
    let scale = signed.len() as f64 / mass;
    raw.into_iter().map(|w| w * scale).collect()
}

/// Datta-Satten signed-rank statistic.
///
/// Ranks come from the cluster-weighted distribution of `|d|` (each cluster
/// carries total weight `1/m`), so large clusters do not dominate. The
/// generalised rank `1/2 + n F(|d|)` equals the ordinary mid-rank when all
/// clusters have the same size.
pub fn ds_signed_rank(d: &[f64], layout: &ClusterLayout) -> Result<SignedRankMoments> {
    let n = d.len() as f64;
    let m = layout.n_clusters() as f64;
    let sizes = layout.sizes();

    let abs: Vec<f64> = d.iter().map(|v| v.abs()).collect();
    let obs_weights: Vec<f64> = layout
        .cluster_of
        .iter()
        .map(|&c| 1.0 / (m * sizes[c] as f64))
        .collect();
    let cdf = weighted_mid_cdf(&abs, &obs_weights)?;
    let ranks: Vec<f64> = cdf.iter().map(|f| 0.5 + n * f).collect();

    let mut statistic = 0.0;
    let mut expectation = 0.0;
    let mut variance = 0.0;
    let mut cluster_scores = Vec::with_capacity(layout.n_clusters());

    for obs in &layout.members {
        let w = n / (m * obs.len() as f64);
        let positive: f64 = obs.iter().filter(|&&o| d[o] > 0.0).map(|&o| ranks[o]).sum();
        let total: f64 = obs.iter().map(|&o| ranks[o]).sum();
        let signed: f64 = obs.iter().map(|&o| ranks[o] * d[o].signum()).sum();

        statistic += w * positive;
        expectation += w * total / 2.0;

        let score = w * signed / 2.0;
        variance += score * score;
        cluster_scores.push(score);
    }

    Ok(SignedRankMoments {
        statistic: RankStatistic {
            statistic,
            expectation,
            variance,
        },
        cluster_scores,
    })
}
