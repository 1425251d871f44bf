//! Clustered rank-sum statistics.
//!
//! Group labels are positions in the sorted list of group ids; label `0` is
//! the designated group whose ranks are summed. Every statistic can be
//! re-evaluated for an arbitrary relabelling, which is what the permutation
//! engine does.

use crate::testing::inference::classical::rank_sum_expectation;
use crate::testing::inference::exchangeable::ExchangeableModel;
use crate::testing::inference::RankStatistic;
use crate::testing::permutation::RelabelStatistic;
use crate::testing::rank::{mid_ranks, weighted_mid_cdf};
use crate::testing::utils::ClusterLayout;
use crate::testing::ClusWilcoxError;
use anyhow::Result;
use nalgebra::{DMatrix, DVector};

/// Cleaned rank-sum input: values (already shifted by `mu` for the
/// designated group), group labels and the cluster layout.
#[derive(Debug, Clone)]
pub struct RankSumData {
    pub values: Vec<f64>,
    pub labels: Vec<usize>,
    pub n_groups: usize,
    pub layout: ClusterLayout,
}

impl RankSumData {
    fn indicator(&self, labels: &[usize], group: usize) -> Vec<f64> {
        labels
            .iter()
            .map(|&l| if l == group { 1.0 } else { 0.0 })
            .collect()
    }
}

/// Rosner-Glynn-Lee rank sum, optionally stratified.
#[derive(Debug, Clone)]
pub struct RglRankSum {
    pub statistic: RankStatistic,
    /// Rank minus the mean rank of its stratum
    centred_ranks: Vec<f64>,
}

/// Rosner-Glynn-Lee two-group rank-sum statistic.
///
/// Ranks are taken within each stratum (`cluster_strata[c]` is the stratum of
/// cluster `c`; `None` means one stratum). Per stratum the expectation is
/// `n1 (n + 1) / 2` and the variance comes from the exchangeable correlation
/// model on the centred ranks. Strata are independent, so statistics,
/// expectations and variances add up.
pub fn rgl_rank_sum(data: &RankSumData, cluster_strata: Option<&[usize]>) -> Result<RglRankSum> {
    if data.n_groups != 2 {
        return Err(ClusWilcoxError::unsupported_design(
            "group",
            format!("RGL rank-sum needs exactly two groups, found {}", data.n_groups),
        ));
    }

    let layout = &data.layout;
    let n_strata = cluster_strata
        .and_then(|s| s.iter().max().map(|&m| m + 1))
        .unwrap_or(1);
    let mut strata_clusters: Vec<Vec<usize>> = vec![Vec::new(); n_strata];
    for c in 0..layout.n_clusters() {
        let s = cluster_strata.map_or(0, |s| s[c]);
        strata_clusters[s].push(c);
    }

    let in_group = data.indicator(&data.labels, 0);
    let unit = vec![1.0; data.values.len()];
    let mut centred_ranks = vec![0.0; data.values.len()];

    let mut statistic = 0.0;
    let mut expectation = 0.0;
    let mut variance = 0.0;

    for clusters in strata_clusters.iter().filter(|c| !c.is_empty()) {
        let members: Vec<Vec<usize>> = clusters.iter().map(|&c| layout.members[c].clone()).collect();
        let obs: Vec<usize> = members.iter().flatten().copied().collect();
        let values: Vec<f64> = obs.iter().map(|&o| data.values[o]).collect();
        let ranks = mid_ranks(&values)?;

        let n_s = obs.len();
        let mean_rank = (n_s as f64 + 1.0) / 2.0;
        let mut n1 = 0;
        let mut rank_sum = 0.0;
        for (&o, &r) in obs.iter().zip(&ranks) {
            centred_ranks[o] = r - mean_rank;
            if data.labels[o] == 0 {
                n1 += 1;
                rank_sum += r;
            }
        }

        statistic += rank_sum;
        expectation += rank_sum_expectation(n1, n_s);

        // one group or one cluster: the stratum rank sum is fixed
        if clusters.len() > 1 && n1 > 0 && n1 < n_s {
            let model = ExchangeableModel::estimate(&members, &centred_ranks, &unit);
            variance += model.variance(&in_group);
        }
    }

    Ok(RglRankSum {
        statistic: RankStatistic {
            statistic,
            expectation,
            variance,
        },
        centred_ranks,
    })
}

impl RelabelStatistic for RglRankSum {
    fn centred(&self, labels: &[usize]) -> f64 {
        labels
            .iter()
            .zip(&self.centred_ranks)
            .filter(|(l, _)| **l == 0)
            .map(|(_, r)| r)
            .sum()
    }
}

/// Datta-Satten rank sum for two or more groups.
#[derive(Debug, Clone)]
pub struct DsRankSum {
    n_groups: usize,
    /// `(n / m) / g_i` for every observation
    coefficients: Vec<f64>,
    /// Generalised rank minus `(n + 1) / 2`
    scores: Vec<f64>,
    mean_rank: f64,
    model: ExchangeableModel,
}

impl DsRankSum {
    /// Build the cluster-weighted ranks `1/2 + n F(x)` where `F` gives each
    /// cluster total weight `1/m`.
    pub fn new(data: &RankSumData) -> Result<Self> {
        let layout = &data.layout;
        let n = data.values.len() as f64;
        let m = layout.n_clusters() as f64;
        let sizes = layout.sizes();

        let obs_weights: Vec<f64> = layout
            .cluster_of
            .iter()
            .map(|&c| 1.0 / (m * sizes[c] as f64))
            .collect();
        let cdf = weighted_mid_cdf(&data.values, &obs_weights)?;

        let mean_rank = (n + 1.0) / 2.0;
        let scores: Vec<f64> = cdf.iter().map(|f| 0.5 + n * f - mean_rank).collect();
        let coefficients: Vec<f64> = layout
            .cluster_of
            .iter()
            .map(|&c| n / (m * sizes[c] as f64))
            .collect();

        // constraint weights only matter up to scale
        let constraint: Vec<f64> = layout
            .cluster_of
            .iter()
            .map(|&c| 1.0 / sizes[c] as f64)
            .collect();
        let model = ExchangeableModel::estimate(&layout.members, &scores, &constraint);

        Ok(DsRankSum {
            n_groups: data.n_groups,
            coefficients,
            scores,
            mean_rank,
            model,
        })
    }

    fn group_coefficients(&self, labels: &[usize], group: usize) -> Vec<f64> {
        labels
            .iter()
            .zip(&self.coefficients)
            .map(|(&l, &c)| if l == group { c } else { 0.0 })
            .collect()
    }

    fn deviation(&self, coefficients: &[f64]) -> f64 {
        coefficients.iter().zip(&self.scores).map(|(c, u)| c * u).sum()
    }

    /// Weighted rank sum of the designated group with its null moments.
    pub fn two_group(&self, labels: &[usize]) -> RankStatistic {
        let coefficients = self.group_coefficients(labels, 0);
        let weight: f64 = coefficients.iter().sum();
        let deviation = self.deviation(&coefficients);
        let expectation = weight * self.mean_rank;

        RankStatistic {
            statistic: expectation + deviation,
            expectation,
            variance: self.model.variance(&coefficients),
        }
    }

    /// Wald statistic over the first `K - 1` group deviations.
    ///
    /// `None` when the covariance matrix is not positive definite.
    pub fn wald(&self, labels: &[usize]) -> Option<f64> {
        let k = self.n_groups - 1;
        let coefficients: Vec<Vec<f64>> = (0..k)
            .map(|g| self.group_coefficients(labels, g))
            .collect();

        let deviations = DVector::from_iterator(k, coefficients.iter().map(|c| self.deviation(c)));
        let covariance = DMatrix::from_fn(k, k, |a, b| {
            self.model.covariance(&coefficients[a], &coefficients[b])
        });

        let cholesky = covariance.cholesky()?;
        let solved = cholesky.solve(&deviations);
        let q = deviations.dot(&solved);
        q.is_finite().then_some(q)
    }
}

impl RelabelStatistic for DsRankSum {
    fn centred(&self, labels: &[usize]) -> f64 {
        if self.n_groups == 2 {
            self.deviation(&self.group_coefficients(labels, 0))
        } else {
            self.wald(labels).unwrap_or(f64::NAN)
        }
    }
}

/// Dutta-Datta rank sum for informative group size within clusters.
#[derive(Debug, Clone)]
pub struct DdRankSum {
    members: Vec<Vec<usize>>,
    /// Pooled cluster-weighted distribution at each observation minus 1/2
    scores: Vec<f64>,
    /// `1 / (m g_i)`, the pooled weights
    pooled: Vec<f64>,
}

impl DdRankSum {
    pub fn new(data: &RankSumData) -> Result<Self> {
        if data.n_groups != 2 {
            return Err(ClusWilcoxError::unsupported_design(
                "group",
                format!("DD rank-sum needs exactly two groups, found {}", data.n_groups),
            ));
        }

        let layout = &data.layout;
        let m = layout.n_clusters() as f64;
        let sizes = layout.sizes();
        let pooled: Vec<f64> = layout
            .cluster_of
            .iter()
            .map(|&c| 1.0 / (m * sizes[c] as f64))
            .collect();
        let cdf = weighted_mid_cdf(&data.values, &pooled)?;

        Ok(DdRankSum {
            members: layout.members.clone(),
            scores: cdf.into_iter().map(|f| f - 0.5).collect(),
            pooled,
        })
    }

    /// Weights `1 / (M_1 n_i1)` on designated-group members, where `M_1`
    /// counts the clusters that contain the designated group.
    fn group_weights(&self, labels: &[usize]) -> Vec<f64> {
        let counts: Vec<usize> = self
            .members
            .iter()
            .map(|obs| obs.iter().filter(|&&o| labels[o] == 0).count())
            .collect();
        let occupied = counts.iter().filter(|&&c| c > 0).count() as f64;

        let mut weights = vec![0.0; labels.len()];
        for (obs, &count) in self.members.iter().zip(&counts) {
            if count == 0 {
                continue;
            }
            for &o in obs.iter().filter(|&&o| labels[o] == 0) {
                weights[o] = 1.0 / (occupied * count as f64);
            }
        }
        weights
    }

    /// Rank-sum-scale statistic `n1 (1/2 + n S)` with expectation `n1 (n+1)/2`
    /// and the cluster-resampling variance of `S`.
    pub fn moments(&self, labels: &[usize]) -> RankStatistic {
        let n = labels.len() as f64;
        let m = self.members.len() as f64;
        let n1 = labels.iter().filter(|&&l| l == 0).count() as f64;
        let weights = self.group_weights(labels);

        let centred: f64 = weights.iter().zip(&self.scores).map(|(v, u)| v * u).sum();

        let influence: Vec<f64> = self
            .members
            .iter()
            .map(|obs| {
                obs.iter()
                    .map(|&o| (weights[o] - self.pooled[o]) * self.scores[o])
                    .sum()
            })
            .collect();
        let mean_influence = influence.iter().sum::<f64>() / m;
        let spread: f64 = influence
            .iter()
            .map(|z| (z - mean_influence) * (z - mean_influence))
            .sum();
        let variance_s = if m > 1.0 { m / (m - 1.0) * spread } else { 0.0 };

        let scale = n1 * n;
        RankStatistic {
            statistic: n1 * (0.5 + n * (0.5 + centred)),
            expectation: n1 * (n + 1.0) / 2.0,
            variance: scale * scale * variance_s,
        }
    }
}

impl RelabelStatistic for DdRankSum {
    fn centred(&self, labels: &[usize]) -> f64 {
        let weights = self.group_weights(labels);
        weights.iter().zip(&self.scores).map(|(v, u)| v * u).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::inference::classical;
    use approx::assert_relative_eq;

    fn singleton_data(values: &[f64], labels: &[usize], n_groups: usize) -> RankSumData {
        RankSumData {
            values: values.to_vec(),
            labels: labels.to_vec(),
            n_groups,
            layout: ClusterLayout::new(&(0..values.len()).collect::<Vec<_>>()),
        }
    }

    const VALUES: [f64; 8] = [2.1, 3.4, 1.0, 3.4, 5.6, 0.2, 4.4, 2.8];
    const LABELS: [usize; 8] = [0, 0, 1, 0, 1, 1, 0, 1];

    fn classical_reference() -> RankStatistic {
        let in_group: Vec<bool> = LABELS.iter().map(|&l| l == 0).collect();
        classical::rank_sum(&VALUES, &in_group).unwrap()
    }

    #[test]
    fn test_rgl_singletons_match_classical() {
        let data = singleton_data(&VALUES, &LABELS, 2);
        let rgl = rgl_rank_sum(&data, None).unwrap();
        let reference = classical_reference();

        assert_relative_eq!(rgl.statistic.statistic, reference.statistic, epsilon = 1e-10);
        assert_relative_eq!(rgl.statistic.expectation, reference.expectation, epsilon = 1e-10);
        assert_relative_eq!(rgl.statistic.variance, reference.variance, epsilon = 1e-10);
    }

    #[test]
    fn test_ds_singletons_match_classical() {
        let data = singleton_data(&VALUES, &LABELS, 2);
        let ds = DsRankSum::new(&data).unwrap().two_group(&LABELS);
        let reference = classical_reference();

        assert_relative_eq!(ds.statistic, reference.statistic, epsilon = 1e-10);
        assert_relative_eq!(ds.expectation, reference.expectation, epsilon = 1e-10);
        assert_relative_eq!(ds.variance, reference.variance, epsilon = 1e-10);
    }

    #[test]
    fn test_dd_singletons_match_classical_location() {
        let data = singleton_data(&VALUES, &LABELS, 2);
        let dd = DdRankSum::new(&data).unwrap().moments(&LABELS);
        let reference = classical_reference();

        assert_relative_eq!(dd.statistic, reference.statistic, epsilon = 1e-10);
        assert_relative_eq!(dd.expectation, reference.expectation, epsilon = 1e-10);
        assert!(dd.variance > 0.0);
    }

    #[test]
    fn test_ds_three_groups_is_kruskal_wallis() {
        let labels = [0, 1, 2, 0, 1, 2, 0, 2];
        let data = singleton_data(&VALUES, &labels, 3);
        let q = DsRankSum::new(&data).unwrap().wald(&labels).unwrap();
        let h = classical::kruskal_wallis(&VALUES, &labels, 3).unwrap();
        assert_relative_eq!(q, h, epsilon = 1e-8);
    }

    #[test]
    fn test_centred_statistic_matches_moments() {
        let data = RankSumData {
            values: vec![1.2, 0.4, 2.2, 3.1, 0.9, 1.7, 2.5, 0.1],
            labels: vec![0, 0, 1, 1, 0, 0, 1, 1],
            n_groups: 2,
            layout: ClusterLayout::new(&[1, 1, 2, 2, 3, 3, 4, 4]),
        };

        let rgl = rgl_rank_sum(&data, None).unwrap();
        assert_relative_eq!(
            rgl.centred(&data.labels),
            rgl.statistic.statistic - rgl.statistic.expectation,
            epsilon = 1e-10
        );

        let ds = DsRankSum::new(&data).unwrap();
        let moments = ds.two_group(&data.labels);
        assert_relative_eq!(
            ds.centred(&data.labels),
            moments.statistic - moments.expectation,
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_stratified_rgl_adds_strata() {
        // stratum 0: clusters 1, 2; stratum 1: clusters 3, 4
        let data = RankSumData {
            values: vec![1.0, 2.0, 3.0, 4.0, 10.0, 20.0, 30.0, 40.0],
            labels: vec![0, 0, 1, 1, 0, 0, 1, 1],
            n_groups: 2,
            layout: ClusterLayout::new(&[1, 1, 2, 2, 3, 3, 4, 4]),
        };
        let stratified = rgl_rank_sum(&data, Some(&[0, 0, 1, 1])).unwrap();
        // within each stratum the designated cluster holds ranks 1 and 2
        assert_relative_eq!(stratified.statistic.statistic, 6.0);
        assert_relative_eq!(stratified.statistic.expectation, 10.0);
        assert!(stratified.statistic.variance > 0.0);
    }

    #[test]
    fn test_rgl_rejects_three_groups() {
        let data = singleton_data(&VALUES, &[0, 1, 2, 0, 1, 2, 0, 2], 3);
        let err = rgl_rank_sum(&data, None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusWilcoxError>(),
            Some(ClusWilcoxError::UnsupportedDesign { .. })
        ));
    }
}
