//! Exchangeable within-cluster correlation model for linear rank statistics.
//!
//! Scores `u` are treated as exchangeable random variables with variance
//! `sigma^2`, correlation `rho` between two members of the same cluster and
//! covariance `tau * sigma^2` between members of different clusters. `sigma^2`
//! and `rho` are estimated from the observed scores; `tau` follows from the
//! constraint that the weighted score total `sum v u` is fixed at zero.
//!
//! Since `sum v u` is fixed, `sum a u` and `sum (a - k v) u` are the same
//! statistic for any `k`. Coefficients are projected off `v` before the
//! covariance is formed, so the result does not depend on which multiple of
//! `v` a statistic carries. With unbalanced clusters this is what makes the
//! variance of a group's rank sum equal to that of its complement.
//!
//! With unit weights and single-member clusters the covariance of two linear
//! statistics is the classical permutation covariance, so every statistic
//! built on this model reduces to its independent-sample form.

/// Estimated variance components for one set of clusters.
#[derive(Debug, Clone)]
pub struct ExchangeableModel {
    members: Vec<Vec<usize>>,
    weights: Vec<f64>,
    sigma2: f64,
    rho: f64,
    tau: f64,
}

impl ExchangeableModel {
    /// Estimate the model from centred `scores` and observation `weights`.
    ///
    /// `members` lists the observation indices of each cluster; indices
    /// outside `members` are ignored, so one score array can serve several
    /// independent strata.
    pub fn estimate(members: &[Vec<usize>], scores: &[f64], weights: &[f64]) -> Self {
        let mut weight_total = 0.0;
        let mut square_total = 0.0;
        let mut pair_num = 0.0;
        let mut pair_den = 0.0;
        let mut cluster_weight_sq = 0.0;
        let mut cluster_weight_sum = 0.0;
        let mut obs_weight_sq = 0.0;

        for obs in members {
            let mut wu = 0.0;
            let mut wu_sq = 0.0;
            let mut w = 0.0;
            let mut w_sq = 0.0;
            for &o in obs {
                let v = weights[o];
                let u = scores[o];
                weight_total += v;
                square_total += v * u * u;
                wu += v * u;
                wu_sq += v * v * u * u;
                w += v;
                w_sq += v * v;
            }
            pair_num += wu * wu - wu_sq;
            pair_den += w * w - w_sq;
            cluster_weight_sq += w * w;
            cluster_weight_sum += w;
            obs_weight_sq += w_sq;
        }

        let sigma2 = if weight_total > 0.0 {
            square_total / weight_total
        } else {
            0.0
        };

        let rho = if pair_den > 0.0 && sigma2 > 0.0 {
            pair_num / pair_den / sigma2
        } else {
            0.0
        };

        // Var(sum v u) = 0 fixes the between-cluster covariance
        let between_den = cluster_weight_sum * cluster_weight_sum - cluster_weight_sq;
        let tau = if between_den > 0.0 {
            -(obs_weight_sq + rho * pair_den) / between_den
        } else {
            0.0
        };

        ExchangeableModel {
            members: members.to_vec(),
            weights: weights.to_vec(),
            sigma2,
            rho,
            tau,
        }
    }

    /// Estimated within-cluster correlation of the scores.
    pub fn rho(&self) -> f64 {
        self.rho
    }

    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// Component of `a` along the constraint weights, `sum a / sum v` over
    /// the model's members.
    fn constraint_share(&self, a: &[f64]) -> f64 {
        let (mut along, mut total) = (0.0, 0.0);
        for &o in self.members.iter().flatten() {
            along += a[o];
            total += self.weights[o];
        }
        if total > 0.0 { along / total } else { 0.0 }
    }

    /// Covariance of `sum a u` and `sum b u`.
    pub fn covariance(&self, a: &[f64], b: &[f64]) -> f64 {
        let share_a = self.constraint_share(a);
        let share_b = self.constraint_share(b);

        let mut diagonal = 0.0;
        let mut within = 0.0;
        let mut total_a = 0.0;
        let mut total_b = 0.0;
        let mut cluster_products = 0.0;

        for obs in &self.members {
            let mut cluster_a = 0.0;
            let mut cluster_b = 0.0;
            let mut own = 0.0;
            for &o in obs {
                let x = a[o] - share_a * self.weights[o];
                let y = b[o] - share_b * self.weights[o];
                cluster_a += x;
                cluster_b += y;
                own += x * y;
            }
            diagonal += own;
            within += cluster_a * cluster_b - own;
            cluster_products += cluster_a * cluster_b;
            total_a += cluster_a;
            total_b += cluster_b;
        }

        let between = total_a * total_b - cluster_products;
        self.sigma2 * (diagonal + self.rho * within + self.tau * between)
    }

    pub fn variance(&self, a: &[f64]) -> f64 {
        self.covariance(a, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn singleton_members(n: usize) -> Vec<Vec<usize>> {
        (0..n).map(|i| vec![i]).collect()
    }

    #[test]
    fn test_singletons_give_permutation_variance() {
        // centred ranks of 1..6, first three observations in the group
        let scores: Vec<f64> = (1..=6).map(|r| r as f64 - 3.5).collect();
        let unit = vec![1.0; 6];
        let model = ExchangeableModel::estimate(&singleton_members(6), &scores, &unit);
        let indicator = vec![1.0, 1.0, 1.0, 0.0, 0.0, 0.0];

        // n1 * n2 * (n + 1) / 12
        assert_relative_eq!(model.variance(&indicator), 3.0 * 3.0 * 7.0 / 12.0, epsilon = 1e-10);
        assert_relative_eq!(model.rho(), 0.0);
        assert_relative_eq!(model.tau(), -1.0 / 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_positive_within_cluster_correlation_inflates_variance() {
        // clusters {0,1}, {2,3}, {4,5} with similar scores inside each cluster
        let scores = vec![-2.5, -1.5, -0.5, 0.5, 1.5, 2.5];
        let unit = vec![1.0; 6];
        let clustered = ExchangeableModel::estimate(
            &[vec![0, 1], vec![2, 3], vec![4, 5]],
            &scores,
            &unit,
        );
        let independent = ExchangeableModel::estimate(&singleton_members(6), &scores, &unit);
        assert!(clustered.rho() > 0.0);

        // whole clusters in the group
        let indicator = vec![1.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        assert!(clustered.variance(&indicator) > independent.variance(&indicator));
    }

    #[test]
    fn test_constraint_gives_zero_variance_for_total() {
        let scores = vec![-1.0, 0.5, 2.0, -1.5, 0.0];
        let unit = vec![1.0; 5];
        let model = ExchangeableModel::estimate(&[vec![0, 1], vec![2], vec![3, 4]], &scores, &unit);
        assert_relative_eq!(model.variance(&unit), 0.0, epsilon = 1e-10);
    }

    #[test]
    fn test_variance_is_symmetric_in_complement_with_unequal_clusters() {
        let members = vec![vec![0, 1, 2], vec![3], vec![4, 5], vec![6, 7, 8, 9]];
        let scores = vec![-4.0, -3.0, 1.0, 2.5, -1.5, -0.5, 0.5, 3.0, 4.0, -2.0];
        let unit = vec![1.0; 10];
        let model = ExchangeableModel::estimate(&members, &scores, &unit);
        assert!(model.rho() != 0.0);

        let group: Vec<f64> = vec![1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let complement: Vec<f64> = group.iter().map(|g| 1.0 - g).collect();
        assert_relative_eq!(model.variance(&group), model.variance(&complement), epsilon = 1e-10);
        assert_relative_eq!(
            model.covariance(&group, &complement),
            -model.variance(&group),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_weighted_constraint_projection() {
        // weights 1 / g_i as in cluster-weighted ranks
        let members = vec![vec![0, 1, 2], vec![3], vec![4, 5]];
        let weights = vec![1.0 / 3.0, 1.0 / 3.0, 1.0 / 3.0, 1.0, 0.5, 0.5];
        let scores = vec![-2.0, 1.0, 0.5, 1.5, -1.0, 0.0];
        let model = ExchangeableModel::estimate(&members, &scores, &weights);

        let a = vec![0.0, 0.0, 0.0, 1.0, 0.5, 0.5];
        let shifted: Vec<f64> = a.iter().zip(&weights).map(|(x, v)| x - 2.0 * v).collect();
        assert_relative_eq!(model.variance(&a), model.variance(&shifted), epsilon = 1e-10);
        assert_relative_eq!(model.variance(&weights), 0.0, epsilon = 1e-10);
    }
}
