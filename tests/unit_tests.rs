use cluster_wilcoxon::testing::inference::{cluswilcox_test, ClusteredRankTests, ClusteredSample};
use cluster_wilcoxon::testing::{ClusWilcoxConfig, Method, PermutationMode};

#[cfg(test)]
mod quick_test {
    use super::*;
    use approx::assert_relative_eq;

    /// Four clusters of two paired differences.
    ///
    /// Ranks of |d| are 1..8, so the signed ranks per cluster are
    /// {1, -2}, {3, 4}, {-5, 6}, {7, -8} and the cluster scores S_i / 2 are
    /// -0.5, 3.5, 0.5, -0.5.
    fn four_clusters() -> ClusteredSample<f64> {
        ClusteredSample::new(
            vec![1.0, -2.0, 3.0, 4.0, -5.0, 6.0, 7.0, -8.0],
            vec![1, 1, 2, 2, 3, 3, 4, 4],
        )
    }

    #[test]
    fn check_exact_signed_rank_matches_hand_enumeration() {
        let scores = [-0.5, 3.5, 0.5, -0.5];
        let observed: f64 = scores.iter().sum();

        let mut greater = 0;
        let mut two_sided = 0;
        for mask in 0..16u32 {
            let value: f64 = scores
                .iter()
                .enumerate()
                .map(|(i, s)| if mask >> i & 1 == 1 { -s } else { *s })
                .sum();
            if value >= observed {
                greater += 1;
            }
            if value.abs() >= observed.abs() {
                two_sided += 1;
            }
        }
        assert_eq!(greater, 7);
        assert_eq!(two_sided, 14);

        let config = ClusWilcoxConfig::new(Method::Rgl).with_exact_enumeration();
        let result = four_clusters().signed_rank_test(&config).unwrap();

        println!("=== EXACT RGL SIGNED RANK ===");
        println!("T = {}, E = {:?}", result.statistic, result.expectation);
        println!("P-value: {}", result.p_value);

        // positive ranks 1 + 3 + 4 + 6 + 7, E = 8 * 9 / 4
        assert_relative_eq!(result.statistic, 21.0);
        assert_relative_eq!(result.expectation.unwrap(), 18.0);
        assert_relative_eq!(result.variance.unwrap(), 13.0);
        assert_relative_eq!(result.p_value, two_sided as f64 / 16.0);
        assert!(!result.is_significant(0.05));

        let summary = result.permutation.unwrap();
        assert_eq!(summary.mode, PermutationMode::Exact);
        assert_eq!(summary.draws, 16);

        let greater_config = config.with_alternative(cluster_wilcoxon::testing::Alternative::Greater);
        let result = four_clusters().signed_rank_test(&greater_config).unwrap();
        assert_relative_eq!(result.p_value, greater as f64 / 16.0);
    }

    #[test]
    fn check_monte_carlo_tracks_exact() {
        let exact = four_clusters()
            .signed_rank_test(&ClusWilcoxConfig::new(Method::Rgl).with_exact_enumeration())
            .unwrap();
        let monte_carlo = four_clusters()
            .signed_rank_test(
                &ClusWilcoxConfig::new(Method::Rgl)
                    .with_monte_carlo(20_000)
                    .with_seed(42),
            )
            .unwrap();

        println!("exact p = {}, Monte Carlo p = {}", exact.p_value, monte_carlo.p_value);
        assert!((exact.p_value - monte_carlo.p_value).abs() < 0.02);
        assert_eq!(monte_carlo.permutation.unwrap().draws, 20_000);
    }

    #[test]
    fn check_monte_carlo_with_2000_draws() {
        // cluster scores 1.5, 3.5, -0.5, 7.5, 9.5, 0.5, 13.5, 15.5 sum to 51 of
        // a possible 52: three sign patterns reach |51| on each side
        let sample = ClusteredSample::new(
            vec![
                1.0, 2.0, 3.0, 4.0, 5.0, -6.0, 7.0, 8.0, 9.0, 10.0, -11.0, 12.0, 13.0, 14.0, 15.0,
                16.0,
            ],
            vec![1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8],
        );
        let exact = sample
            .signed_rank_test(&ClusWilcoxConfig::new(Method::Rgl).with_exact_enumeration())
            .unwrap();
        assert_relative_eq!(exact.p_value, 6.0 / 256.0);

        let monte_carlo = sample
            .signed_rank_test(
                &ClusWilcoxConfig::new(Method::Rgl)
                    .with_monte_carlo(2000)
                    .with_seed(7),
            )
            .unwrap();
        println!("exact p = {}, Monte Carlo p = {}", exact.p_value, monte_carlo.p_value);
        assert!((exact.p_value - monte_carlo.p_value).abs() < 0.02);
        assert_eq!(monte_carlo.permutation.unwrap().draws, 2000);
    }

    #[test]
    fn check_ds_signed_rank_monte_carlo() {
        // equal cluster sizes: DS ranks are the ordinary mid-ranks and every
        // cluster weight is one, so DS and RGL share one sign-flip null
        let draws = |method| ClusWilcoxConfig::new(method).with_monte_carlo(4000).with_seed(42);
        let rgl = four_clusters().signed_rank_test(&draws(Method::Rgl)).unwrap();
        let ds = four_clusters().signed_rank_test(&draws(Method::Ds)).unwrap();
        let exact = four_clusters()
            .signed_rank_test(&ClusWilcoxConfig::new(Method::Rgl).with_exact_enumeration())
            .unwrap();

        println!("DS Monte Carlo p = {}, exact p = {}", ds.p_value, exact.p_value);
        assert_relative_eq!(ds.statistic, 21.0, epsilon = 1e-10);
        assert_relative_eq!(ds.variance.unwrap(), 13.0, epsilon = 1e-10);
        assert_relative_eq!(ds.p_value, rgl.p_value, epsilon = 1e-12);
        assert!((ds.p_value - exact.p_value).abs() < 0.025);

        let summary = ds.permutation.unwrap();
        assert_eq!(summary.mode, PermutationMode::MonteCarlo);
        assert_eq!(summary.draws, 4000);
    }

    #[test]
    fn check_exact_rank_sum_enumerates_cluster_choices() {
        // group 0 holds the two lowest clusters: the most extreme of C(4, 2) = 6 choices
        let sample = ClusteredSample::new(
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            vec![1, 1, 2, 2, 3, 3, 4, 4],
        )
        .with_groups(vec![0, 0, 0, 0, 1, 1, 1, 1]);

        let config = ClusWilcoxConfig::new(Method::Rgl).with_exact_enumeration();
        let result = cluswilcox_test(&sample, &config).unwrap();

        assert_relative_eq!(result.statistic, 10.0);
        assert_relative_eq!(result.expectation.unwrap(), 18.0);
        assert_relative_eq!(result.p_value, 2.0 / 6.0);
        assert_eq!(result.permutation.unwrap().draws, 6);

        let less = cluswilcox_test(
            &sample,
            &config.with_alternative(cluster_wilcoxon::testing::Alternative::Less),
        )
        .unwrap();
        assert_relative_eq!(less.p_value, 1.0 / 6.0);
    }
}
