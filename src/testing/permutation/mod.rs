//! Permutation null distributions.
//!
//! Relabellings are independent, so both exact enumeration and Monte Carlo
//! draws are evaluated on the rayon pool. Monte Carlo draws are split into
//! fixed-size chunks seeded from a single master seed taken from the caller's
//! RNG; the resulting distribution does not depend on the number of threads.

use crate::testing::{Alternative, ClusWilcoxError, PermutationMode, PermutationSummary};
use anyhow::Result;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

pub mod schemes;

pub use schemes::LabelScheme;

/// Draws evaluated per Monte Carlo work unit.
const CHUNK_SIZE: usize = 256;

/// Cluster count above which exact enumeration is not recommended.
pub const EXACT_CLUSTER_WARNING: usize = 50;

/// A statistic that can be re-evaluated under any relabelling.
///
/// `centred` returns the statistic minus its null expectation for that
/// labelling (or a chi-square type statistic), so that large values are
/// extreme. A non-finite value marks an undefined relabelling and is never
/// counted as extreme.
pub trait RelabelStatistic: Sync {
    fn centred(&self, labels: &[usize]) -> f64;
}

/// Null distribution of a centred statistic, scoped to one test call.
#[derive(Debug, Clone)]
pub struct NullDistribution {
    pub values: Vec<f64>,
    pub mode: PermutationMode,
}

impl NullDistribution {
    pub fn summary(&self) -> PermutationSummary {
        PermutationSummary {
            mode: self.mode,
            draws: self.values.len(),
        }
    }

    /// Number of null values at least as extreme as `observed`.
    pub fn count_extreme(&self, observed: f64, alternative: Alternative) -> usize {
        self.values
            .par_iter()
            .filter(|&&v| is_extreme(v, observed, alternative))
            .count()
    }

    /// Empirical p-value.
    ///
    /// Exact enumeration contains the observed labelling, so `count / N` is
    /// never zero. Monte Carlo uses `(count + 1) / (B + 1)`.
    pub fn p_value(&self, observed: f64, alternative: Alternative) -> f64 {
        let count = self.count_extreme(observed, alternative) as f64;
        let total = self.values.len() as f64;
        match self.mode {
            PermutationMode::Exact => (count / total).min(1.0),
            PermutationMode::MonteCarlo => ((count + 1.0) / (total + 1.0)).min(1.0),
        }
    }
}

fn is_extreme(value: f64, observed: f64, alternative: Alternative) -> bool {
    if !value.is_finite() {
        return false;
    }
    let tolerance = 1e-9 * observed.abs().max(1.0);
    match alternative {
        Alternative::TwoSided => value.abs() >= observed.abs() - tolerance,
        Alternative::Greater => value >= observed - tolerance,
        Alternative::Less => value <= observed + tolerance,
    }
}

fn warn_if_large(n_clusters: usize) {
    if n_clusters > EXACT_CLUSTER_WARNING {
        warn!(
            n_clusters,
            "exact enumeration is not recommended beyond {} clusters", EXACT_CLUSTER_WARNING
        );
    }
}

fn check_limit(size: Option<u64>, max_enumeration: u64) -> Result<usize> {
    match size {
        Some(size) if size <= max_enumeration => usize::try_from(size).map_err(|_| {
            ClusWilcoxError::conflict("max_enumeration", "enumeration does not fit in memory")
        }),
        Some(size) => Err(ClusWilcoxError::conflict(
            "max_enumeration",
            format!(
                "exact enumeration needs {} relabellings, above the limit of {}; use Monte Carlo draws",
                size, max_enumeration
            ),
        )),
        None => Err(ClusWilcoxError::conflict(
            "max_enumeration",
            "exact enumeration size overflows; use Monte Carlo draws",
        )),
    }
}

/// Every sign pattern of the clusters; the centred statistic of pattern
/// `mask` is `sum_i (-1)^{bit i} scores[i]`. Pattern 0 is the observed one.
pub fn exact_sign_flip(scores: &[f64], max_enumeration: u64) -> Result<NullDistribution> {
    warn_if_large(scores.len());
    let size = (scores.len() < 64).then(|| 1u64 << scores.len());
    let total = check_limit(size, max_enumeration)?;
    debug!(patterns = total, "enumerating cluster sign flips");

    let values = (0..total)
        .into_par_iter()
        .map(|mask| {
            scores
                .iter()
                .enumerate()
                .map(|(i, &s)| if mask >> i & 1 == 1 { -s } else { s })
                .sum::<f64>()
        })
        .collect();

    Ok(NullDistribution {
        values,
        mode: PermutationMode::Exact,
    })
}

/// Random sign flips of whole clusters.
pub fn monte_carlo_sign_flip<R: RngCore + ?Sized>(
    scores: &[f64],
    draws: usize,
    rng: &mut R,
) -> NullDistribution {
    let master = rng.next_u64();
    debug!(draws, "drawing cluster sign flips");

    let values = chunked(draws, master, |local, len| {
        (0..len)
            .map(|_| {
                scores
                    .iter()
                    .map(|&s| if local.gen_bool(0.5) { -s } else { s })
                    .sum::<f64>()
            })
            .collect()
    });

    NullDistribution {
        values,
        mode: PermutationMode::MonteCarlo,
    }
}

/// Every cluster-level relabelling of `scheme`.
///
/// Fails with `UnsupportedDesign` for individual-level schemes.
pub fn exact_relabel<S: RelabelStatistic + ?Sized>(
    scheme: &LabelScheme,
    statistic: &S,
    max_enumeration: u64,
) -> Result<NullDistribution> {
    let enumeration = scheme.enumeration().ok_or_else(|| {
        ClusWilcoxError::unsupported_design(
            "exact",
            "exact enumeration needs cluster-level treatment",
        )
    })?;
    if let LabelScheme::Cluster { members, .. } = scheme {
        warn_if_large(members.len());
    }

    let total = check_limit(enumeration.size(), max_enumeration)?;
    debug!(relabellings = total, "enumerating cluster relabellings");
    let arrangements = enumeration.arrangements();

    let values = (0..total)
        .into_par_iter()
        .map_init(Vec::new, |labels, index| {
            enumeration.fill(&arrangements, index, labels);
            statistic.centred(labels)
        })
        .collect();

    Ok(NullDistribution {
        values,
        mode: PermutationMode::Exact,
    })
}

/// Random relabellings drawn from `scheme`.
pub fn monte_carlo_relabel<S, R>(
    scheme: &LabelScheme,
    statistic: &S,
    draws: usize,
    rng: &mut R,
) -> NullDistribution
where
    S: RelabelStatistic + ?Sized,
    R: RngCore + ?Sized,
{
    let master = rng.next_u64();
    debug!(draws, "drawing random relabellings");

    let values = chunked(draws, master, |local, len| {
        let mut labels = Vec::with_capacity(scheme.observed().len());
        (0..len)
            .map(|_| {
                scheme.draw(local, &mut labels);
                statistic.centred(&labels)
            })
            .collect()
    });

    NullDistribution {
        values,
        mode: PermutationMode::MonteCarlo,
    }
}

/// Run `work` over `draws` split into chunks, chunk `k` using stream `k` of
/// the ChaCha generator seeded with `master`.
fn chunked<F>(draws: usize, master: u64, work: F) -> Vec<f64>
where
    F: Fn(&mut ChaCha8Rng, usize) -> Vec<f64> + Sync,
{
    let n_chunks = draws.div_ceil(CHUNK_SIZE);
    (0..n_chunks)
        .into_par_iter()
        .map(|chunk| {
            let mut local = ChaCha8Rng::seed_from_u64(master);
            local.set_stream(chunk as u64);
            let len = CHUNK_SIZE.min(draws - chunk * CHUNK_SIZE);
            work(&mut local, len)
        })
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    struct GroupSum(Vec<f64>);

    impl RelabelStatistic for GroupSum {
        fn centred(&self, labels: &[usize]) -> f64 {
            let mean = self.0.iter().sum::<f64>() / self.0.len() as f64;
            labels
                .iter()
                .zip(&self.0)
                .filter(|(l, _)| **l == 0)
                .map(|(_, v)| v - mean)
                .sum()
        }
    }

    #[test]
    fn test_exact_sign_flip_enumerates_all_patterns() {
        let null = exact_sign_flip(&[1.0, 2.0, 3.0], 1 << 10).unwrap();
        assert_eq!(null.values.len(), 8);
        assert_relative_eq!(null.values[0], 6.0);
        let total: f64 = null.values.iter().sum();
        assert_relative_eq!(total, 0.0);
        // only the observed pattern reaches +6, its mirror reaches -6
        assert_relative_eq!(null.p_value(6.0, Alternative::Greater), 1.0 / 8.0);
        assert_relative_eq!(null.p_value(6.0, Alternative::TwoSided), 2.0 / 8.0);
    }

    #[test]
    fn test_enumeration_limit() {
        let err = exact_sign_flip(&[1.0; 12], 1000).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusWilcoxError>(),
            Some(ClusWilcoxError::ConfigurationConflict { argument: "max_enumeration", .. })
        ));
    }

    #[test]
    fn test_monte_carlo_p_value_is_never_zero() {
        let null = NullDistribution {
            values: vec![0.1, -0.2, 0.3],
            mode: PermutationMode::MonteCarlo,
        };
        assert_relative_eq!(null.p_value(10.0, Alternative::TwoSided), 0.25);
    }

    #[test]
    fn test_monte_carlo_is_reproducible() {
        let scores = [0.5, 1.5, -2.0, 3.0, 0.25];
        let a = monte_carlo_sign_flip(&scores, 1000, &mut ChaCha8Rng::seed_from_u64(9));
        let b = monte_carlo_sign_flip(&scores, 1000, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a.values, b.values);
        assert_eq!(a.values.len(), 1000);
    }

    #[test]
    fn test_exact_relabel_matches_combinations() {
        use crate::testing::utils::ClusterLayout;
        let layout = ClusterLayout::new(&[0, 1, 2, 3]);
        let labels = vec![0, 0, 1, 1];
        let scheme = LabelScheme::for_clusters(&layout, &labels, None);
        let statistic = GroupSum(vec![1.0, 2.0, 3.0, 4.0]);

        let null = exact_relabel(&scheme, &statistic, 100).unwrap();
        assert_eq!(null.values.len(), 6);
        let observed = statistic.centred(&labels);
        assert_relative_eq!(observed, -2.0);
        // {1,2} and {3,4} are the only sums as far from 5 as the observed one
        assert_relative_eq!(null.p_value(observed, Alternative::TwoSided), 2.0 / 6.0);
        assert_relative_eq!(null.p_value(observed, Alternative::Less), 1.0 / 6.0);
    }

    #[test]
    fn test_individual_scheme_has_no_enumeration() {
        use crate::testing::utils::ClusterLayout;
        let layout = ClusterLayout::new(&[0, 0, 1, 1]);
        let scheme = LabelScheme::for_individuals(&layout, &[0, 1, 0, 1]);
        let statistic = GroupSum(vec![1.0, 2.0, 3.0, 4.0]);
        assert!(exact_relabel(&scheme, &statistic, 100).is_err());
    }
}
