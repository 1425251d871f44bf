//! Clustered Wilcoxon tests.
//!
//! A call runs `validate -> select design -> compute moments -> asymptotic or
//! permutation p-value -> assemble`. Nothing is kept between calls.

use crate::testing::inference::rank_sum::{rgl_rank_sum, DdRankSum, DsRankSum, RankSumData};
use crate::testing::inference::signed_rank::{ds_signed_rank, rgl_signed_rank};
use crate::testing::permutation::{self, LabelScheme, NullDistribution, RelabelStatistic};
use crate::testing::utils::{extract_unique_groups, group_positions, ClusterLayout};
use crate::testing::{
    Alternative, ClusWilcoxConfig, ClusWilcoxError, Method, PermutationSummary, TestDesign,
    TestResult, TreatmentLevel,
};
use anyhow::Result;
use num_traits::ToPrimitive;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use single_utilities::traits::FloatOps;
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};
use tracing::{debug, warn};

pub mod classical;
pub mod exchangeable;
pub mod rank_sum;
pub mod signed_rank;

/// A rank statistic with its null expectation and variance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankStatistic {
    pub statistic: f64,
    pub expectation: f64,
    pub variance: f64,
}

impl RankStatistic {
    pub fn centred(&self) -> f64 {
        self.statistic - self.expectation
    }

    pub fn z_score(&self) -> f64 {
        self.centred() / self.variance.sqrt()
    }
}

/// Null moments of a design: a normal statistic or a Wald chi-square.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Moments {
    Normal(RankStatistic),
    ChiSquare { statistic: f64, df: usize },
}

impl Moments {
    pub fn statistic(&self) -> f64 {
        match self {
            Moments::Normal(stat) => stat.statistic,
            Moments::ChiSquare { statistic, .. } => *statistic,
        }
    }
}

/// Aligned per-observation input.
///
/// `x` holds the values (within-pair differences for a signed-rank test),
/// `cluster` the cluster id of each value. `group` is required for rank-sum
/// tests; `stratum` is only used by the RGL rank-sum test.
#[derive(Debug, Clone)]
pub struct ClusteredSample<T> {
    pub x: Vec<T>,
    pub cluster: Vec<usize>,
    pub group: Option<Vec<usize>>,
    pub stratum: Option<Vec<usize>>,
}

impl<T> ClusteredSample<T>
where
    T: FloatOps,
{
    pub fn new(x: Vec<T>, cluster: Vec<usize>) -> Self {
        ClusteredSample {
            x,
            cluster,
            group: None,
            stratum: None,
        }
    }

    pub fn with_groups(mut self, group: Vec<usize>) -> Self {
        self.group = Some(group);
        self
    }

    pub fn with_strata(mut self, stratum: Vec<usize>) -> Self {
        self.stratum = Some(stratum);
        self
    }
}

pub trait ClusteredRankTests {
    /// Signed-rank test regardless of `config.paired`.
    fn signed_rank_test(&self, config: &ClusWilcoxConfig) -> Result<TestResult>;

    /// Rank-sum test regardless of `config.paired`.
    fn rank_sum_test(&self, config: &ClusWilcoxConfig) -> Result<TestResult>;

    fn cluswilcox_test(&self, config: &ClusWilcoxConfig) -> Result<TestResult>;
}

impl<T> ClusteredRankTests for ClusteredSample<T>
where
    T: FloatOps,
{
    fn signed_rank_test(&self, config: &ClusWilcoxConfig) -> Result<TestResult> {
        cluswilcox_test(self, &config.clone().with_paired(true))
    }

    fn rank_sum_test(&self, config: &ClusWilcoxConfig) -> Result<TestResult> {
        cluswilcox_test(self, &config.clone().with_paired(false))
    }

    fn cluswilcox_test(&self, config: &ClusWilcoxConfig) -> Result<TestResult> {
        cluswilcox_test(self, config)
    }
}

/// Run a clustered Wilcoxon test.
///
/// Monte Carlo draws are seeded from `config.seed`, or from the thread RNG
/// when no seed is given.
pub fn cluswilcox_test<T>(sample: &ClusteredSample<T>, config: &ClusWilcoxConfig) -> Result<TestResult>
where
    T: FloatOps,
{
    let seed = config
        .seed
        .unwrap_or_else(|| rand::thread_rng().next_u64());
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    cluswilcox_test_with_rng(sample, config, &mut rng)
}

/// Run a clustered Wilcoxon test drawing randomness from `rng`.
///
/// `config.seed` is ignored here.
pub fn cluswilcox_test_with_rng<T, R>(
    sample: &ClusteredSample<T>,
    config: &ClusWilcoxConfig,
    rng: &mut R,
) -> Result<TestResult>
where
    T: FloatOps,
    R: RngCore + ?Sized,
{
    let input = validate_inputs(sample, config)?;
    let design = TestDesign::resolve(config.paired, config.method)?;
    debug!(%design, n_obs = input.x.len(), "running clustered Wilcoxon test");

    let prepared = compute_moments(design, &input, config)?;

    let alternative = match prepared.moments {
        Moments::ChiSquare { .. } if config.alternative != Alternative::TwoSided => {
            warn!(
                alternative = ?config.alternative,
                "the multi-group test has a chi-square statistic; ignoring the one-sided alternative"
            );
            Alternative::TwoSided
        }
        _ => config.alternative,
    };

    let permutation = if config.exact {
        permutation_path(&prepared, config, alternative, rng)?
    } else {
        None
    };
    let p_value = match &permutation {
        Some((p, _)) => *p,
        None => asymptotic_p_value(&prepared.moments, alternative),
    };

    Ok(assemble(&prepared, config.mu, alternative, p_value, permutation.map(|(_, s)| s)))
}

struct CleanInput {
    x: Vec<f64>,
    cluster: Vec<usize>,
    group: Option<Vec<usize>>,
    stratum: Option<Vec<usize>>,
}

fn check_length(argument: &'static str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(ClusWilcoxError::invalid_input(
            argument,
            format!("expected {} entries, got {}", expected, actual),
        ));
    }
    Ok(())
}

fn to_finite<T: ToPrimitive>(values: &[T]) -> Result<Vec<f64>> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            v.to_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    ClusWilcoxError::invalid_input("x", format!("observation {} is not finite", i))
                })
        })
        .collect()
}

fn validate_inputs<T>(sample: &ClusteredSample<T>, config: &ClusWilcoxConfig) -> Result<CleanInput>
where
    T: FloatOps,
{
    let n = sample.x.len();
    if n == 0 {
        return Err(ClusWilcoxError::invalid_input("x", "sample is empty"));
    }
    check_length("cluster", n, sample.cluster.len())?;
    if let Some(group) = &sample.group {
        check_length("group", n, group.len())?;
    }
    if let Some(stratum) = &sample.stratum {
        check_length("stratum", n, stratum.len())?;
    }

    if !config.mu.is_finite() {
        return Err(ClusWilcoxError::invalid_input("mu", "must be a finite number"));
    }
    match (config.paired, &sample.group) {
        (true, Some(_)) => {
            return Err(ClusWilcoxError::conflict(
                "group",
                "a paired test takes within-pair differences and no group vector",
            ));
        }
        (false, None) => {
            return Err(ClusWilcoxError::invalid_input(
                "group",
                "a rank-sum test needs a group vector",
            ));
        }
        _ => {}
    }

    Ok(CleanInput {
        x: to_finite(&sample.x)?,
        cluster: sample.cluster.clone(),
        group: sample.group.clone(),
        stratum: sample.stratum.clone(),
    })
}

/// How the observed labelling is perturbed under the null.
enum NullModel {
    /// Centred statistic is the sum of these cluster scores
    SignFlip(Vec<f64>),
    Relabel {
        scheme: LabelScheme,
        statistic: Box<dyn RelabelStatistic>,
    },
}

struct PreparedTest {
    design: TestDesign,
    moments: Moments,
    null: NullModel,
    n_obs: usize,
    n_clusters: usize,
    balanced: bool,
    n_groups: Option<usize>,
    treatment: Option<TreatmentLevel>,
}

fn require_clusters(layout: &ClusterLayout) -> Result<()> {
    if layout.n_clusters() < 2 {
        return Err(ClusWilcoxError::degenerate(
            "cluster",
            format!("at least two clusters are needed, found {}", layout.n_clusters()),
        ));
    }
    Ok(())
}

fn compute_moments(
    design: TestDesign,
    input: &CleanInput,
    config: &ClusWilcoxConfig,
) -> Result<PreparedTest> {
    let prepared = if design.is_signed_rank() {
        prepare_signed_rank(design, input, config.mu)?
    } else {
        prepare_rank_sum(design, input, config.mu)?
    };

    let moments = prepared.moments;
    match moments {
        Moments::Normal(stat) if !(stat.variance > 0.0 && stat.variance.is_finite()) => {
            Err(ClusWilcoxError::degenerate(
                "x",
                format!("null variance of the statistic is {}", stat.variance),
            ))
        }
        Moments::ChiSquare { statistic, .. } if !statistic.is_finite() => Err(
            ClusWilcoxError::degenerate("x", "the Wald statistic is not finite"),
        ),
        _ => Ok(prepared),
    }
}

fn prepare_signed_rank(design: TestDesign, input: &CleanInput, mu: f64) -> Result<PreparedTest> {
    if input.stratum.is_some() {
        warn!("strata are only used by the RGL rank-sum test; ignoring them");
    }

    let (d, cluster): (Vec<f64>, Vec<usize>) = input
        .x
        .iter()
        .zip(&input.cluster)
        .map(|(&v, &c)| (v - mu, c))
        .filter(|(d, _)| *d != 0.0)
        .unzip();
    let dropped = input.x.len() - d.len();
    if dropped > 0 {
        warn!(dropped, "dropping zero differences");
    }
    if d.is_empty() {
        return Err(ClusWilcoxError::degenerate("x", "all differences are zero"));
    }

    let layout = ClusterLayout::new(&cluster);
    require_clusters(&layout)?;

    let moments = match design.method() {
        Method::Rgl => rgl_signed_rank(&d, &layout)?,
        Method::Ds => ds_signed_rank(&d, &layout)?,
        Method::Dd => {
            return Err(ClusWilcoxError::unsupported_design(
                "method",
                "the DD method is only defined for rank-sum tests",
            ));
        }
    };

    Ok(PreparedTest {
        design,
        moments: Moments::Normal(moments.statistic),
        null: NullModel::SignFlip(moments.cluster_scores),
        n_obs: d.len(),
        n_clusters: layout.n_clusters(),
        balanced: layout.is_balanced(),
        n_groups: None,
        treatment: None,
    })
}

fn prepare_rank_sum(design: TestDesign, input: &CleanInput, mu: f64) -> Result<PreparedTest> {
    let group = input
        .group
        .as_deref()
        .ok_or_else(|| ClusWilcoxError::invalid_input("group", "a rank-sum test needs a group vector"))?;

    let unique = extract_unique_groups(group);
    let n_groups = unique.len();
    if n_groups < 2 {
        return Err(ClusWilcoxError::invalid_input(
            "group",
            "a rank-sum test needs at least two groups",
        ));
    }
    if n_groups > 2 && design.method() != Method::Ds {
        return Err(ClusWilcoxError::unsupported_design(
            "group",
            format!("the {} compares exactly two groups, found {}", design, n_groups),
        ));
    }
    if n_groups > 2 && mu != 0.0 {
        return Err(ClusWilcoxError::conflict(
            "mu",
            "a location shift is only defined for two groups",
        ));
    }

    let labels = group_positions(group, &unique);
    let values: Vec<f64> = input
        .x
        .iter()
        .zip(&labels)
        .map(|(&v, &l)| if l == 0 { v - mu } else { v })
        .collect();

    let layout = ClusterLayout::new(&input.cluster);
    require_clusters(&layout)?;
    let treatment = layout.treatment_level(&labels);
    debug!(?treatment, n_groups, "rank-sum design");

    let cluster_strata = match &input.stratum {
        Some(stratum) if design == TestDesign::RankSumRgl && treatment == TreatmentLevel::Cluster => {
            Some(layout.cluster_strata(stratum)?)
        }
        Some(_) => {
            warn!(
                %design,
                ?treatment,
                "strata are only used by the RGL rank-sum test with cluster-level groups; ignoring them"
            );
            None
        }
        None => None,
    };

    let scheme = match treatment {
        TreatmentLevel::Cluster => LabelScheme::for_clusters(&layout, &labels, cluster_strata.as_deref()),
        TreatmentLevel::Individual => LabelScheme::for_individuals(&layout, &labels),
    };

    let n_obs = values.len();
    let n_clusters = layout.n_clusters();
    let balanced = layout.is_balanced();
    let data = RankSumData {
        values,
        labels,
        n_groups,
        layout,
    };

    let (moments, statistic): (Moments, Box<dyn RelabelStatistic>) = match design.method() {
        Method::Rgl => {
            let rgl = rgl_rank_sum(&data, cluster_strata.as_deref())?;
            (Moments::Normal(rgl.statistic), Box::new(rgl))
        }
        Method::Ds => {
            let ds = DsRankSum::new(&data)?;
            let moments = if n_groups == 2 {
                Moments::Normal(ds.two_group(&data.labels))
            } else {
                let q = ds.wald(&data.labels).ok_or_else(|| {
                    ClusWilcoxError::degenerate("x", "covariance of the group rank sums is singular")
                })?;
                Moments::ChiSquare {
                    statistic: q,
                    df: n_groups - 1,
                }
            };
            (moments, Box::new(ds))
        }
        Method::Dd => {
            let dd = DdRankSum::new(&data)?;
            (Moments::Normal(dd.moments(&data.labels)), Box::new(dd))
        }
    };

    Ok(PreparedTest {
        design,
        moments,
        null: NullModel::Relabel { scheme, statistic },
        n_obs,
        n_clusters,
        balanced,
        n_groups: Some(n_groups),
        treatment: Some(treatment),
    })
}

fn asymptotic_p_value(moments: &Moments, alternative: Alternative) -> f64 {
    match moments {
        Moments::Normal(stat) => {
            let z = stat.z_score();
            let normal = Normal::new(0.0, 1.0).unwrap();
            let p = match alternative {
                Alternative::TwoSided => 2.0 * normal.cdf(-z.abs()),
                Alternative::Less => normal.cdf(z),
                Alternative::Greater => normal.cdf(-z),
            };
            p.min(1.0)
        }
        Moments::ChiSquare { statistic, df } => match ChiSquared::new(*df as f64) {
            Ok(chi) => chi.sf(*statistic),
            Err(_) => 1.0,
        },
    }
}

/// Empirical p-value, or `None` when exact enumeration is unavailable and
/// the asymptotic p-value should be used instead.
fn permutation_path<R>(
    prepared: &PreparedTest,
    config: &ClusWilcoxConfig,
    alternative: Alternative,
    rng: &mut R,
) -> Result<Option<(f64, PermutationSummary)>>
where
    R: RngCore + ?Sized,
{
    let exact = config.permutations == 0;
    if exact && !prepared.design.supports_exact_enumeration(prepared.treatment) {
        if config.strict_exact {
            return Err(ClusWilcoxError::unsupported_design(
                "exact",
                format!("exact enumeration is not available for the {}", prepared.design),
            ));
        }
        warn!(
            design = %prepared.design,
            "exact enumeration is not available; using the asymptotic p-value"
        );
        return Ok(None);
    }

    let (null, observed): (NullDistribution, f64) = match &prepared.null {
        NullModel::SignFlip(scores) => {
            let null = if exact {
                permutation::exact_sign_flip(scores, config.max_enumeration)?
            } else {
                permutation::monte_carlo_sign_flip(scores, config.permutations, rng)
            };
            (null, scores.iter().sum())
        }
        NullModel::Relabel { scheme, statistic } => {
            let null = if exact {
                permutation::exact_relabel(scheme, statistic.as_ref(), config.max_enumeration)?
            } else {
                permutation::monte_carlo_relabel(scheme, statistic.as_ref(), config.permutations, rng)
            };
            (null, statistic.centred(scheme.observed()))
        }
    };

    debug!(mode = ?null.mode, size = null.values.len(), "permutation null distribution");
    Ok(Some((null.p_value(observed, alternative), null.summary())))
}

fn assemble(
    prepared: &PreparedTest,
    mu: f64,
    alternative: Alternative,
    p_value: f64,
    permutation: Option<PermutationSummary>,
) -> TestResult {
    let mut result = TestResult::new(prepared.design, prepared.moments.statistic(), p_value)
        .with_hypothesis(alternative, mu)
        .with_counts(prepared.n_obs, prepared.n_clusters, prepared.balanced);

    result = match prepared.moments {
        Moments::Normal(stat) => result
            .with_moments(stat.expectation, stat.variance)
            .with_z_score(stat.z_score()),
        Moments::ChiSquare { df, .. } => result.with_degrees_of_freedom(df),
    };
    if let Some(k) = prepared.n_groups {
        result = result.with_groups(k);
    }
    if let Some(summary) = permutation {
        result = result.with_permutation(summary);
    }
    result
}
