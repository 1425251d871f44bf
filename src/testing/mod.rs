use std::fmt;

pub mod error;
pub mod inference;
pub mod permutation;
pub mod rank;

pub mod utils;

pub use error::ClusWilcoxError;

/// Clustered test methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Rosner-Glynn-Lee
    Rgl,
    /// Datta-Satten
    Ds,
    /// Dutta-Datta, informative group size within clusters
    Dd,
}

/// The closed set of supported (test family, method) combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestDesign {
    SignedRankRgl,
    SignedRankDs,
    RankSumRgl,
    RankSumDs,
    RankSumDd,
}

impl TestDesign {
    /// Resolve `(paired, method)` once; the DD method has no signed-rank form.
    pub fn resolve(paired: bool, method: Method) -> anyhow::Result<Self> {
        match (paired, method) {
            (true, Method::Rgl) => Ok(TestDesign::SignedRankRgl),
            (true, Method::Ds) => Ok(TestDesign::SignedRankDs),
            (true, Method::Dd) => Err(ClusWilcoxError::unsupported_design(
                "method",
                "the DD method is only defined for rank-sum tests",
            )),
            (false, Method::Rgl) => Ok(TestDesign::RankSumRgl),
            (false, Method::Ds) => Ok(TestDesign::RankSumDs),
            (false, Method::Dd) => Ok(TestDesign::RankSumDd),
        }
    }

    pub fn is_signed_rank(&self) -> bool {
        matches!(self, TestDesign::SignedRankRgl | TestDesign::SignedRankDs)
    }

    pub fn method(&self) -> Method {
        match self {
            TestDesign::SignedRankRgl | TestDesign::RankSumRgl => Method::Rgl,
            TestDesign::SignedRankDs | TestDesign::RankSumDs => Method::Ds,
            TestDesign::RankSumDd => Method::Dd,
        }
    }

    /// Whether the null distribution can be enumerated exactly.
    pub fn supports_exact_enumeration(&self, treatment: Option<TreatmentLevel>) -> bool {
        match self {
            TestDesign::SignedRankRgl => true,
            TestDesign::RankSumRgl => treatment == Some(TreatmentLevel::Cluster),
            TestDesign::SignedRankDs | TestDesign::RankSumDs | TestDesign::RankSumDd => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestDesign::SignedRankRgl => "Wilcoxon signed rank test for clustered data (Rosner-Glynn-Lee)",
            TestDesign::SignedRankDs => "Wilcoxon signed rank test for clustered data (Datta-Satten)",
            TestDesign::RankSumRgl => "Wilcoxon rank sum test for clustered data (Rosner-Glynn-Lee)",
            TestDesign::RankSumDs => "Wilcoxon rank sum test for clustered data (Datta-Satten)",
            TestDesign::RankSumDd => "Wilcoxon rank sum test for clustered data (Dutta-Datta)",
        }
    }
}

impl fmt::Display for TestDesign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Level at which group membership is assigned in a rank-sum design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreatmentLevel {
    /// All members of a cluster share one group
    Cluster,
    /// Members of a cluster may belong to different groups
    Individual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alternative {
    TwoSided,
    Less,
    Greater,
}

impl Alternative {
    /// The one-sided alternative pointing the other way.
    pub fn reversed(self) -> Self {
        match self {
            Alternative::TwoSided => Alternative::TwoSided,
            Alternative::Less => Alternative::Greater,
            Alternative::Greater => Alternative::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermutationMode {
    /// Every relabelling enumerated
    Exact,
    /// Random relabellings
    MonteCarlo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermutationSummary {
    pub mode: PermutationMode,
    /// Size of the null distribution
    pub draws: usize,
}

/// Options for a clustered Wilcoxon test.
///
/// Every field is explicit; `Default` gives an asymptotic two-sided RGL
/// rank-sum test of `mu = 0`.
#[derive(Debug, Clone)]
pub struct ClusWilcoxConfig {
    pub method: Method,
    /// Signed-rank test on (pre-differenced) values instead of rank-sum
    pub paired: bool,
    pub alternative: Alternative,
    /// Hypothesised location (signed-rank) or shift of the first group (rank-sum)
    pub mu: f64,
    /// Take the permutation path
    pub exact: bool,
    /// Monte Carlo draws; 0 requests exact enumeration
    pub permutations: usize,
    /// Seed for Monte Carlo draws, `None` seeds from entropy
    pub seed: Option<u64>,
    /// Fail instead of falling back to the asymptotic path when exact
    /// enumeration is unavailable
    pub strict_exact: bool,
    /// Largest null distribution exact enumeration may build
    pub max_enumeration: u64,
}

impl Default for ClusWilcoxConfig {
    fn default() -> Self {
        ClusWilcoxConfig {
            method: Method::Rgl,
            paired: false,
            alternative: Alternative::TwoSided,
            mu: 0.0,
            exact: false,
            permutations: 0,
            seed: None,
            strict_exact: false,
            max_enumeration: 1 << 24,
        }
    }
}

impl ClusWilcoxConfig {
    pub fn new(method: Method) -> Self {
        ClusWilcoxConfig {
            method,
            ..Default::default()
        }
    }

    pub fn with_paired(mut self, paired: bool) -> Self {
        self.paired = paired;
        self
    }

    pub fn with_alternative(mut self, alternative: Alternative) -> Self {
        self.alternative = alternative;
        self
    }

    pub fn with_mu(mut self, mu: f64) -> Self {
        self.mu = mu;
        self
    }

    /// Permutation path with exact enumeration.
    pub fn with_exact_enumeration(mut self) -> Self {
        self.exact = true;
        self.permutations = 0;
        self
    }

    /// Permutation path with `draws` Monte Carlo relabellings.
    pub fn with_monte_carlo(mut self, draws: usize) -> Self {
        self.exact = true;
        self.permutations = draws;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_strict_exact(mut self, strict: bool) -> Self {
        self.strict_exact = strict;
        self
    }

    pub fn with_max_enumeration(mut self, max: u64) -> Self {
        self.max_enumeration = max;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test statistic (rank-sum scale, or Wald chi-square for multi-group DS)
    pub statistic: f64,
    /// Null expectation of the statistic
    pub expectation: Option<f64>,
    /// Null variance of the statistic
    pub variance: Option<f64>,
    /// `(statistic - expectation) / sqrt(variance)`
    pub z_score: Option<f64>,
    pub p_value: f64,
    pub alternative: Alternative,
    pub mu: f64,
    pub design: TestDesign,
    /// All clusters have the same number of members
    pub balanced: bool,
    /// Number of groups (rank-sum only)
    pub n_groups: Option<usize>,
    /// Degrees of freedom (multi-group DS only)
    pub degrees_of_freedom: Option<usize>,
    pub n_obs: usize,
    pub n_clusters: usize,
    /// Present when the p-value comes from a permutation distribution
    pub permutation: Option<PermutationSummary>,
}

impl TestResult {
    /// Create a new test result with minimal information
    pub fn new(design: TestDesign, statistic: f64, p_value: f64) -> Self {
        TestResult {
            statistic,
            expectation: None,
            variance: None,
            z_score: None,
            p_value,
            alternative: Alternative::TwoSided,
            mu: 0.0,
            design,
            balanced: true,
            n_groups: None,
            degrees_of_freedom: None,
            n_obs: 0,
            n_clusters: 0,
            permutation: None,
        }
    }

    /// Add null expectation and variance
    pub fn with_moments(mut self, expectation: f64, variance: f64) -> Self {
        self.expectation = Some(expectation);
        self.variance = Some(variance);
        self
    }

    pub fn with_z_score(mut self, z: f64) -> Self {
        self.z_score = Some(z);
        self
    }

    pub fn with_hypothesis(mut self, alternative: Alternative, mu: f64) -> Self {
        self.alternative = alternative;
        self.mu = mu;
        self
    }

    pub fn with_counts(mut self, n_obs: usize, n_clusters: usize, balanced: bool) -> Self {
        self.n_obs = n_obs;
        self.n_clusters = n_clusters;
        self.balanced = balanced;
        self
    }

    pub fn with_groups(mut self, n_groups: usize) -> Self {
        self.n_groups = Some(n_groups);
        self
    }

    pub fn with_degrees_of_freedom(mut self, df: usize) -> Self {
        self.degrees_of_freedom = Some(df);
        self
    }

    pub fn with_permutation(mut self, summary: PermutationSummary) -> Self {
        self.permutation = Some(summary);
        self
    }

    /// Check if the result is statistically significant at the given threshold
    pub fn is_significant(&self, alpha: f64) -> bool {
        self.p_value < alpha
    }
}
