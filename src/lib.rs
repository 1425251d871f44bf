//! # cluster-wilcoxon
//!
//! Wilcoxon signed-rank and rank-sum tests for clustered data, where observations that share a
//! cluster (patient, litter, household) are correlated and the independent-sample tests would be
//! anti-conservative.
//!
//! ## Core Features
//!
//! - **Signed-rank tests**: Rosner-Glynn-Lee (RGL) and Datta-Satten (DS) for paired clustered data
//! - **Rank-sum tests**: RGL (optionally stratified), DS (two or more groups, Wald chi-square for
//!   more than two) and Dutta-Datta (DD) for informative group size within clusters
//! - **Permutation p-values**: exact enumeration of cluster sign flips or cluster relabellings, and
//!   parallel Monte Carlo draws with reproducible seeding
//! - **Classical reduction**: with single-member clusters the statistics reduce to the classical
//!   tie-corrected Wilcoxon (and Kruskal-Wallis) moments
//!
//! ## Quick Start
//!
//! Build a `ClusteredSample` from aligned value and cluster vectors, add group ids for a rank-sum
//! test, and pass it to `cluswilcox_test` together with a `ClusWilcoxConfig`.
//!
//! ## Module Organization
//!
//! - **[`testing`]**: Rank transforms, moment engines, permutation engine and the test entry points

pub mod testing;
