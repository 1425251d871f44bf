//! Relabelling schemes that respect the exchangeability unit of a design.

use crate::testing::utils::ClusterLayout;
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;

/// How group labels may be permuted without breaking the null hypothesis.
#[derive(Debug, Clone)]
pub enum LabelScheme {
    /// One label per cluster, shuffled among the clusters of each stratum
    Cluster {
        members: Vec<Vec<usize>>,
        /// Per stratum: cluster positions and their observed labels
        strata: Vec<(Vec<usize>, Vec<usize>)>,
        observed: Vec<usize>,
    },
    /// Labels shuffled inside each cluster, then label vectors exchanged
    /// between clusters of equal size
    Individual {
        members: Vec<Vec<usize>>,
        /// Cluster positions grouped by cluster size
        size_classes: Vec<Vec<usize>>,
        observed: Vec<usize>,
    },
}

impl LabelScheme {
    /// Cluster-level scheme. `cluster_strata[c]` is the stratum of cluster `c`.
    pub fn for_clusters(
        layout: &ClusterLayout,
        labels: &[usize],
        cluster_strata: Option<&[usize]>,
    ) -> Self {
        let mut by_stratum: BTreeMap<usize, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
        for (c, obs) in layout.members.iter().enumerate() {
            let s = cluster_strata.map_or(0, |s| s[c]);
            let entry = by_stratum.entry(s).or_default();
            entry.0.push(c);
            entry.1.push(labels[obs[0]]);
        }

        LabelScheme::Cluster {
            members: layout.members.clone(),
            strata: by_stratum.into_values().collect(),
            observed: labels.to_vec(),
        }
    }

    pub fn for_individuals(layout: &ClusterLayout, labels: &[usize]) -> Self {
        let mut by_size: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (c, obs) in layout.members.iter().enumerate() {
            by_size.entry(obs.len()).or_default().push(c);
        }

        LabelScheme::Individual {
            members: layout.members.clone(),
            size_classes: by_size.into_values().collect(),
            observed: labels.to_vec(),
        }
    }

    pub fn observed(&self) -> &[usize] {
        match self {
            LabelScheme::Cluster { observed, .. } | LabelScheme::Individual { observed, .. } => {
                observed
            }
        }
    }

    /// Draw one random relabelling into `out`.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R, out: &mut Vec<usize>) {
        out.clear();
        out.extend_from_slice(self.observed());

        match self {
            LabelScheme::Cluster {
                members, strata, ..
            } => {
                for (clusters, labels) in strata {
                    let mut shuffled = labels.clone();
                    shuffled.shuffle(rng);
                    for (&c, &label) in clusters.iter().zip(&shuffled) {
                        for &o in &members[c] {
                            out[o] = label;
                        }
                    }
                }
            }
            LabelScheme::Individual {
                members,
                size_classes,
                observed,
            } => {
                for class in size_classes {
                    let mut targets = class.clone();
                    targets.shuffle(rng);
                    for (&source, &target) in class.iter().zip(&targets) {
                        let mut vector: Vec<usize> =
                            members[source].iter().map(|&o| observed[o]).collect();
                        vector.shuffle(rng);
                        for (&o, label) in members[target].iter().zip(vector) {
                            out[o] = label;
                        }
                    }
                }
            }
        }
    }

    /// Every distinct cluster-level relabelling, or `None` for individual-level
    /// schemes.
    pub fn enumeration(&self) -> Option<ClusterEnumeration> {
        match self {
            LabelScheme::Cluster {
                members,
                strata,
                observed,
            } => Some(ClusterEnumeration {
                members: members.clone(),
                strata: strata.clone(),
                n_obs: observed.len(),
            }),
            LabelScheme::Individual { .. } => None,
        }
    }
}

/// Distinct arrangements of cluster labels within strata.
///
/// Arrangements of a stratum are the distinct permutations of its label
/// multiset; the full enumeration is their product over strata.
#[derive(Debug, Clone)]
pub struct ClusterEnumeration {
    members: Vec<Vec<usize>>,
    strata: Vec<(Vec<usize>, Vec<usize>)>,
    n_obs: usize,
}

impl ClusterEnumeration {
    /// Number of relabellings, `None` on overflow.
    pub fn size(&self) -> Option<u64> {
        self.strata.iter().try_fold(1u64, |acc, (_, labels)| {
            acc.checked_mul(multinomial(labels)?)
        })
    }

    /// Materialise the arrangements of every stratum.
    pub fn arrangements(&self) -> Vec<Vec<Vec<usize>>> {
        self.strata
            .iter()
            .map(|(_, labels)| {
                let mut current = labels.clone();
                current.sort_unstable();
                let mut all = vec![current.clone()];
                while next_permutation(&mut current) {
                    all.push(current.clone());
                }
                all
            })
            .collect()
    }

    /// Write relabelling `index` (mixed radix over strata) into `out`.
    pub fn fill(&self, arrangements: &[Vec<Vec<usize>>], mut index: usize, out: &mut Vec<usize>) {
        out.clear();
        out.resize(self.n_obs, 0);
        for ((clusters, _), options) in self.strata.iter().zip(arrangements) {
            let chosen = &options[index % options.len()];
            index /= options.len();
            for (&c, &label) in clusters.iter().zip(chosen) {
                for &o in &self.members[c] {
                    out[o] = label;
                }
            }
        }
    }
}

/// Number of distinct arrangements of a label multiset.
fn multinomial(labels: &[usize]) -> Option<u64> {
    let mut counts: BTreeMap<usize, u64> = BTreeMap::new();
    for &l in labels {
        *counts.entry(l).or_default() += 1;
    }

    let mut remaining = labels.len() as u64;
    let mut total: u64 = 1;
    for &k in counts.values() {
        total = total.checked_mul(binomial(remaining, k)?)?;
        remaining -= k;
    }
    Some(total)
}

fn binomial(n: u64, k: u64) -> Option<u64> {
    let k = k.min(n - k);
    let mut c: u128 = 1;
    for i in 0..k {
        c = c.checked_mul((n - i) as u128)? / (i as u128 + 1);
    }
    u64::try_from(c).ok()
}

/// Lexicographic successor of a multiset permutation; `false` after the last.
fn next_permutation(v: &mut [usize]) -> bool {
    if v.len() < 2 {
        return false;
    }
    let mut i = v.len() - 1;
    while i > 0 && v[i - 1] >= v[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }
    let mut j = v.len() - 1;
    while v[j] <= v[i - 1] {
        j -= 1;
    }
    v.swap(i - 1, j);
    v[i..].reverse();
    true
}
