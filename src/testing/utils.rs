use crate::testing::{ClusWilcoxError, TreatmentLevel};
use std::collections::BTreeMap;

pub fn extract_unique_groups(group_ids: &[usize]) -> Vec<usize> {
    let mut unique_groups = group_ids.to_vec();
    unique_groups.sort();
    unique_groups.dedup();
    unique_groups
}

/// Map every group id to its position in `unique_groups` (0 is the designated group).
pub fn group_positions(group_ids: &[usize], unique_groups: &[usize]) -> Vec<usize> {
    group_ids
        .iter()
        .map(|g| unique_groups.binary_search(g).unwrap_or(0))
        .collect()
}

/// Observation indices of every cluster, clusters ordered by id.
#[derive(Debug, Clone)]
pub struct ClusterLayout {
    /// Distinct cluster ids in ascending order
    pub ids: Vec<usize>,
    /// members[i] = observation indices of cluster i
    /// Invariant: flatten(members) is a permutation of 0..n
    pub members: Vec<Vec<usize>>,
    /// cluster_of[obs] = position of the observation's cluster in `ids`
    pub cluster_of: Vec<usize>,
}

impl ClusterLayout {
    pub fn new(cluster_ids: &[usize]) -> Self {
        let mut by_id: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (obs, &id) in cluster_ids.iter().enumerate() {
            by_id.entry(id).or_default().push(obs);
        }

        let mut cluster_of = vec![0; cluster_ids.len()];
        let mut ids = Vec::with_capacity(by_id.len());
        let mut members = Vec::with_capacity(by_id.len());
        for (pos, (id, obs)) in by_id.into_iter().enumerate() {
            for &o in &obs {
                cluster_of[o] = pos;
            }
            ids.push(id);
            members.push(obs);
        }

        ClusterLayout {
            ids,
            members,
            cluster_of,
        }
    }

    pub fn n_clusters(&self) -> usize {
        self.members.len()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.members.iter().map(|m| m.len()).collect()
    }

    /// `true` iff every cluster has the same number of members.
    pub fn is_balanced(&self) -> bool {
        match self.members.first() {
            Some(first) => self.members.iter().all(|m| m.len() == first.len()),
            None => true,
        }
    }

    /// Cluster-level when every cluster carries a single label.
    pub fn treatment_level(&self, labels: &[usize]) -> TreatmentLevel {
        let uniform = self.members.iter().all(|m| {
            let first = labels[m[0]];
            m.iter().all(|&o| labels[o] == first)
        });
        if uniform {
            TreatmentLevel::Cluster
        } else {
            TreatmentLevel::Individual
        }
    }

    /// Stratum position of every cluster.
    ///
    /// Fails with `InvalidInput` when a cluster spans more than one stratum.
    pub fn cluster_strata(&self, stratum_ids: &[usize]) -> anyhow::Result<Vec<usize>> {
        let unique = extract_unique_groups(stratum_ids);
        let mut strata = Vec::with_capacity(self.n_clusters());
        for (pos, obs) in self.members.iter().enumerate() {
            let first = stratum_ids[obs[0]];
            if obs.iter().any(|&o| stratum_ids[o] != first) {
                return Err(ClusWilcoxError::invalid_input(
                    "stratum",
                    format!("cluster {} belongs to more than one stratum", self.ids[pos]),
                ));
            }
            strata.push(unique.binary_search(&first).unwrap_or(0));
        }
        Ok(strata)
    }
}
