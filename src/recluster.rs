//! Wholesale agglomerative reconstruction of the cluster index.

use tracing::info;

use crate::similarity::jaro_winkler;
use crate::store::{ClusterIndex, ClusterRecord};

/// Counters needed to evaluate the reclustering preconditions. Threaded
/// explicitly through the pipeline rather than kept as process-global
/// state.
#[derive(Debug, Clone, Default)]
pub struct ReclusterCounters {
    pub population_at_last_recluster: usize,
    pub records_added_since_start: usize,
}

const INTRA_SIMILARITY_THRESHOLD: f64 = 0.90;
const SINGLETON_FRACTION_THRESHOLD: f64 = 0.77;
const GROWTH_FRACTION_THRESHOLD: f64 = 0.10;
const RECORDS_ADDED_THRESHOLD: usize = 250;

/// Mean pairwise combined similarity inside a cluster; `None` for clusters
/// of size <= 1 (they are excluded from the average-intra-similarity
/// computation).
fn intra_similarity(records: &[ClusterRecord]) -> Option<f64> {
    if records.len() <= 1 {
        return None;
    }
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in 0..records.len() {
        for j in (i + 1)..records.len() {
            sum += combined_similarity(&records[i], &records[j]);
            count += 1;
        }
    }
    Some(sum / count as f64)
}

fn combined_similarity(a: &ClusterRecord, b: &ClusterRecord) -> f64 {
    (jaro_winkler(&a.conflict, &b.conflict) + jaro_winkler(&a.resolution, &b.resolution)) / 2.0
}

/// Average intra-similarity over all clusters of size > 1. Defined as 0.0
/// when there are no such clusters (treated as "no quality signal yet",
/// never blocking the first precondition).
pub fn average_intra_similarity(index: &ClusterIndex) -> f64 {
    let scores: Vec<f64> = index
        .clusters
        .values()
        .filter_map(|m| intra_similarity(m))
        .collect();
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

fn singleton_fraction(index: &ClusterIndex) -> f64 {
    if index.clusters.is_empty() {
        return 0.0;
    }
    let singletons = index.clusters.values().filter(|m| m.len() == 1).count();
    singletons as f64 / index.clusters.len() as f64
}

/// Decide whether the three preconditions for a recluster attempt hold.
pub fn should_recluster(index: &ClusterIndex, counters: &ReclusterCounters) -> bool {
    let avg_intra = average_intra_similarity(index);
    if avg_intra > INTRA_SIMILARITY_THRESHOLD {
        return false;
    }

    if singleton_fraction(index) >= SINGLETON_FRACTION_THRESHOLD {
        return false;
    }

    let grown_enough = if counters.population_at_last_recluster == 0 {
        true
    } else {
        let growth = index.total_records() as f64 / counters.population_at_last_recluster as f64 - 1.0;
        growth >= GROWTH_FRACTION_THRESHOLD
    };
    let added_enough = counters.records_added_since_start >= RECORDS_ADDED_THRESHOLD;

    grown_enough || added_enough
}

/// Result of a reclustering attempt.
#[derive(serde::Serialize)]
pub struct ReclusterOutcome {
    pub index: ClusterIndex,
    pub old_avg_intra: f64,
    pub new_avg_intra: f64,
    pub accepted: bool,
}

/// Run the agglomerative recluster procedure: flatten to singleton
/// clusters, then greedily merge the highest-similarity pair while it
/// exceeds `threshold`, recomputing affected rows/columns each step.
/// Accepted only if the resulting average intra-similarity strictly
/// exceeds the input's.
pub fn recluster(index: &ClusterIndex, threshold: f64) -> ReclusterOutcome {
    let old_avg_intra = average_intra_similarity(index);

    let mut clusters: Vec<Option<Vec<ClusterRecord>>> = index
        .flatten()
        .into_iter()
        .map(|(_, record)| Some(vec![record.clone()]))
        .collect();

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..clusters.len() {
            let Some(ci) = &clusters[i] else { continue };
            for j in (i + 1)..clusters.len() {
                let Some(cj) = &clusters[j] else { continue };
                let sim = cluster_cluster_similarity(ci, cj);
                if best.map(|(_, _, b)| sim > b).unwrap_or(true) {
                    best = Some((i, j, sim));
                }
            }
        }

        match best {
            Some((i, j, sim)) if sim > threshold => {
                let merged = clusters[j].take().unwrap();
                clusters[i].as_mut().unwrap().extend(merged);
            }
            _ => break,
        }
    }

    let mut new_index = ClusterIndex::default();
    let mut next_id = 1u32;
    for cluster in clusters.into_iter().flatten() {
        new_index.clusters.insert(next_id, cluster);
        next_id += 1;
    }

    let new_avg_intra = average_intra_similarity(&new_index);
    let accepted = new_avg_intra > old_avg_intra;

    info!(
        old_avg_intra,
        new_avg_intra, accepted, "reclustering attempt complete"
    );

    ReclusterOutcome {
        index: new_index,
        old_avg_intra,
        new_avg_intra,
        accepted,
    }
}

/// Mean of all inter-cluster pairwise combined JW scores between two
/// clusters.
fn cluster_cluster_similarity(a: &[ClusterRecord], b: &[ClusterRecord]) -> f64 {
    let mut sum = 0.0;
    let mut count = 0usize;
    for x in a {
        for y in b {
            sum += combined_similarity(x, y);
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index_with(pairs: &[(u32, &str, &str)]) -> ClusterIndex {
        let mut index = ClusterIndex::default();
        for (id, c, r) in pairs {
            index.insert(*id, ClusterRecord::new(*c, *r));
        }
        index
    }

    #[test]
    fn precondition_blocks_on_high_intra_similarity() {
        let index = index_with(&[(1, "abcdef", "abcxyz"), (1, "abcdeg", "abcxyz")]);
        let counters = ReclusterCounters {
            population_at_last_recluster: 1,
            records_added_since_start: 300,
        };
        assert!(!should_recluster(&index, &counters));
    }

    #[test]
    fn precondition_blocks_on_high_singleton_fraction() {
        let mut index = ClusterIndex::default();
        for i in 0..9u32 {
            index.insert(i + 1, ClusterRecord::new(format!("c{i}"), format!("r{i}")));
        }
        let counters = ReclusterCounters {
            population_at_last_recluster: 1,
            records_added_since_start: 300,
        };
        // 9 singletons / 9 clusters = 1.0 >= 0.77, blocked
        assert!(!should_recluster(&index, &counters));
    }

    #[test]
    fn boundary_exactly_250_fires() {
        let index = index_with(&[(1, "abcdef", "qqqqqq"), (1, "zzzzzz", "wwwwww")]);
        let counters = ReclusterCounters {
            population_at_last_recluster: 2,
            records_added_since_start: 250,
        };
        assert!(should_recluster(&index, &counters));
    }

    #[test]
    fn boundary_249_does_not_fire_on_count_alone() {
        let index = index_with(&[(1, "abcdef", "qqqqqq"), (1, "zzzzzz", "wwwwww")]);
        let counters = ReclusterCounters {
            population_at_last_recluster: 2,
            records_added_since_start: 249,
        };
        assert!(!should_recluster(&index, &counters));
    }

    #[test]
    fn scenario_s6_merges_similar_clusters_and_accepts() {
        let index = index_with(&[
            (1, "abcdef", "abcxyz"),
            (2, "abcdeg", "abcxyy"),
        ]);
        let outcome = recluster(&index, 0.80);
        assert_eq!(outcome.index.clusters.len(), 1);
        assert!(outcome.accepted);
        assert!(outcome.new_avg_intra > outcome.old_avg_intra);
    }

    #[test]
    fn dissimilar_clusters_are_not_merged() {
        let index = index_with(&[(1, "abcdef", "abcxyz"), (2, "qrstuv", "mnopqr")]);
        let outcome = recluster(&index, 0.80);
        assert_eq!(outcome.index.clusters.len(), 2);
    }

    #[test]
    fn fresh_ids_are_contiguous_from_one() {
        let index = index_with(&[(5, "a", "b"), (9, "c", "d")]);
        let outcome = recluster(&index, 0.999);
        let ids: Vec<u32> = outcome.index.clusters.keys().copied().collect();
        assert_eq!(ids, vec![1, 2]);
    }
}
