//! Chooses a cluster id for a new (conflict, resolution) pair.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::similarity::jaro_winkler;
use crate::store::{ClusterIndex, ClusterRecord};

/// Linkage rule used to aggregate member similarities into a single
/// cluster-level score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    /// Mean over members. The default pipeline variant.
    Average,
    /// Worst member (max distance / min similarity), computed correctly.
    Complete,
    /// Best member (min distance / max similarity). The source's variant
    /// initializes its running minimum to 0.0 and updates on `>=`, which
    /// makes it track the maximum member similarity rather than the true
    /// minimum. That behavior is preserved here deliberately; see the
    /// `single_linkage_tracks_maximum_not_minimum` test.
    Single,
}

/// Outcome of an assignment attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Place the record in this cluster id (existing or brand new).
    GroupId(u32),
    /// The record exactly duplicates an existing member of this cluster;
    /// suppress the write but keep the group id for regex regeneration.
    Duplicate(u32),
}

impl Assignment {
    /// The group id touched by this assignment, whether or not it was
    /// ultimately written.
    pub fn group_id(&self) -> u32 {
        match self {
            Assignment::GroupId(id) | Assignment::Duplicate(id) => *id,
        }
    }
}

/// Aggregate one member's similarity into a running cluster-level score
/// under the given linkage rule.
fn aggregate(linkage: Linkage, running: f64, seen: usize, sample: f64) -> f64 {
    match linkage {
        Linkage::Average => (running * seen as f64 + sample) / (seen as f64 + 1.0),
        Linkage::Complete => {
            if seen == 0 {
                sample
            } else {
                running.min(sample)
            }
        }
        // Deliberately reproduces the documented source bug: minimum
        // initialized to 0.0, updated with `>=` rather than `<`.
        Linkage::Single => {
            if sample >= running {
                sample
            } else {
                running
            }
        }
    }
}

fn linkage_seed(linkage: Linkage) -> f64 {
    match linkage {
        Linkage::Average => 0.0,
        Linkage::Complete => 1.0,
        Linkage::Single => 0.0,
    }
}

/// Default average-linkage assignment per the documented algorithm:
/// exact duplicate short-circuits, otherwise the cluster with the largest
/// qualifying `avg_c` wins, ties broken by ascending (first-encountered) id.
pub fn assign(index: &ClusterIndex, record: &ClusterRecord, linkage: Linkage, threshold: f64) -> Assignment {
    if record.conflict.trim().is_empty() && record.resolution.trim().is_empty() {
        return assign_empty_sentinel(index);
    }
    if record.conflict.trim().is_empty() && !record.resolution.trim().is_empty() {
        return assign_empty_conflict(index, record, linkage, threshold);
    }

    if index.is_empty() {
        return Assignment::GroupId(1);
    }

    let mut best: Option<(u32, f64)> = None;

    for (&id, members) in &index.clusters {
        if members.iter().any(|m| m == record) {
            debug!(group_id = id, "exact duplicate, suppressing insert");
            return Assignment::Duplicate(id);
        }

        let mut avg_c = linkage_seed(linkage);
        let mut avg_r = linkage_seed(linkage);
        for (seen, member) in members.iter().enumerate() {
            let sim_c = jaro_winkler(&record.conflict, &member.conflict);
            let sim_r = jaro_winkler(&record.resolution, &member.resolution);
            avg_c = aggregate(linkage, avg_c, seen, sim_c);
            avg_r = aggregate(linkage, avg_r, seen, sim_r);
        }

        if avg_c >= threshold && avg_r >= threshold {
            match best {
                Some((_, best_score)) if best_score >= avg_c => {}
                _ => best = Some((id, avg_c)),
            }
        }
    }

    match best {
        Some((id, _)) => Assignment::GroupId(id),
        None => Assignment::GroupId(index.next_id()),
    }
}

/// Both conflict and resolution empty: place with any cluster whose members
/// are all the exact empty/empty sentinel, else a fresh cluster.
fn assign_empty_sentinel(index: &ClusterIndex) -> Assignment {
    for (&id, members) in &index.clusters {
        if !members.is_empty() && members.iter().all(ClusterRecord::is_empty_pair) {
            return Assignment::Duplicate(id);
        }
    }
    Assignment::GroupId(index.next_id())
}

/// Conflict empty, resolution non-empty: score against the resolution side
/// only.
fn assign_empty_conflict(
    index: &ClusterIndex,
    record: &ClusterRecord,
    linkage: Linkage,
    threshold: f64,
) -> Assignment {
    if index.is_empty() {
        return Assignment::GroupId(1);
    }

    let mut best: Option<(u32, f64)> = None;

    for (&id, members) in &index.clusters {
        if members.iter().any(|m| m == record) {
            return Assignment::Duplicate(id);
        }

        let mut avg_r = linkage_seed(linkage);
        for (seen, member) in members.iter().enumerate() {
            let sim_r = jaro_winkler(&record.resolution, &member.resolution);
            avg_r = aggregate(linkage, avg_r, seen, sim_r);
        }

        if avg_r >= threshold {
            match best {
                Some((_, best_score)) if best_score >= avg_r => {}
                _ => best = Some((id, avg_r)),
            }
        }
    }

    match best {
        Some((id, _)) => Assignment::GroupId(id),
        None => Assignment::GroupId(index.next_id()),
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
    fn empty_index_returns_id_one() {
        let index = ClusterIndex::default();
        let record = ClusterRecord::new("a.b.c", "a.b.x");
        assert_eq!(
            assign(&index, &record, Linkage::Average, 0.80),
            Assignment::GroupId(1)
        );
    }

    #[test]
    fn scenario_s2_joins_existing_cluster() {
        let index = index_with(&[(1, "abcdef", "abcxyz")]);
        let record = ClusterRecord::new("abcdeg", "abcxyz");
        assert_eq!(
            assign(&index, &record, Linkage::Average, 0.80),
            Assignment::GroupId(1)
        );
    }

    #[test]
    fn scenario_s3_creates_new_cluster() {
        let index = index_with(&[(1, "abcdef", "abcxyz")]);
        let record = ClusterRecord::new("uvwxyz", "qrstuv");
        assert_eq!(
            assign(&index, &record, Linkage::Average, 0.80),
            Assignment::GroupId(2)
        );
    }

    #[test]
    fn scenario_s4_exact_duplicate_suppressed() {
        let index = index_with(&[(1, "abcdef", "abcxyz")]);
        let record = ClusterRecord::new("abcdef", "abcxyz");
        assert_eq!(assign(&index, &record, Linkage::Average, 0.80), Assignment::Duplicate(1));
    }

    #[test]
    fn ties_broken_by_first_encountered_id() {
        // Two clusters with byte-identical members relative to the new
        // record produce an exact tie; the lower (first-encountered) id
        // must win.
        let index = index_with(&[(1, "abcdef", "abcxyz"), (2, "abcdef", "abcxyz")]);
        let record = ClusterRecord::new("abcdeg", "abcxyx");
        assert_eq!(
            assign(&index, &record, Linkage::Average, 0.80),
            Assignment::GroupId(1)
        );
    }

    #[test]
    fn both_empty_assigns_to_sentinel_cluster() {
        let index = index_with(&[(1, "", "")]);
        let record = ClusterRecord::new("", "");
        assert_eq!(assign(&index, &record, Linkage::Average, 0.80), Assignment::Duplicate(1));
    }

    #[test]
    fn both_empty_fresh_index_creates_sentinel() {
        let index = ClusterIndex::default();
        let record = ClusterRecord::new("", "");
        assert_eq!(
            assign(&index, &record, Linkage::Average, 0.80),
            Assignment::GroupId(1)
        );
    }

    #[test]
    fn empty_conflict_scores_resolution_only() {
        let index = index_with(&[(1, "xyz", "abcxyz")]);
        let record = ClusterRecord::new("", "abcxyy");
        assert_eq!(
            assign(&index, &record, Linkage::Average, 0.80),
            Assignment::GroupId(1)
        );
    }

    #[test]
    fn single_linkage_tracks_maximum_not_minimum() {
        // members: one very close, one very far. True single (min)
        // linkage would be dragged down by the far member; the documented
        // source bug instead reports the maximum similarity.
        let index = index_with(&[(1, "abcdef", "abcxyz"), (1, "zzzzzz", "zzzzzz")]);
        let record = ClusterRecord::new("abcdeg", "abcxyz");
        let assignment = assign(&index, &record, Linkage::Single, 0.80);
        // Because Single tracks the max, the close member alone is enough
        // to clear the threshold even though the cluster also contains a
        // wildly dissimilar member.
        assert_eq!(assignment, Assignment::GroupId(1));
    }

    #[test]
    fn complete_linkage_uses_worst_member() {
        let index = index_with(&[(1, "abcdef", "abcxyz"), (1, "zzzzzz", "zzzzzz")]);
        let record = ClusterRecord::new("abcdeg", "abcxyz");
        // worst-member (complete) linkage is dragged down by the far
        // member and should fail to qualify, landing in a new cluster.
        let assignment = assign(&index, &record, Linkage::Complete, 0.80);
        assert_eq!(assignment, Assignment::GroupId(2));
    }
}
