//! Immutable family snapshots and the `enc_bindings` encoding.
//!
//! For a family with `N` timelines, `enc_bindings` holds three regions:
//!
//! 1. `[0, N)`: for timeline `i`, the exclusive end offset into `comcat_ids`
//!    of its currently bound ids. Timeline `i` starts where `i - 1` ended.
//! 2. `[N, 2N)`: for timeline `i`, the exclusive end offset into
//!    `enc_bindings` itself of its removed-id list. The last entry equals
//!    `enc_bindings.len()`.
//! 3. `[2N, len)`: per timeline, indices into `comcat_ids` of ids once bound
//!    to it and later unbound.
//!
//! `comcat_ids` past the end of the last timeline's current ids holds the
//! ids bound to no timeline at all.

use std::collections::{BTreeSet, HashMap, HashSet};

use aafs_store::DocId;
use serde::{Deserialize, Serialize};

use super::assignment::{AliasAssignment, AliasAssignmentList};
use crate::error::{require_non_empty, require_positive, CoreError, ValidationError};

/// A snapshot of one family of Comcat ids at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasFamily {
    #[serde(rename = "_id")]
    pub id: DocId,
    pub family_time: i64,
    pub timeline_ids: Vec<String>,
    pub comcat_ids: Vec<String>,
    pub enc_bindings: Vec<u32>,
}

impl AliasFamily {
    /// Encode an assignment list into a new snapshot.
    ///
    /// Rejects an empty list, empty or repeated timeline ids, empty or
    /// repeated Comcat ids, and ids listed as both current and removed for
    /// one timeline.
    pub fn from_assignments(
        family_time: i64,
        list: &AliasAssignmentList,
    ) -> Result<Self, ValidationError> {
        require_positive("family_time", family_time)?;
        if list.is_empty() {
            return Err(ValidationError::Empty {
                field: "assignments",
            });
        }
        let n = list.len();

        let mut timeline_ids = Vec::with_capacity(n);
        let mut seen_timelines: HashSet<&str> = HashSet::with_capacity(n);
        let mut comcat_ids: Vec<String> = Vec::new();
        let mut current_ends = Vec::with_capacity(n);
        let mut removed: Vec<&str> = Vec::new();
        let mut removed_ends = Vec::with_capacity(n);

        for assignment in list {
            require_non_empty("timeline_id", &assignment.timeline_id)?;
            if !seen_timelines.insert(&assignment.timeline_id) {
                return Err(ValidationError::DuplicateTimelineId(
                    assignment.timeline_id.clone(),
                ));
            }
            timeline_ids.push(assignment.timeline_id.clone());

            for comcat_id in &assignment.comcat_ids {
                require_non_empty("comcat_id", comcat_id)?;
                comcat_ids.push(comcat_id.clone());
            }
            current_ends.push(comcat_ids.len());

            for comcat_id in &assignment.removed_ids {
                require_non_empty("comcat_id", comcat_id)?;
                if assignment.is_bound(comcat_id) {
                    return Err(ValidationError::CurrentAndRemoved {
                        timeline_id: assignment.timeline_id.clone(),
                        comcat_id: comcat_id.clone(),
                    });
                }
                removed.push(comcat_id);
            }
            removed_ends.push(removed.len());
        }

        // Ids removed from some timeline and bound to none trail the list.
        let bound: HashSet<&str> = comcat_ids.iter().map(String::as_str).collect();
        let mut orphans: Vec<&str> = Vec::new();
        for comcat_id in &removed {
            if !bound.contains(comcat_id) && !orphans.contains(comcat_id) {
                orphans.push(comcat_id);
            }
        }
        let orphans: Vec<String> = orphans.into_iter().map(str::to_string).collect();
        comcat_ids.extend(orphans);

        if comcat_ids.is_empty() {
            return Err(ValidationError::Empty {
                field: "comcat_ids",
            });
        }

        let mut index: HashMap<&str, u32> = HashMap::with_capacity(comcat_ids.len());
        for (i, comcat_id) in comcat_ids.iter().enumerate() {
            if index.insert(comcat_id, i as u32).is_some() {
                return Err(ValidationError::DuplicateComcatId(comcat_id.clone()));
            }
        }

        let mut enc_bindings = Vec::with_capacity(2 * n + removed.len());
        enc_bindings.extend(current_ends.iter().map(|&end| end as u32));
        enc_bindings.extend(removed_ends.iter().map(|&end| (2 * n + end) as u32));
        // Every removed id is either bound somewhere or an orphan, so the
        // lookup always succeeds.
        enc_bindings.extend(removed.iter().filter_map(|c| index.get(c).copied()));

        Ok(AliasFamily {
            id: DocId::new(),
            family_time,
            timeline_ids,
            comcat_ids,
            enc_bindings,
        })
    }

    /// Decode the snapshot back into its assignment list.
    pub fn assignments(&self) -> Result<AliasAssignmentList, CoreError> {
        let corrupt = |reason: String| CoreError::CorruptRecord {
            kind: super::KIND,
            id: self.id.to_hex(),
            reason,
        };

        let n = self.timeline_ids.len();
        let enc = &self.enc_bindings;
        if n == 0 {
            return Err(corrupt("no timeline ids".to_string()));
        }
        if enc.len() < 2 * n {
            return Err(corrupt(format!(
                "enc_bindings has {} entries, need at least {}",
                enc.len(),
                2 * n
            )));
        }
        if enc[2 * n - 1] as usize != enc.len() {
            return Err(corrupt(format!(
                "removed region ends at {}, enc_bindings has {} entries",
                enc[2 * n - 1],
                enc.len()
            )));
        }

        let mut list = AliasAssignmentList::default();
        let mut current_start = 0usize;
        let mut removed_start = 2 * n;
        for (i, timeline_id) in self.timeline_ids.iter().enumerate() {
            let current_end = enc[i] as usize;
            if current_end < current_start || current_end > self.comcat_ids.len() {
                return Err(corrupt(format!(
                    "timeline {timeline_id}: current-id end {current_end} out of order"
                )));
            }
            let removed_end = enc[n + i] as usize;
            if removed_end < removed_start || removed_end > enc.len() {
                return Err(corrupt(format!(
                    "timeline {timeline_id}: removed-id end {removed_end} out of order"
                )));
            }

            let removed_ids = enc[removed_start..removed_end]
                .iter()
                .map(|&ix| {
                    self.comcat_ids.get(ix as usize).cloned().ok_or_else(|| {
                        corrupt(format!("timeline {timeline_id}: removed index {ix} out of range"))
                    })
                })
                .collect::<Result<BTreeSet<_>, _>>()?;

            list.push(AliasAssignment {
                timeline_id: timeline_id.clone(),
                comcat_ids: self.comcat_ids[current_start..current_end].to_vec(),
                removed_ids,
            });
            current_start = current_end;
            removed_start = removed_end;
        }
        Ok(list)
    }

    pub fn contains_comcat_id(&self, comcat_id: &str) -> bool {
        self.comcat_ids.iter().any(|c| c == comcat_id)
    }

    pub fn contains_timeline_id(&self, timeline_id: &str) -> bool {
        self.timeline_ids.iter().any(|t| t == timeline_id)
    }

    /// Ids currently bound to some timeline, in timeline order.
    pub fn bound_comcat_ids(&self) -> &[String] {
        let n = self.timeline_ids.len();
        let end = match self.enc_bindings.get(n.wrapping_sub(1)) {
            Some(&end) => (end as usize).min(self.comcat_ids.len()),
            None => 0,
        };
        &self.comcat_ids[..end]
    }

    /// Ids bound to no timeline.
    pub fn unbound_comcat_ids(&self) -> &[String] {
        &self.comcat_ids[self.bound_comcat_ids().len()..]
    }

    /// `self` is a later snapshot of the same family as `other`.
    pub fn supersedes(&self, other: &AliasFamily) -> bool {
        self.family_time > other.family_time
            && other.comcat_ids.iter().any(|c| self.contains_comcat_id(c))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn list(assignments: Vec<AliasAssignment>) -> AliasAssignmentList {
        AliasAssignmentList::new(assignments)
    }

    #[test]
    fn encodes_offsets_and_orphans() {
        let l = list(vec![
            AliasAssignment::new("t1", ids(&["a", "b"])).with_removed(["x"]),
            AliasAssignment::new("t2", ids(&["c"])).with_removed(["a", "y"]),
        ]);
        let fam = AliasFamily::from_assignments(100, &l).unwrap();

        assert_eq!(fam.timeline_ids, ids(&["t1", "t2"]));
        // Bound ids in timeline order, then orphans x and y.
        assert_eq!(fam.comcat_ids, ids(&["a", "b", "c", "x", "y"]));
        // Region 1: [2, 3]; region 2: [4 + 1, 4 + 3]; region 3: x | a, y.
        assert_eq!(fam.enc_bindings, vec![2, 3, 5, 7, 3, 0, 4]);
        assert_eq!(fam.bound_comcat_ids(), &ids(&["a", "b", "c"])[..]);
        assert_eq!(fam.unbound_comcat_ids(), &ids(&["x", "y"])[..]);
    }

    #[test]
    fn round_trip_preserves_current_order_and_removed_sets() {
        let l = list(vec![
            AliasAssignment::new("t1", ids(&["b", "a"])).with_removed(["z", "x"]),
            AliasAssignment::new("t2", vec![]).with_removed(["c"]),
            AliasAssignment::new("t3", ids(&["c"])),
        ]);
        let fam = AliasFamily::from_assignments(7, &l).unwrap();
        assert_eq!(fam.assignments().unwrap(), l);
    }

    #[test]
    fn rejects_same_comcat_id_in_two_timelines() {
        let l = list(vec![
            AliasAssignment::new("t1", ids(&["a", "b"])),
            AliasAssignment::new("t2", ids(&["b"])),
        ]);
        assert_eq!(
            AliasFamily::from_assignments(1, &l).unwrap_err(),
            ValidationError::DuplicateComcatId("b".to_string())
        );
    }

    #[test]
    fn rejects_repeated_timeline_and_empty_inputs() {
        let l = list(vec![
            AliasAssignment::new("t1", ids(&["a"])),
            AliasAssignment::new("t1", ids(&["b"])),
        ]);
        assert_eq!(
            AliasFamily::from_assignments(1, &l).unwrap_err(),
            ValidationError::DuplicateTimelineId("t1".to_string())
        );
        assert!(matches!(
            AliasFamily::from_assignments(1, &list(vec![])).unwrap_err(),
            ValidationError::Empty { field: "assignments" }
        ));
        assert!(matches!(
            AliasFamily::from_assignments(1, &list(vec![AliasAssignment::new("t1", vec![])]))
                .unwrap_err(),
            ValidationError::Empty { field: "comcat_ids" }
        ));
        assert!(matches!(
            AliasFamily::from_assignments(1, &list(vec![AliasAssignment::new("", ids(&["a"]))]))
                .unwrap_err(),
            ValidationError::Empty { field: "timeline_id" }
        ));
    }

    #[test]
    fn rejects_id_both_current_and_removed() {
        let l = list(vec![AliasAssignment::new("t1", ids(&["a"])).with_removed(["a"])]);
        assert!(matches!(
            AliasFamily::from_assignments(1, &l).unwrap_err(),
            ValidationError::CurrentAndRemoved { .. }
        ));
    }

    #[test]
    fn decode_reports_corrupt_encoding() {
        let l = list(vec![AliasAssignment::new("t1", ids(&["a"])).with_removed(["b"])]);
        let mut fam = AliasFamily::from_assignments(1, &l).unwrap();
        fam.enc_bindings[2] = 9;
        assert!(matches!(
            fam.assignments().unwrap_err(),
            CoreError::CorruptRecord { .. }
        ));
        fam.enc_bindings.pop();
        assert!(fam.assignments().is_err());
    }

    #[test]
    fn supersession_requires_later_time_and_shared_id() {
        let s1 = AliasFamily::from_assignments(
            100,
            &list(vec![AliasAssignment::new("t1", ids(&["a", "b"]))]),
        )
        .unwrap();
        let s2 = AliasFamily::from_assignments(
            200,
            &list(vec![AliasAssignment::new("t1", ids(&["a", "b", "c"]))]),
        )
        .unwrap();
        let other = AliasFamily::from_assignments(
            300,
            &list(vec![AliasAssignment::new("t9", ids(&["q"]))]),
        )
        .unwrap();
        assert!(s2.supersedes(&s1));
        assert!(!s1.supersedes(&s2));
        assert!(!other.supersedes(&s1));
    }
}
