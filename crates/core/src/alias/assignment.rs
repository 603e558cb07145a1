use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The Comcat ids bound to one timeline at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasAssignment {
    pub timeline_id: String,
    /// Currently bound ids, primary id first. May be empty once every id has
    /// moved elsewhere.
    pub comcat_ids: Vec<String>,
    /// Ids once bound to this timeline and later unbound.
    pub removed_ids: BTreeSet<String>,
}

impl AliasAssignment {
    pub fn new(timeline_id: impl Into<String>, comcat_ids: Vec<String>) -> Self {
        AliasAssignment {
            timeline_id: timeline_id.into(),
            comcat_ids,
            removed_ids: BTreeSet::new(),
        }
    }

    pub fn with_removed<I, T>(mut self, removed: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.removed_ids.extend(removed.into_iter().map(Into::into));
        self
    }

    /// The primary Comcat id, if any id is currently bound.
    pub fn primary_id(&self) -> Option<&str> {
        self.comcat_ids.first().map(String::as_str)
    }

    pub fn is_bound(&self, comcat_id: &str) -> bool {
        self.comcat_ids.iter().any(|c| c == comcat_id)
    }

    /// Number of `ids` currently bound to this timeline.
    pub fn overlap(&self, ids: &[String]) -> usize {
        self.comcat_ids.iter().filter(|c| ids.contains(c)).count()
    }

    /// Unbind every id in `ids`, recording each as removed.
    pub(crate) fn unbind(&mut self, ids: &[String]) {
        let removed = &mut self.removed_ids;
        self.comcat_ids.retain(|c| {
            if ids.contains(c) {
                removed.insert(c.clone());
                false
            } else {
                true
            }
        });
    }

    /// Bind exactly `ids` (primary first). Previously bound ids not in `ids`
    /// become removed; ids coming back leave the removed set.
    pub(crate) fn rebind(&mut self, ids: &[String]) {
        for old in &self.comcat_ids {
            if !ids.contains(old) {
                self.removed_ids.insert(old.clone());
            }
        }
        for id in ids {
            self.removed_ids.remove(id);
        }
        self.comcat_ids = ids.to_vec();
    }
}

/// The full set of timeline bindings of one family.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AliasAssignmentList {
    pub assignments: Vec<AliasAssignment>,
}

impl AliasAssignmentList {
    pub fn new(assignments: Vec<AliasAssignment>) -> Self {
        AliasAssignmentList { assignments }
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AliasAssignment> {
        self.assignments.iter()
    }

    pub fn push(&mut self, assignment: AliasAssignment) {
        self.assignments.push(assignment);
    }

    pub fn find_timeline(&self, timeline_id: &str) -> Option<&AliasAssignment> {
        self.assignments.iter().find(|a| a.timeline_id == timeline_id)
    }

    /// The timeline that currently binds `comcat_id`.
    pub fn find_binding(&self, comcat_id: &str) -> Option<&AliasAssignment> {
        self.assignments.iter().find(|a| a.is_bound(comcat_id))
    }

    pub fn contains_timeline(&self, timeline_id: &str) -> bool {
        self.find_timeline(timeline_id).is_some()
    }
}

impl<'a> IntoIterator for &'a AliasAssignmentList {
    type Item = &'a AliasAssignment;
    type IntoIter = std::slice::Iter<'a, AliasAssignment>;

    fn into_iter(self) -> Self::IntoIter {
        self.assignments.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn unbind_records_removed_ids() {
        let mut a = AliasAssignment::new("ccid_a", ids(&["a", "b", "c"]));
        a.unbind(&ids(&["b", "z"]));
        assert_eq!(a.comcat_ids, ids(&["a", "c"]));
        assert!(a.removed_ids.contains("b"));
        assert!(!a.removed_ids.contains("z"));
    }

    #[test]
    fn rebind_moves_dropped_ids_to_removed_and_restores_returning_ones() {
        let mut a = AliasAssignment::new("ccid_a", ids(&["a", "b"])).with_removed(["c"]);
        a.rebind(&ids(&["c", "a"]));
        assert_eq!(a.comcat_ids, ids(&["c", "a"]));
        assert_eq!(a.removed_ids, BTreeSet::from(["b".to_string()]));
        assert_eq!(a.primary_id(), Some("c"));
    }
}
