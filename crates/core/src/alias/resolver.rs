use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use aafs_store::{DocId, DocumentStore, Filter, IndexSpec, Sort};

use super::assignment::{AliasAssignment, AliasAssignmentList};
use super::family::AliasFamily;
use super::{KIND, TIMELINE_ID_PREFIX};
use crate::error::{next_time, require_non_empty, require_positive, CoreError, ValidationError};
use crate::record::{from_document, to_document};

const FAMILY_TIME: &str = "family_time";
const TIMELINE_IDS: &str = "timeline_ids";
const COMCAT_IDS: &str = "comcat_ids";

/// The ids Comcat currently reports for one event, primary id first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComcatObservation {
    ids: Vec<String>,
}

impl ComcatObservation {
    pub fn new<I, T>(primary_id: impl Into<String>, secondary_ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut ids = vec![primary_id.into()];
        for id in secondary_ids {
            let id = id.into();
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ComcatObservation { ids }
    }

    pub fn from_ids(ids: Vec<String>) -> Self {
        ComcatObservation { ids }
    }

    pub fn primary_id(&self) -> Option<&str> {
        self.ids.first().map(String::as_str)
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }
}

/// Where a Comcat id currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasLookup {
    pub comcat_id: String,
    pub family_id: DocId,
    pub family_time: i64,
    /// The timeline binding the id, or `None` if the id is bound to no
    /// timeline any more.
    pub timeline_id: Option<String>,
    /// That timeline's primary id.
    pub primary_id: Option<String>,
    /// Every id currently bound to that timeline.
    pub timeline_comcat_ids: Vec<String>,
}

/// Result of [`AliasResolver::reconcile`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The observations matched the active snapshot; nothing was written.
    Unchanged(AliasFamily),
    /// A new snapshot was written, superseding `superseded` prior snapshots
    /// (more than one when families merged).
    Written {
        family: AliasFamily,
        superseded: usize,
    },
}

impl ReconcileOutcome {
    pub fn family(&self) -> &AliasFamily {
        match self {
            ReconcileOutcome::Unchanged(family) => family,
            ReconcileOutcome::Written { family, .. } => family,
        }
    }

    pub fn was_written(&self) -> bool {
        matches!(self, ReconcileOutcome::Written { .. })
    }
}

fn membership_filter(timeline_id: Option<&str>, comcat_ids: &[&str]) -> Filter {
    let mut clauses = Vec::new();
    if let Some(timeline_id) = timeline_id {
        clauses.push(Filter::contains(TIMELINE_IDS, timeline_id));
    }
    clauses.extend(comcat_ids.iter().map(|c| Filter::contains(COMCAT_IDS, *c)));
    if clauses.is_empty() {
        Filter::All
    } else {
        Filter::Or(clauses)
    }
}

fn time_filter(time_lo: Option<i64>, time_hi: Option<i64>) -> Filter {
    let mut filter = Filter::All;
    if let Some(lo) = time_lo {
        filter = filter.and(Filter::gte(FAMILY_TIME, lo));
    }
    if let Some(hi) = time_hi {
        filter = filter.and(Filter::lte(FAMILY_TIME, hi));
    }
    filter
}

/// Reads and appends family snapshots in one store collection.
///
/// Snapshots are only ever inserted, so writes never conflict in the store.
/// The read-decide-insert sequence of [`AliasResolver::reconcile`] is not
/// atomic, though: two writers reconciling the same family concurrently can
/// fork its lineage. Callers must serialize reconciliation per family.
pub struct AliasResolver<S> {
    store: Arc<S>,
    collection: String,
}

impl<S> Clone for AliasResolver<S> {
    fn clone(&self) -> Self {
        AliasResolver {
            store: Arc::clone(&self.store),
            collection: self.collection.clone(),
        }
    }
}

impl<S: DocumentStore> AliasResolver<S> {
    pub fn new(store: Arc<S>, collection: impl Into<String>) -> Self {
        AliasResolver {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn ensure_indexes(&self) -> Result<(), CoreError> {
        for field in [FAMILY_TIME, TIMELINE_IDS, COMCAT_IDS] {
            self.store
                .create_index(&self.collection, IndexSpec::new(field))
                .await?;
        }
        Ok(())
    }

    /// Encode `assignments` and append the snapshot. Nothing is written if
    /// the list is malformed.
    pub async fn submit_family(
        &self,
        family_time: i64,
        assignments: &AliasAssignmentList,
    ) -> Result<AliasFamily, CoreError> {
        let family = AliasFamily::from_assignments(family_time, assignments)?;
        self.store
            .insert(&self.collection, to_document(&family)?)
            .await?;
        tracing::info!(
            family_id = %family.id,
            family_time,
            timelines = family.timeline_ids.len(),
            comcat_ids = family.comcat_ids.len(),
            "wrote alias family"
        );
        Ok(family)
    }

    pub async fn fetch_by_id(&self, id: DocId) -> Result<Option<AliasFamily>, CoreError> {
        self.store
            .find_one(&self.collection, &Filter::id(id), &Sort::Natural)
            .await?
            .map(|doc| from_document(KIND, doc))
            .transpose()
    }

    /// The active snapshot containing `comcat_id`, considering only
    /// snapshots with `family_time <= time_hi` when a bound is given.
    pub async fn get_active_for_comcat_id(
        &self,
        comcat_id: &str,
        time_hi: Option<i64>,
    ) -> Result<Option<AliasFamily>, CoreError> {
        self.most_recent(membership_filter(None, &[comcat_id]), time_hi)
            .await
    }

    /// The active snapshot containing `timeline_id`.
    pub async fn get_active_for_timeline_id(
        &self,
        timeline_id: &str,
        time_hi: Option<i64>,
    ) -> Result<Option<AliasFamily>, CoreError> {
        self.most_recent(membership_filter(Some(timeline_id), &[]), time_hi)
            .await
    }

    /// Snapshots with `family_time` in the inclusive bounds that contain the
    /// timeline id or any of the Comcat ids (all snapshots when no id is
    /// given), newest first.
    pub async fn get_range(
        &self,
        time_lo: Option<i64>,
        time_hi: Option<i64>,
        timeline_id: Option<&str>,
        comcat_ids: &[&str],
    ) -> Result<Vec<AliasFamily>, CoreError> {
        let filter = membership_filter(timeline_id, comcat_ids).and(time_filter(time_lo, time_hi));
        let docs = self
            .store
            .find_many(&self.collection, &filter, &Sort::desc(FAMILY_TIME))
            .await?;
        docs.into_iter().map(|doc| from_document(KIND, doc)).collect()
    }

    /// Resolve a Comcat id to the timeline currently binding it.
    pub async fn resolve_comcat_id(
        &self,
        comcat_id: &str,
        time_hi: Option<i64>,
    ) -> Result<Option<AliasLookup>, CoreError> {
        let Some(family) = self.get_active_for_comcat_id(comcat_id, time_hi).await? else {
            return Ok(None);
        };
        let assignments = family.assignments()?;
        let binding = assignments.find_binding(comcat_id);
        Ok(Some(AliasLookup {
            comcat_id: comcat_id.to_string(),
            family_id: family.id,
            family_time: family.family_time,
            timeline_id: binding.map(|a| a.timeline_id.clone()),
            primary_id: binding.and_then(|a| a.primary_id()).map(str::to_string),
            timeline_comcat_ids: binding.map(|a| a.comcat_ids.clone()).unwrap_or_default(),
        }))
    }

    /// Fold fresh Comcat observations into the families they touch.
    ///
    /// Each observation is authoritative for the ids it lists: afterwards
    /// exactly those ids are bound to one timeline. That timeline is the
    /// existing one sharing the most ids with the observation (earliest on a
    /// tie), or a new `ccid_<primary>` timeline if none shares any. Ids that
    /// leave a timeline are kept in its removed set, so every snapshot
    /// written contains every id of the snapshots it supersedes, and a
    /// timeline's current ids never jump to a disjoint set.
    ///
    /// Observations are grouped by the families they reach; groups sharing
    /// no family are reconciled independently and yield one outcome each,
    /// ordered by their first observation. Families joined by one group are
    /// merged into one snapshot. A group's written `family_time` is
    /// `family_time`, or one past its newest superseded snapshot if that is
    /// not already later.
    ///
    /// Every group's write time is checked before the first write. Groups
    /// are then written in order, so a store error leaves earlier groups
    /// written.
    pub async fn reconcile(
        &self,
        family_time: i64,
        observations: &[ComcatObservation],
    ) -> Result<Vec<ReconcileOutcome>, CoreError> {
        validate_observations(family_time, observations)?;

        let mut groups: Vec<ObservationGroup<'_>> = Vec::new();
        for (index, observation) in observations.iter().enumerate() {
            let families = self.touching_families(observation.ids()).await?;
            let mut group = ObservationGroup::new(index, observation, families);
            let mut i = 0;
            while i < groups.len() {
                if groups[i].shares_family(&group) {
                    let mut earlier = groups.remove(i);
                    earlier.absorb(group);
                    group = earlier;
                } else {
                    i += 1;
                }
            }
            groups.push(group);
        }
        for group in &mut groups {
            group.observations.sort_by_key(|&(index, _)| index);
        }
        groups.sort_by_key(|g| g.observations.first().map(|&(index, _)| index));

        let write_times = groups
            .iter()
            .map(|g| g.write_time(family_time))
            .collect::<Result<Vec<_>, _>>()?;

        let mut outcomes = Vec::with_capacity(groups.len());
        for (group, write_time) in groups.into_iter().zip(write_times) {
            outcomes.push(self.reconcile_group(group, write_time).await?);
        }
        Ok(outcomes)
    }

    async fn reconcile_group(
        &self,
        group: ObservationGroup<'_>,
        write_time: i64,
    ) -> Result<ReconcileOutcome, CoreError> {
        let ObservationGroup {
            observations,
            mut families,
            ..
        } = group;
        families.sort_by(|a, b| a.family_time.cmp(&b.family_time).then(a.id.cmp(&b.id)));

        let mut list = AliasAssignmentList::default();
        for family in &families {
            for assignment in family.assignments()?.assignments {
                list.push(assignment);
            }
        }
        // Only a single untouched family can be left as is; merging always
        // writes.
        let previous = (families.len() == 1).then(|| list.clone());

        for (_, observation) in observations {
            let ids = observation.ids();
            let chosen = list
                .assignments
                .iter()
                .enumerate()
                .map(|(i, a)| (i, a.overlap(ids)))
                .filter(|&(_, overlap)| overlap > 0)
                // Largest overlap; on a tie `max_by` keeps the last maximum,
                // so compare indices in reverse to keep the earliest.
                .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
                .map(|(i, _)| i);

            for (i, assignment) in list.assignments.iter_mut().enumerate() {
                if Some(i) != chosen {
                    assignment.unbind(ids);
                }
            }
            match chosen {
                Some(i) => list.assignments[i].rebind(ids),
                None => {
                    let timeline_id = self.fresh_timeline_id(ids, &list).await?;
                    tracing::info!(%timeline_id, "minted timeline");
                    list.push(AliasAssignment::new(timeline_id, ids.to_vec()));
                }
            }
        }

        if previous.as_ref() == Some(&list) {
            if let Some(family) = families.pop() {
                tracing::debug!(family_id = %family.id, "alias family unchanged");
                return Ok(ReconcileOutcome::Unchanged(family));
            }
        }

        let family = self.submit_family(write_time, &list).await?;
        if families.len() > 1 {
            tracing::info!(family_id = %family.id, merged = families.len(), "merged alias families");
        }
        Ok(ReconcileOutcome::Written {
            family,
            superseded: families.len(),
        })
    }

    /// Insert a snapshot exactly as given (backup/restore).
    pub async fn store_as_is(&self, family: &AliasFamily) -> Result<(), CoreError> {
        self.store
            .insert(&self.collection, to_document(family)?)
            .await?;
        Ok(())
    }

    /// Every snapshot in the collection, oldest first.
    pub async fn all(&self) -> Result<Vec<AliasFamily>, CoreError> {
        let docs = self
            .store
            .find_many(&self.collection, &Filter::All, &Sort::asc(FAMILY_TIME))
            .await?;
        docs.into_iter().map(|doc| from_document(KIND, doc)).collect()
    }

    async fn most_recent(
        &self,
        membership: Filter,
        time_hi: Option<i64>,
    ) -> Result<Option<AliasFamily>, CoreError> {
        let filter = membership.and(time_filter(None, time_hi));
        self.store
            .find_one(&self.collection, &filter, &Sort::desc(FAMILY_TIME))
            .await?
            .map(|doc| from_document(KIND, doc))
            .transpose()
    }

    /// Active snapshots reachable from `ids`: each found family contributes
    /// all of its ids to the search until nothing new turns up.
    async fn touching_families(&self, ids: &[String]) -> Result<Vec<AliasFamily>, CoreError> {
        let mut pending: VecDeque<String> = ids.iter().cloned().collect();
        let mut probed: HashSet<String> = HashSet::new();
        let mut found: HashSet<DocId> = HashSet::new();
        let mut families = Vec::new();

        while let Some(comcat_id) = pending.pop_front() {
            if !probed.insert(comcat_id.clone()) {
                continue;
            }
            let Some(family) = self.get_active_for_comcat_id(&comcat_id, None).await? else {
                continue;
            };
            if found.insert(family.id) {
                pending.extend(
                    family
                        .comcat_ids
                        .iter()
                        .filter(|c| !probed.contains(*c))
                        .cloned(),
                );
                families.push(family);
            }
        }
        tracing::debug!(families = families.len(), probed = probed.len(), "collected alias families");
        Ok(families)
    }

    async fn fresh_timeline_id(
        &self,
        ids: &[String],
        pending: &AliasAssignmentList,
    ) -> Result<String, CoreError> {
        let primary = ids.first().map(String::as_str).unwrap_or_default();
        let base = format!("{TIMELINE_ID_PREFIX}{primary}");
        let mut candidate = base.clone();
        let mut n = 1;
        loop {
            let taken = pending.contains_timeline(&candidate)
                || self
                    .get_active_for_timeline_id(&candidate, None)
                    .await?
                    .is_some();
            if !taken {
                return Ok(candidate);
            }
            n += 1;
            candidate = format!("{base}_{n}");
        }
    }
}

/// Observations whose family closures overlap, with the union of those
/// families.
struct ObservationGroup<'a> {
    /// Input position and observation.
    observations: Vec<(usize, &'a ComcatObservation)>,
    families: Vec<AliasFamily>,
    family_ids: HashSet<DocId>,
}

impl<'a> ObservationGroup<'a> {
    fn new(
        index: usize,
        observation: &'a ComcatObservation,
        families: Vec<AliasFamily>,
    ) -> Self {
        let family_ids = families.iter().map(|f| f.id).collect();
        ObservationGroup {
            observations: vec![(index, observation)],
            families,
            family_ids,
        }
    }

    fn shares_family(&self, other: &ObservationGroup<'_>) -> bool {
        !self.family_ids.is_disjoint(&other.family_ids)
    }

    fn absorb(&mut self, other: ObservationGroup<'a>) {
        self.observations.extend(other.observations);
        for family in other.families {
            if self.family_ids.insert(family.id) {
                self.families.push(family);
            }
        }
    }

    fn write_time(&self, family_time: i64) -> Result<i64, ValidationError> {
        match self.families.iter().map(|f| f.family_time).max() {
            Some(newest) if newest >= family_time => next_time("family_time", newest),
            _ => Ok(family_time),
        }
    }
}

fn validate_observations(
    family_time: i64,
    observations: &[ComcatObservation],
) -> Result<(), ValidationError> {
    require_positive("family_time", family_time)?;
    if observations.is_empty() {
        return Err(ValidationError::Empty {
            field: "observations",
        });
    }
    let mut seen = HashSet::new();
    for observation in observations {
        if observation.ids().is_empty() {
            return Err(ValidationError::Empty {
                field: "observation",
            });
        }
        for id in observation.ids() {
            require_non_empty("comcat_id", id)?;
            if !seen.insert(id.as_str()) {
                return Err(ValidationError::DuplicateComcatId(id.clone()));
            }
        }
    }
    Ok(())
}
