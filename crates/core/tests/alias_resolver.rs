use std::sync::Arc;

use aafs_core::alias::{
    AliasAssignment, AliasAssignmentList, AliasResolver, ComcatObservation, ReconcileOutcome,
};
use aafs_core::{CoreError, ValidationError};
use aafs_store::MemoryStore;

fn resolver() -> AliasResolver<MemoryStore> {
    AliasResolver::new(Arc::new(MemoryStore::new()), "alias_families")
}

fn ids(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

fn obs(v: &[&str]) -> ComcatObservation {
    ComcatObservation::from_ids(ids(v))
}

fn single(timeline: &str, current: &[&str]) -> AliasAssignmentList {
    AliasAssignmentList::new(vec![AliasAssignment::new(timeline, ids(current))])
}

/// Reconcile observations expected to form one family group.
async fn reconcile_one(
    r: &AliasResolver<MemoryStore>,
    family_time: i64,
    observations: &[ComcatObservation],
) -> Result<ReconcileOutcome, CoreError> {
    let mut outcomes = r.reconcile(family_time, observations).await?;
    assert_eq!(outcomes.len(), 1, "expected one family group: {outcomes:?}");
    Ok(outcomes.remove(0))
}

#[tokio::test]
async fn later_snapshot_supersedes_and_time_bound_selects_earlier() {
    let r = resolver();
    r.ensure_indexes().await.unwrap();
    let s1 = r.submit_family(100, &single("T", &["A", "B"])).await.unwrap();
    let s2 = r
        .submit_family(200, &single("T", &["A", "B", "C"]))
        .await
        .unwrap();
    assert!(s2.supersedes(&s1));

    let active = r.get_active_for_comcat_id("A", None).await.unwrap().unwrap();
    assert_eq!(active.id, s2.id);
    let bounded = r
        .get_active_for_comcat_id("A", Some(150))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bounded.id, s1.id);
    assert!(r
        .get_active_for_comcat_id("C", Some(150))
        .await
        .unwrap()
        .is_none());
    let by_timeline = r.get_active_for_timeline_id("T", None).await.unwrap().unwrap();
    assert_eq!(by_timeline.id, s2.id);

    // Superseded snapshots stay in the store.
    let history = r.get_range(None, None, None, &["B"]).await.unwrap();
    assert_eq!(
        history.iter().map(|f| f.family_time).collect::<Vec<_>>(),
        vec![200, 100]
    );
    assert!(r.fetch_by_id(s1.id).await.unwrap().is_some());
}

#[tokio::test]
async fn malformed_list_writes_nothing() {
    let r = resolver();
    let list = AliasAssignmentList::new(vec![
        AliasAssignment::new("T1", ids(&["A"])),
        AliasAssignment::new("T2", ids(&["A"])),
    ]);
    let err = r.submit_family(100, &list).await.unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::DuplicateComcatId(_))
    ));
    assert!(r.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn resolve_reports_timeline_primary_and_orphans() {
    let r = resolver();
    let list = AliasAssignmentList::new(vec![
        AliasAssignment::new("T1", ids(&["B", "A"])).with_removed(["X"]),
    ]);
    let family = r.submit_family(100, &list).await.unwrap();

    let lookup = r.resolve_comcat_id("A", None).await.unwrap().unwrap();
    assert_eq!(lookup.timeline_id.as_deref(), Some("T1"));
    assert_eq!(lookup.primary_id.as_deref(), Some("B"));
    assert_eq!(lookup.timeline_comcat_ids, ids(&["B", "A"]));
    assert_eq!(lookup.family_id, family.id);

    let orphan = r.resolve_comcat_id("X", None).await.unwrap().unwrap();
    assert_eq!(orphan.timeline_id, None);
    assert!(orphan.timeline_comcat_ids.is_empty());

    assert!(r.resolve_comcat_id("nope", None).await.unwrap().is_none());
}

#[tokio::test]
async fn reconcile_new_event_then_repeat_is_unchanged() {
    let r = resolver();
    let first = reconcile_one(&r, 100, &[obs(&["A", "B"])]).await.unwrap();
    let ReconcileOutcome::Written { family, superseded } = &first else {
        panic!("expected a write, got {first:?}");
    };
    assert_eq!(*superseded, 0);
    assert_eq!(family.timeline_ids, ids(&["ccid_A"]));
    assert_eq!(family.family_time, 100);

    let again = reconcile_one(&r, 200, &[obs(&["A", "B"])]).await.unwrap();
    assert!(!again.was_written());
    assert_eq!(again.family().id, family.id);
    assert_eq!(r.all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn reconcile_grows_existing_timeline() {
    let r = resolver();
    reconcile_one(&r, 100, &[obs(&["A", "B"])]).await.unwrap();
    let out = reconcile_one(&r, 200, &[obs(&["A", "B", "C"])]).await.unwrap();
    assert!(matches!(out, ReconcileOutcome::Written { superseded: 1, .. }));

    let lookup = r.resolve_comcat_id("C", None).await.unwrap().unwrap();
    assert_eq!(lookup.timeline_id.as_deref(), Some("ccid_A"));
    assert_eq!(lookup.family_time, 200);
}

#[tokio::test]
async fn reconcile_split_keeps_ids_and_bumps_time() {
    let r = resolver();
    reconcile_one(&r, 200, &[obs(&["A", "B", "C"])]).await.unwrap();

    // Requested time is older than the active snapshot.
    let out = reconcile_one(&r, 150, &[obs(&["A"]), obs(&["C", "B"])])
        .await
        .unwrap();
    let family = out.family().clone();
    assert!(out.was_written());
    assert_eq!(family.family_time, 201);

    let list = family.assignments().unwrap();
    let a = list.find_timeline("ccid_A").unwrap();
    assert_eq!(a.comcat_ids, ids(&["A"]));
    assert!(a.removed_ids.contains("B") && a.removed_ids.contains("C"));
    let c = list.find_timeline("ccid_C").unwrap();
    assert_eq!(c.comcat_ids, ids(&["C", "B"]));

    // Every id of the superseded snapshot is still present.
    for id in ["A", "B", "C"] {
        assert!(family.contains_comcat_id(id));
    }
}

#[tokio::test]
async fn reconcile_merges_families_into_earliest_timeline() {
    let r = resolver();
    reconcile_one(&r, 100, &[obs(&["A"])]).await.unwrap();
    reconcile_one(&r, 110, &[obs(&["X"])]).await.unwrap();

    let out = reconcile_one(&r, 300, &[obs(&["A", "X"])]).await.unwrap();
    assert!(matches!(out, ReconcileOutcome::Written { superseded: 2, .. }));
    let merged = out.family();
    assert_eq!(merged.timeline_ids, ids(&["ccid_A", "ccid_X"]));

    let list = merged.assignments().unwrap();
    assert_eq!(list.find_timeline("ccid_A").unwrap().comcat_ids, ids(&["A", "X"]));
    let x = list.find_timeline("ccid_X").unwrap();
    assert!(x.comcat_ids.is_empty());
    assert!(x.removed_ids.contains("X"));

    let active = r.get_active_for_comcat_id("X", None).await.unwrap().unwrap();
    assert_eq!(active.id, merged.id);
    let by_old_timeline = r
        .get_active_for_timeline_id("ccid_X", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_old_timeline.id, merged.id);
}

#[tokio::test]
async fn reconcile_follows_family_through_unobserved_ids() {
    let r = resolver();
    reconcile_one(&r, 100, &[obs(&["A", "B"])]).await.unwrap();
    reconcile_one(&r, 110, &[obs(&["B", "C"])]).await.unwrap();
    // The family now holds A (orphaned) plus B and C; observing only A
    // must find it through A and keep every id.
    let out = reconcile_one(&r, 120, &[obs(&["A"])]).await.unwrap();
    let family = out.family();
    for id in ["A", "B", "C"] {
        assert!(family.contains_comcat_id(id), "missing {id}");
    }
    assert!(matches!(out, ReconcileOutcome::Written { superseded: 1, .. }));
}

#[tokio::test]
async fn fresh_timeline_id_avoids_existing_ones() {
    let r = resolver();
    r.submit_family(100, &single("ccid_Q", &["Z"])).await.unwrap();
    let out = reconcile_one(&r, 200, &[obs(&["Q"])]).await.unwrap();
    assert_eq!(out.family().timeline_ids, ids(&["ccid_Q_2"]));
}

#[tokio::test]
async fn unrelated_observations_stay_in_separate_families() {
    let r = resolver();
    reconcile_one(&r, 100, &[obs(&["A"])]).await.unwrap();
    reconcile_one(&r, 110, &[obs(&["Z"])]).await.unwrap();

    let outcomes = r
        .reconcile(200, &[obs(&["A", "B"]), obs(&["Z", "Y"])])
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(ReconcileOutcome::was_written));
    assert!(matches!(outcomes[0], ReconcileOutcome::Written { superseded: 1, .. }));
    assert!(matches!(outcomes[1], ReconcileOutcome::Written { superseded: 1, .. }));

    let a = outcomes[0].family();
    assert_eq!(a.timeline_ids, ids(&["ccid_A"]));
    assert_eq!(a.comcat_ids, ids(&["A", "B"]));
    let z = outcomes[1].family();
    assert_eq!(z.timeline_ids, ids(&["ccid_Z"]));
    assert_eq!(z.comcat_ids, ids(&["Z", "Y"]));

    let active_a = r.get_active_for_comcat_id("A", None).await.unwrap().unwrap();
    let active_z = r.get_active_for_comcat_id("Z", None).await.unwrap().unwrap();
    assert_ne!(active_a.id, active_z.id);
    assert!(!active_a.contains_comcat_id("Z"));
    assert!(!active_z.contains_comcat_id("A"));

    // Re-observing one event leaves the other lineage alone.
    let again = reconcile_one(&r, 300, &[obs(&["A", "B"])]).await.unwrap();
    assert!(!again.was_written());
    assert_eq!(r.all().await.unwrap().len(), 4);
}

#[tokio::test]
async fn new_events_in_one_batch_get_their_own_families() {
    let r = resolver();
    let outcomes = r
        .reconcile(100, &[obs(&["P"]), obs(&["Q", "R"]), obs(&["A"])])
        .await
        .unwrap();
    let timelines: Vec<_> = outcomes
        .iter()
        .map(|o| o.family().timeline_ids.clone())
        .collect();
    assert_eq!(timelines, vec![ids(&["ccid_P"]), ids(&["ccid_Q"]), ids(&["ccid_A"])]);
}

#[tokio::test]
async fn observations_sharing_a_family_reconcile_together() {
    let r = resolver();
    reconcile_one(&r, 100, &[obs(&["A", "B"])]).await.unwrap();
    reconcile_one(&r, 100, &[obs(&["X"])]).await.unwrap();

    // The first and third observations both reach {A, B}; the second is
    // unrelated and written separately.
    let outcomes = r
        .reconcile(200, &[obs(&["A"]), obs(&["X"]), obs(&["B"])])
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    let split = outcomes[0].family();
    assert_eq!(split.timeline_ids, ids(&["ccid_A", "ccid_B"]));
    assert!(!outcomes[1].was_written());
    assert_eq!(outcomes[1].family().timeline_ids, ids(&["ccid_X"]));
}

#[tokio::test]
async fn reconcile_past_max_family_time_writes_nothing() {
    let r = resolver();
    r.submit_family(i64::MAX, &single("T", &["A"])).await.unwrap();

    let err = r
        .reconcile(100, &[obs(&["A", "B"]), obs(&["N"])])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CoreError::Validation(ValidationError::TimeOverflow {
            field: "family_time",
            value: i64::MAX
        })
    ));
    // The unrelated new event is not written either.
    assert_eq!(r.all().await.unwrap().len(), 1);
    assert!(r.resolve_comcat_id("N", None).await.unwrap().is_none());
}

#[tokio::test]
async fn reconcile_rejects_bad_observations() {
    let r = resolver();
    let overlapping = r
        .reconcile(100, &[obs(&["A", "B"]), obs(&["B"])])
        .await
        .unwrap_err();
    assert!(matches!(
        overlapping,
        CoreError::Validation(ValidationError::DuplicateComcatId(_))
    ));
    assert!(r.reconcile(100, &[]).await.unwrap_err().is_validation());
    assert!(r.reconcile(100, &[obs(&[])]).await.unwrap_err().is_validation());
    assert!(r.reconcile(0, &[obs(&["A"])]).await.unwrap_err().is_validation());
    assert!(r.all().await.unwrap().is_empty());
}

#[tokio::test]
async fn observation_keeps_primary_first_and_drops_repeats() {
    let o = ComcatObservation::new("us1", ["ci2", "us1", "ak3"]);
    assert_eq!(o.primary_id(), Some("us1"));
    assert_eq!(o.ids(), &ids(&["us1", "ci2", "ak3"])[..]);
}
