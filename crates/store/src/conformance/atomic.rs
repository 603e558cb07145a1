use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use serde_json::json;

use super::{field_i64, make_doc, TestResult, COLL};
use crate::{DocumentStore, Filter, Sort, Update, ID_FIELD};

/// Number of concurrent tasks to spawn in each test.
const N: usize = 10;

pub(super) async fn run_atomic_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "atomic",
            "find_and_update_returns_before_image",
            find_and_update_returns_before_image(factory).await,
        ),
        TestResult::from_result(
            "atomic",
            "find_and_update_no_match_writes_nothing",
            find_and_update_no_match_writes_nothing(factory).await,
        ),
        TestResult::from_result(
            "atomic",
            "concurrent_claims_exactly_one_wins",
            concurrent_claims_exactly_one_wins(factory).await,
        ),
        TestResult::from_result(
            "atomic",
            "concurrent_claims_partition_documents",
            concurrent_claims_partition_documents(factory).await,
        ),
    ]
}

async fn find_and_update_returns_before_image<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let (id, doc) = make_doc(json!({"t": 42}));
    store
        .insert(COLL, doc)
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let before = store
        .find_and_update_atomic(COLL, &Filter::gt("t", 0), &Update::set("t", 0), &Sort::asc("t"))
        .await
        .map_err(|e| format!("find_and_update: {e}"))?
        .ok_or("no document claimed")?;
    if field_i64(&before, "t")? != 42 {
        return Err(format!("expected before-image t = 42, got {before:?}"));
    }

    let after = store
        .find_one(COLL, &Filter::id(id), &Sort::Natural)
        .await
        .map_err(|e| format!("find_one: {e}"))?
        .ok_or("document vanished")?;
    if field_i64(&after, "t")? != 0 {
        return Err(format!("expected stored t = 0, got {after:?}"));
    }
    Ok(())
}

async fn find_and_update_no_match_writes_nothing<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let (_, doc) = make_doc(json!({"t": 0}));
    store
        .insert(COLL, doc)
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let claimed = store
        .find_and_update_atomic(COLL, &Filter::gt("t", 0), &Update::set("t", 9), &Sort::Natural)
        .await
        .map_err(|e| format!("find_and_update: {e}"))?;
    if claimed.is_some() {
        return Err(format!("expected no match, got {claimed:?}"));
    }
    let untouched = store
        .find_many(COLL, &Filter::eq("t", 0), &Sort::Natural)
        .await
        .map_err(|e| format!("find_many: {e}"))?;
    if untouched.len() != 1 {
        return Err(format!("expected 1 untouched document, got {}", untouched.len()));
    }
    Ok(())
}

// ── Concurrent claims ────────────────────────────────────────────────────────

/// N tasks race to claim the single document whose `t` is positive by
/// setting it to 0. Exactly one must observe the original before-image.
async fn concurrent_claims_exactly_one_wins<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);
    let (_, doc) = make_doc(json!({"t": 1000}));
    store
        .insert(COLL, doc)
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.find_and_update_atomic(
                COLL,
                &Filter::gt("t", 0),
                &Update::set("t", 0),
                &Sort::asc("t"),
            )
            .await
        }));
    }

    let mut winners = 0usize;
    for handle in handles {
        let claimed = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("store error: {e}"))?;
        if let Some(before) = claimed {
            if field_i64(&before, "t")? != 1000 {
                return Err(format!("winner saw wrong before-image: {before:?}"));
            }
            winners += 1;
        }
    }

    if winners != 1 {
        return Err(format!("expected exactly 1 winner, got {winners}"));
    }
    Ok(())
}

/// N documents and N claimers: every claimer gets a different document.
async fn concurrent_claims_partition_documents<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = Arc::new(factory().await);
    for i in 0..N {
        let (_, doc) = make_doc(json!({"t": 100 + i as i64}));
        store
            .insert(COLL, doc)
            .await
            .map_err(|e| format!("insert: {e}"))?;
    }

    let mut handles = Vec::new();
    for _ in 0..N {
        let s = store.clone();
        handles.push(tokio::spawn(async move {
            s.find_and_update_atomic(
                COLL,
                &Filter::gt("t", 0),
                &Update::set("t", 0),
                &Sort::asc("t"),
            )
            .await
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        let before = handle
            .await
            .map_err(|e| format!("task panic: {e}"))?
            .map_err(|e| format!("store error: {e}"))?
            .ok_or("a claimer found nothing although documents remained")?;
        let id = before
            .get(ID_FIELD)
            .map(|v| v.to_string())
            .ok_or("claimed document has no id")?;
        if !seen.insert(id.clone()) {
            return Err(format!("document {id} claimed twice"));
        }
    }
    Ok(())
}
