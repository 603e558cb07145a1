use std::future::Future;

use serde_json::json;

use super::{field_i64, make_doc, TestResult, COLL};
use crate::{DocId, DocumentStore, Filter, Sort};

pub(super) async fn run_query_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "query",
            "range_filter_and_ascending_sort",
            range_filter_and_ascending_sort(factory).await,
        ),
        TestResult::from_result(
            "query",
            "descending_sort_takes_greatest",
            descending_sort_takes_greatest(factory).await,
        ),
        TestResult::from_result(
            "query",
            "equal_keys_break_ties_by_id",
            equal_keys_break_ties_by_id(factory).await,
        ),
        TestResult::from_result(
            "query",
            "array_membership_or_filter",
            array_membership_or_filter(factory).await,
        ),
        TestResult::from_result(
            "query",
            "missing_collection_is_empty",
            missing_collection_is_empty(factory).await,
        ),
    ]
}

async fn seed<S: DocumentStore>(store: &S, times: &[i64]) -> Result<Vec<DocId>, String> {
    let mut ids = Vec::new();
    for t in times {
        let (id, doc) = make_doc(json!({"t": t}));
        store
            .insert(COLL, doc)
            .await
            .map_err(|e| format!("insert t={t}: {e}"))?;
        ids.push(id);
    }
    Ok(ids)
}

async fn range_filter_and_ascending_sort<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    seed(&store, &[50, 10, 40, 0, 30]).await?;

    let filter = Filter::gt("t", 0).and(Filter::lte("t", 40));
    let docs = store
        .find_many(COLL, &filter, &Sort::asc("t"))
        .await
        .map_err(|e| format!("find_many: {e}"))?;
    let times = docs
        .iter()
        .map(|d| field_i64(d, "t"))
        .collect::<Result<Vec<_>, _>>()?;
    if times != vec![10, 30, 40] {
        return Err(format!("expected [10, 30, 40], got {times:?}"));
    }
    Ok(())
}

async fn descending_sort_takes_greatest<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    seed(&store, &[100, 300, 200]).await?;

    let first = store
        .find_one(COLL, &Filter::All, &Sort::desc("t"))
        .await
        .map_err(|e| format!("find_one: {e}"))?
        .ok_or("no document")?;
    if field_i64(&first, "t")? != 300 {
        return Err(format!("expected t = 300, got {first:?}"));
    }

    let bounded = store
        .find_one(COLL, &Filter::lte("t", 250), &Sort::desc("t"))
        .await
        .map_err(|e| format!("find_one bounded: {e}"))?
        .ok_or("no document under bound")?;
    if field_i64(&bounded, "t")? != 200 {
        return Err(format!("expected t = 200, got {bounded:?}"));
    }
    Ok(())
}

async fn equal_keys_break_ties_by_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let ids = seed(&store, &[5, 5, 5]).await?;
    let mut expected = ids.clone();
    expected.sort();

    let docs = store
        .find_many(COLL, &Filter::All, &Sort::asc("t"))
        .await
        .map_err(|e| format!("find_many: {e}"))?;
    let got = docs
        .iter()
        .map(|d| {
            d.get(crate::ID_FIELD)
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<DocId>().ok())
                .ok_or_else(|| format!("bad id in {d:?}"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    if got != expected {
        return Err(format!("expected id order {expected:?}, got {got:?}"));
    }
    Ok(())
}

async fn array_membership_or_filter<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    for (n, ids) in [(1, json!(["a", "b"])), (2, json!(["c"])), (3, json!(["d"]))] {
        let (_, doc) = make_doc(json!({"n": n, "ids": ids, "owner": format!("o{n}")}));
        store
            .insert(COLL, doc)
            .await
            .map_err(|e| format!("insert: {e}"))?;
    }

    let filter = Filter::Or(vec![
        Filter::contains("ids", "b"),
        Filter::eq("owner", "o3"),
    ]);
    let docs = store
        .find_many(COLL, &filter, &Sort::asc("n"))
        .await
        .map_err(|e| format!("find_many: {e}"))?;
    let ns = docs
        .iter()
        .map(|d| field_i64(d, "n"))
        .collect::<Result<Vec<_>, _>>()?;
    if ns != vec![1, 3] {
        return Err(format!("expected [1, 3], got {ns:?}"));
    }
    Ok(())
}

async fn missing_collection_is_empty<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let docs = store
        .find_many("never_written", &Filter::All, &Sort::Natural)
        .await
        .map_err(|e| format!("find_many: {e}"))?;
    if !docs.is_empty() {
        return Err(format!("expected no documents, got {}", docs.len()));
    }
    Ok(())
}
