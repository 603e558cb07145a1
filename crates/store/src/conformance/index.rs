use std::future::Future;

use serde_json::json;

use super::{make_doc, TestResult, COLL};
use crate::{DocumentStore, IndexSpec, StoreError};

pub(super) async fn run_index_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "index",
            "unique_index_rejects_second_key",
            unique_index_rejects_second_key(factory).await,
        ),
        TestResult::from_result(
            "index",
            "unique_index_over_duplicates_fails",
            unique_index_over_duplicates_fails(factory).await,
        ),
        TestResult::from_result(
            "index",
            "drop_collection_removes_everything",
            drop_collection_removes_everything(factory).await,
        ),
    ]
}

async fn unique_index_rejects_second_key<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    store
        .create_index(COLL, IndexSpec::unique("key"))
        .await
        .map_err(|e| format!("create_index: {e}"))?;

    let (_, first) = make_doc(json!({"key": "pdl_a"}));
    let (_, second) = make_doc(json!({"key": "pdl_a"}));
    store
        .insert(COLL, first)
        .await
        .map_err(|e| format!("first insert: {e}"))?;
    match store.insert(COLL, second).await {
        Err(StoreError::DuplicateKey { field, .. }) if field == "key" => Ok(()),
        Err(e) => Err(format!("expected DuplicateKey on 'key', got {e}")),
        Ok(()) => Err("unique index allowed a duplicate".to_string()),
    }
}

async fn unique_index_over_duplicates_fails<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    for _ in 0..2 {
        let (_, doc) = make_doc(json!({"key": "same"}));
        store
            .insert(COLL, doc)
            .await
            .map_err(|e| format!("insert: {e}"))?;
    }
    match store.create_index(COLL, IndexSpec::unique("key")).await {
        Err(StoreError::DuplicateKey { .. }) => Ok(()),
        Err(e) => Err(format!("expected DuplicateKey, got {e}")),
        Ok(()) => Err("unique index created over duplicate values".to_string()),
    }
}

async fn drop_collection_removes_everything<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let (_, doc) = make_doc(json!({"key": "x"}));
    store
        .create_index(COLL, IndexSpec::unique("key"))
        .await
        .map_err(|e| format!("create_index: {e}"))?;
    store
        .insert(COLL, doc.clone())
        .await
        .map_err(|e| format!("insert: {e}"))?;
    if !store
        .collection_exists(COLL)
        .await
        .map_err(|e| format!("exists: {e}"))?
    {
        return Err("collection missing after insert".to_string());
    }

    store
        .drop_collection(COLL)
        .await
        .map_err(|e| format!("drop: {e}"))?;
    if store
        .collection_exists(COLL)
        .await
        .map_err(|e| format!("exists after drop: {e}"))?
    {
        return Err("collection still exists after drop".to_string());
    }

    // Re-inserting the same document works: documents and indexes are gone.
    store
        .insert(COLL, doc)
        .await
        .map_err(|e| format!("re-insert after drop: {e}"))?;
    Ok(())
}
