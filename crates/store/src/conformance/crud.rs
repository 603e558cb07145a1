use std::future::Future;

use serde_json::json;

use super::{field_i64, make_doc, TestResult, COLL};
use crate::{DocId, DocumentStore, Filter, Sort, StoreError};

pub(super) async fn run_crud_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "crud",
            "insert_then_find_by_id",
            insert_then_find_by_id(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "insert_duplicate_id_rejected",
            insert_duplicate_id_rejected(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "replace_overwrites_only_given_fields",
            replace_overwrites_only_given_fields(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "replace_missing_returns_not_found",
            replace_missing_returns_not_found(factory).await,
        ),
        TestResult::from_result(
            "crud",
            "delete_reports_removal",
            delete_reports_removal(factory).await,
        ),
    ]
}

async fn insert_then_find_by_id<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let (id, doc) = make_doc(json!({"n": 7}));
    store
        .insert(COLL, doc)
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let found = store
        .find_one(COLL, &Filter::id(id), &Sort::Natural)
        .await
        .map_err(|e| format!("find_one: {e}"))?
        .ok_or("inserted document not found")?;
    if field_i64(&found, "n")? != 7 {
        return Err(format!("expected n = 7, got {found:?}"));
    }
    Ok(())
}

async fn insert_duplicate_id_rejected<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let (_, doc) = make_doc(json!({"n": 1}));
    store
        .insert(COLL, doc.clone())
        .await
        .map_err(|e| format!("first insert: {e}"))?;
    match store.insert(COLL, doc).await {
        Err(StoreError::DuplicateKey { .. }) => Ok(()),
        Err(e) => Err(format!("expected DuplicateKey, got {e}")),
        Ok(()) => Err("second insert with same id succeeded".to_string()),
    }
}

async fn replace_overwrites_only_given_fields<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let (id, doc) = make_doc(json!({"a": 1, "b": 2}));
    store
        .insert(COLL, doc)
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let mut fields = crate::Document::new();
    fields.insert("b".to_string(), json!(20));
    store
        .replace_by_id(COLL, id, fields)
        .await
        .map_err(|e| format!("replace: {e}"))?;

    let found = store
        .find_one(COLL, &Filter::id(id), &Sort::Natural)
        .await
        .map_err(|e| format!("find_one: {e}"))?
        .ok_or("document vanished after replace")?;
    if field_i64(&found, "a")? != 1 || field_i64(&found, "b")? != 20 {
        return Err(format!("unexpected document after replace: {found:?}"));
    }
    Ok(())
}

async fn replace_missing_returns_not_found<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let id = DocId::new();
    match store.replace_by_id(COLL, id, crate::Document::new()).await {
        Err(StoreError::NotFound { id: got, .. }) if got == id => Ok(()),
        Err(e) => Err(format!("expected NotFound for {id}, got {e}")),
        Ok(()) => Err("replace of missing document succeeded".to_string()),
    }
}

async fn delete_reports_removal<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let (id, doc) = make_doc(json!({}));
    store
        .insert(COLL, doc)
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let first = store
        .delete_by_id(COLL, id)
        .await
        .map_err(|e| format!("delete: {e}"))?;
    let second = store
        .delete_by_id(COLL, id)
        .await
        .map_err(|e| format!("second delete: {e}"))?;
    if !first || second {
        return Err(format!("expected (true, false), got ({first}, {second})"));
    }
    Ok(())
}
