use std::future::Future;
use std::time::Duration;

use serde_json::json;

use super::{field_i64, make_doc, TestResult, COLL};
use crate::{ChangeKind, ChangeStream, DocumentStore, Filter};

pub(super) async fn run_watch_tests<S, F, Fut>(factory: &F) -> Vec<TestResult>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    vec![
        TestResult::from_result(
            "watch",
            "insert_replace_delete_delivered_in_order",
            insert_replace_delete_delivered_in_order(factory).await,
        ),
        TestResult::from_result(
            "watch",
            "filter_excludes_non_matching_documents",
            filter_excludes_non_matching_documents(factory).await,
        ),
        TestResult::from_result(
            "watch",
            "missing_field_clause_passes_deletes",
            missing_field_clause_passes_deletes(factory).await,
        ),
        TestResult::from_result(
            "watch",
            "closed_stream_yields_none",
            closed_stream_yields_none(factory).await,
        ),
    ]
}

/// How long a test waits for an expected change event.
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

async fn expect_next(stream: &mut ChangeStream) -> Result<crate::ChangeEvent, String> {
    tokio::time::timeout(EVENT_TIMEOUT, stream.next())
        .await
        .map_err(|_| "timed out waiting for a change event".to_string())?
        .ok_or("change feed closed while an event was expected")?
        .map_err(|e| format!("change feed error: {e}"))
}

async fn insert_replace_delete_delivered_in_order<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut stream = store
        .watch(COLL, Filter::All)
        .await
        .map_err(|e| format!("watch: {e}"))?;

    let (id, doc) = make_doc(json!({"v": 1}));
    store
        .insert(COLL, doc)
        .await
        .map_err(|e| format!("insert: {e}"))?;
    let mut fields = crate::Document::new();
    fields.insert("v".to_string(), json!(2));
    store
        .replace_by_id(COLL, id, fields)
        .await
        .map_err(|e| format!("replace: {e}"))?;
    store
        .delete_by_id(COLL, id)
        .await
        .map_err(|e| format!("delete: {e}"))?;

    let insert = expect_next(&mut stream).await?;
    let replace = expect_next(&mut stream).await?;
    let delete = expect_next(&mut stream).await?;

    if insert.kind != ChangeKind::Insert || replace.kind != ChangeKind::Replace {
        return Err(format!(
            "unexpected kinds: {:?}, {:?}",
            insert.kind, replace.kind
        ));
    }
    let full = replace.document.ok_or("replace event lacks full document")?;
    if field_i64(&full, "v")? != 2 {
        return Err(format!("replace event carries stale document: {full:?}"));
    }
    if delete.kind != ChangeKind::Delete || delete.id != Some(id) {
        return Err(format!("unexpected delete event: {delete:?}"));
    }
    Ok(())
}

async fn filter_excludes_non_matching_documents<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut stream = store
        .watch(COLL, Filter::gte("stamp", 0))
        .await
        .map_err(|e| format!("watch: {e}"))?;

    let (_, hidden) = make_doc(json!({"stamp": -1}));
    let (_, shown) = make_doc(json!({"stamp": 0}));
    store
        .insert(COLL, hidden)
        .await
        .map_err(|e| format!("insert hidden: {e}"))?;
    store
        .insert(COLL, shown)
        .await
        .map_err(|e| format!("insert shown: {e}"))?;

    let event = expect_next(&mut stream).await?;
    let doc = event.document.ok_or("insert event lacks document")?;
    if field_i64(&doc, "stamp")? != 0 {
        return Err(format!("filtered document leaked through: {doc:?}"));
    }
    if let Some(extra) = stream.try_next() {
        return Err(format!("unexpected extra event: {extra:?}"));
    }
    Ok(())
}

async fn missing_field_clause_passes_deletes<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let (id, doc) = make_doc(json!({"stamp": -1}));
    store
        .insert(COLL, doc)
        .await
        .map_err(|e| format!("insert: {e}"))?;

    let filter = Filter::Or(vec![
        Filter::gte("stamp", 0),
        Filter::exists("stamp", false),
    ]);
    let mut stream = store
        .watch(COLL, filter)
        .await
        .map_err(|e| format!("watch: {e}"))?;
    store
        .delete_by_id(COLL, id)
        .await
        .map_err(|e| format!("delete: {e}"))?;

    let event = expect_next(&mut stream).await?;
    if event.kind != ChangeKind::Delete {
        return Err(format!("expected delete event, got {event:?}"));
    }
    Ok(())
}

async fn closed_stream_yields_none<S, F, Fut>(factory: &F) -> Result<(), String>
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let store = factory().await;
    let mut stream = store
        .watch(COLL, Filter::All)
        .await
        .map_err(|e| format!("watch: {e}"))?;
    stream.close();

    let (_, doc) = make_doc(json!({}));
    store
        .insert(COLL, doc)
        .await
        .map_err(|e| format!("insert: {e}"))?;
    if stream.next().await.is_some() {
        return Err("closed stream still delivered an event".to_string());
    }
    Ok(())
}
