//! Conformance test suite for `DocumentStore` implementations.
//!
//! This module provides a backend-agnostic test suite that any
//! `DocumentStore` implementation can run to verify it satisfies the
//! contract the coordination core relies on. The suite covers:
//!
//! - **CRUD**: insert, field replacement, delete, duplicate ids
//! - **Query**: filters, sort order, id tie-breaking
//! - **Atomic**: find-and-update before-images and exclusive claims under
//!   concurrent callers
//! - **Watch**: change-feed delivery, filtering, and pass-through of deletes
//! - **Index**: unique-key enforcement and collection administration
//!
//! # Usage
//!
//! Backend crates call [`run_conformance_suite`] with a factory function that
//! creates a fresh, empty store for each test:
//!
//! ```ignore
//! use aafs_store::conformance::run_conformance_suite;
//!
//! #[tokio::test]
//! async fn mongo_conformance() {
//!     let report = run_conformance_suite(|| async {
//!         create_test_mongo_store().await
//!     }).await;
//!     assert!(report.failed == 0, "{report}");
//! }
//! ```

mod atomic;
mod crud;
mod index;
mod query;
mod watch;

use std::fmt;
use std::future::Future;

use serde_json::Value;

use crate::{DocId, Document, DocumentStore};

/// Collection name used by every conformance test.
const COLL: &str = "conformance";

/// Result of a single conformance test.
#[derive(Debug, Clone)]
pub struct TestResult {
    /// Test category (e.g. "crud", "atomic", "watch").
    pub category: String,
    /// Test name (e.g. "insert_then_find_by_id").
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Error message if the test failed.
    pub message: Option<String>,
}

impl TestResult {
    fn pass(category: &str, name: &str) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: true,
            message: None,
        }
    }

    fn fail(category: &str, name: &str, msg: String) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            passed: false,
            message: Some(msg),
        }
    }

    fn from_result(category: &str, name: &str, result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::pass(category, name),
            Err(msg) => Self::fail(category, name, msg),
        }
    }
}

/// Aggregated report from a full conformance suite run.
#[derive(Debug, Clone)]
pub struct ConformanceReport {
    pub results: Vec<TestResult>,
    pub passed: usize,
    pub failed: usize,
    pub total: usize,
}

impl fmt::Display for ConformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Conformance: {}/{} passed ({} failed)",
            self.passed, self.total, self.failed
        )?;
        for r in &self.results {
            if !r.passed {
                writeln!(
                    f,
                    "  FAIL [{}/{}]: {}",
                    r.category,
                    r.name,
                    r.message.as_deref().unwrap_or("(no message)")
                )?;
            }
        }
        Ok(())
    }
}

/// Run the full conformance suite against a store backend.
///
/// The `factory` function is called once per test to create a fresh, empty
/// store instance, ensuring test isolation.
pub async fn run_conformance_suite<S, F, Fut>(factory: F) -> ConformanceReport
where
    S: DocumentStore,
    F: Fn() -> Fut,
    Fut: Future<Output = S>,
{
    let mut results = Vec::new();

    results.extend(crud::run_crud_tests(&factory).await);
    results.extend(query::run_query_tests(&factory).await);
    results.extend(atomic::run_atomic_tests(&factory).await);
    results.extend(watch::run_watch_tests(&factory).await);
    results.extend(index::run_index_tests(&factory).await);

    let passed = results.iter().filter(|r| r.passed).count();
    let total = results.len();

    ConformanceReport {
        results,
        passed,
        failed: total - passed,
        total,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Build a document with a fresh id from a JSON object literal.
fn make_doc(fields: Value) -> (DocId, Document) {
    let id = DocId::new();
    let mut doc = match fields {
        Value::Object(map) => map,
        _ => Document::new(),
    };
    doc.insert(crate::ID_FIELD.to_string(), Value::String(id.to_hex()));
    (id, doc)
}

fn field_i64(doc: &Document, field: &str) -> Result<i64, String> {
    doc.get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| format!("field '{field}' missing or not an integer in {doc:?}"))
}
