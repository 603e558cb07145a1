use async_trait::async_trait;

use crate::document::{DocId, Document, Filter, IndexSpec, Sort, Update};
use crate::error::StoreError;
use crate::watch::ChangeStream;

/// The document-store contract required by the AAFS coordination core.
///
/// A `DocumentStore` holds named collections of JSON documents, each keyed by
/// the [`DocId`] in its `_id` field. Collections are created implicitly by
/// the first write.
///
/// ## Atomicity
///
/// Only [`find_and_update_atomic`](DocumentStore::find_and_update_atomic)
/// is required to be atomic: selecting the first matching document and
/// applying the update must be one indivisible step, so that of any number
/// of concurrent callers exactly one observes a given before-image. Every
/// other operation is a single-document write or a read with no isolation
/// guarantee across calls.
///
/// ## Change feed
///
/// [`watch`](DocumentStore::watch) returns a stream of every insert,
/// replace and delete committed to the collection after the call returns.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so they can be shared
/// across tokio tasks behind an `Arc`.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    // ── Writes ───────────────────────────────────────────────────────────────

    /// Insert a new document. The document must carry a valid `_id`.
    ///
    /// Returns `Err(StoreError::DuplicateKey)` if the id or a unique index
    /// value is already present.
    async fn insert(&self, collection: &str, doc: Document) -> Result<(), StoreError>;

    /// Overwrite the given fields of the document with id `id`, leaving its
    /// other fields and its id untouched.
    ///
    /// Returns `Err(StoreError::NotFound)` if no such document exists.
    async fn replace_by_id(
        &self,
        collection: &str,
        id: DocId,
        fields: Document,
    ) -> Result<(), StoreError>;

    /// Delete the document with id `id`. Returns whether a document was removed.
    async fn delete_by_id(&self, collection: &str, id: DocId) -> Result<bool, StoreError>;

    // ── Queries ──────────────────────────────────────────────────────────────

    /// First document matching `filter` under `sort`.
    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
    ) -> Result<Option<Document>, StoreError>;

    /// All documents matching `filter`, ordered by `sort`.
    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
    ) -> Result<Vec<Document>, StoreError>;

    /// Atomically select the first document matching `filter` under `sort`,
    /// apply `update` to it, and return the document as it was *before* the
    /// update. Returns `None` without writing if nothing matches.
    async fn find_and_update_atomic(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        sort: &Sort,
    ) -> Result<Option<Document>, StoreError>;

    // ── Change feed ──────────────────────────────────────────────────────────

    /// Subscribe to the collection's change feed, filtered by `filter`.
    async fn watch(&self, collection: &str, filter: Filter) -> Result<ChangeStream, StoreError>;

    // ── Administration ───────────────────────────────────────────────────────

    /// Create an index. Creating an index that already exists is a no-op;
    /// creating a unique index over existing duplicates fails with
    /// `StoreError::DuplicateKey`.
    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<(), StoreError>;

    /// Drop every index of the collection.
    async fn drop_indexes(&self, collection: &str) -> Result<(), StoreError>;

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError>;

    /// Drop the collection, its documents and its indexes.
    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError>;
}
