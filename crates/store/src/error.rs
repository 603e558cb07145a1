use crate::document::DocId;

/// All errors that can be returned by a DocumentStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique index rejected the write: another document already holds
    /// the same value for the indexed field.
    #[error("duplicate key in {collection}: {field} = {value}")]
    DuplicateKey {
        collection: String,
        field: String,
        value: String,
    },

    /// No document with the given id exists in the collection.
    #[error("document not found in {collection}: {id}")]
    NotFound { collection: String, id: DocId },

    /// The document is missing its id or is otherwise unusable.
    #[error("invalid document in {collection}: {reason}")]
    InvalidDocument { collection: String, reason: String },

    /// The change-feed consumer fell behind and events were discarded.
    #[error("change feed on {collection} lagged, {skipped} events dropped")]
    FeedLagged { collection: String, skipped: u64 },

    /// A backend-specific storage error (connection, serialization, etc.).
    #[error("store backend error: {0}")]
    Backend(String),
}
