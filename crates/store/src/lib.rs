//! Document-store contract for the AAFS coordination core.
//!
//! The task queue, alias resolver and relay synchronizer only need a small
//! set of operations from their backing store: inserts, filtered point and
//! range queries, an atomic find-and-update, and a change feed. This crate
//! defines that contract ([`DocumentStore`]), the query model it speaks
//! ([`Filter`], [`Sort`], [`Update`]), an in-memory backend
//! ([`MemoryStore`]), and a conformance suite other backends can run.

pub mod conformance;
mod document;
mod error;
mod memory;
mod traits;
mod watch;

pub use document::{
    compare_values, DocId, Document, Filter, IndexSpec, ParseDocIdError, Sort, Update, ID_FIELD,
};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use traits::DocumentStore;
pub use watch::{ChangeEvent, ChangeKind, ChangeStream};
