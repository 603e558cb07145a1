//! Alias resolver: stable timeline ids over churning Comcat ids.
//!
//! Two Comcat ids are siblings if they were ever bound to the same timeline;
//! the transitive closure of that relation partitions ids into families.
//! Each family is stored as an append-only chain of immutable
//! [`AliasFamily`] snapshots. The active snapshot for an id is the one with
//! the greatest `family_time` among those containing it, found by a single
//! descending query rather than any in-process cache.

mod assignment;
mod family;
mod resolver;

pub use assignment::{AliasAssignment, AliasAssignmentList};
pub use family::AliasFamily;
pub use resolver::{AliasLookup, AliasResolver, ComcatObservation, ReconcileOutcome};

pub(crate) const KIND: &str = "alias_family";

/// Prefix of timeline ids minted for newly seen events.
pub const TIMELINE_ID_PREFIX: &str = "ccid_";
