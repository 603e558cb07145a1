use std::cmp::Ordering;
use std::sync::Arc;

use aafs_store::{DocId, DocumentStore, Filter, IndexSpec, Sort};
use serde_json::Value;

use super::watch::RelayWatcher;
use super::{RelayItem, KIND, RELAY_STAMP_FROM_PEER};
use crate::error::{next_time, require_non_negative, CoreError};
use crate::record::{fields, from_document, to_document};

const RELAY_ID: &str = "relay_id";
const RELAY_TIME: &str = "relay_time";
const RELAY_STAMP: &str = "relay_stamp";
const DETAILS: &str = "details";

/// How a candidate item relates to the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Older than the stored item; rejected.
    Stale,
    /// Same version as the stored item; nothing to write.
    Identical,
    /// No item with this relay id exists; the candidate is new.
    Inserted,
    /// Newer than the stored item, or forced; replaces it in place.
    Updated,
}

impl RelayOutcome {
    /// Whether committing writes anything.
    pub fn is_accepted(self) -> bool {
        matches!(self, RelayOutcome::Inserted | RelayOutcome::Updated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RelayOutcome::Stale => "stale",
            RelayOutcome::Identical => "identical",
            RelayOutcome::Inserted => "inserted",
            RelayOutcome::Updated => "updated",
        }
    }
}

/// A candidate compared against the store, ready to commit.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayCheck {
    pub outcome: RelayOutcome,
    /// The item that would be written: the candidate with the stored id
    /// adopted and, under force, its time bumped past the stored one.
    pub item: RelayItem,
    /// The stored item at check time.
    pub existing: Option<RelayItem>,
}

/// Reads and writes relay items in one store collection.
///
/// [`RelaySync::check`] and [`RelaySync::commit`] are separate store calls.
/// Between them another writer may change the item, so a collection must
/// have a single writer or the caller must hold a lock across both. Two
/// racing inserts of one relay id are caught by the unique index: the loser
/// gets `StoreError::DuplicateKey`.
pub struct RelaySync<S> {
    store: Arc<S>,
    collection: String,
}

impl<S> Clone for RelaySync<S> {
    fn clone(&self) -> Self {
        RelaySync {
            store: Arc::clone(&self.store),
            collection: self.collection.clone(),
        }
    }
}

impl<S: DocumentStore> RelaySync<S> {
    pub fn new(store: Arc<S>, collection: impl Into<String>) -> Self {
        RelaySync {
            store,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn ensure_indexes(&self) -> Result<(), CoreError> {
        self.store
            .create_index(&self.collection, IndexSpec::unique(RELAY_ID))
            .await?;
        self.store
            .create_index(&self.collection, IndexSpec::new(RELAY_TIME))
            .await?;
        Ok(())
    }

    /// Compare `candidate` with the stored item of the same relay id. No
    /// side effects.
    pub async fn check(&self, candidate: RelayItem, force: bool) -> Result<RelayCheck, CoreError> {
        candidate.parsed_id()?;
        require_non_negative("relay_time", candidate.relay_time)?;

        let existing = self.fetch(&candidate.relay_id).await?;
        let mut item = candidate;
        let outcome = match &existing {
            None => RelayOutcome::Inserted,
            Some(stored) => {
                item.id = stored.id;
                if force {
                    if item.relay_time <= stored.relay_time {
                        item.relay_time = next_time("relay_time", stored.relay_time)?;
                    }
                    RelayOutcome::Updated
                } else {
                    match item.compare(stored) {
                        Ordering::Less => RelayOutcome::Stale,
                        Ordering::Equal => RelayOutcome::Identical,
                        Ordering::Greater => RelayOutcome::Updated,
                    }
                }
            }
        };
        Ok(RelayCheck {
            outcome,
            item,
            existing,
        })
    }

    /// Write a checked item under `origin_stamp`. Returns the stored item,
    /// or `None` when the check was not accepted and nothing was written.
    pub async fn commit(
        &self,
        check: RelayCheck,
        origin_stamp: i64,
    ) -> Result<Option<RelayItem>, CoreError> {
        let mut item = check.item;
        item.relay_stamp = origin_stamp;
        match check.outcome {
            RelayOutcome::Stale | RelayOutcome::Identical => return Ok(None),
            RelayOutcome::Inserted => {
                self.store
                    .insert(&self.collection, to_document(&item)?)
                    .await?;
            }
            RelayOutcome::Updated => {
                let update = fields([
                    (RELAY_TIME, Value::from(item.relay_time)),
                    (RELAY_STAMP, Value::from(item.relay_stamp)),
                    (DETAILS, item.details.clone()),
                ]);
                self.store
                    .replace_by_id(&self.collection, item.id, update)
                    .await?;
            }
        }
        Ok(Some(item))
    }

    /// Check and commit in one call.
    pub async fn submit(
        &self,
        candidate: RelayItem,
        force: bool,
        origin_stamp: i64,
    ) -> Result<RelayOutcome, CoreError> {
        let check = self.check(candidate, force).await?;
        let outcome = check.outcome;
        let relay_id = check.item.relay_id.clone();
        let relay_time = check.item.relay_time;
        self.commit(check, origin_stamp).await?;
        tracing::info!(
            %relay_id,
            relay_time,
            relay_stamp = origin_stamp,
            force,
            outcome = outcome.as_str(),
            "relay submit"
        );
        Ok(outcome)
    }

    /// Apply an item received from the peer. Never forced, and stamped so
    /// the local watcher does not echo it back.
    pub async fn apply_from_peer(&self, item: RelayItem) -> Result<RelayOutcome, CoreError> {
        self.submit(item, false, RELAY_STAMP_FROM_PEER).await
    }

    pub async fn fetch(&self, relay_id: &str) -> Result<Option<RelayItem>, CoreError> {
        self.find_one(Filter::eq(RELAY_ID, relay_id)).await
    }

    pub async fn fetch_by_id(&self, id: DocId) -> Result<Option<RelayItem>, CoreError> {
        self.find_one(Filter::id(id)).await
    }

    /// Items with `relay_time` in the inclusive bounds whose relay id starts
    /// with `prefix`, earliest first.
    pub async fn get_range(
        &self,
        time_lo: Option<i64>,
        time_hi: Option<i64>,
        prefix: Option<&str>,
    ) -> Result<Vec<RelayItem>, CoreError> {
        let mut filter = Filter::All;
        if let Some(lo) = time_lo {
            filter = filter.and(Filter::gte(RELAY_TIME, lo));
        }
        if let Some(hi) = time_hi {
            filter = filter.and(Filter::lte(RELAY_TIME, hi));
        }
        if let Some(prefix) = prefix {
            filter = filter.and(Filter::prefix(RELAY_ID, prefix));
        }
        self.find_many(&filter).await
    }

    pub async fn delete(&self, item: &RelayItem) -> Result<bool, CoreError> {
        let removed = self.store.delete_by_id(&self.collection, item.id).await?;
        tracing::debug!(relay_id = %item.relay_id, removed, "deleted relay item");
        Ok(removed)
    }

    /// Insert an item exactly as given, stamp included.
    pub async fn store_as_is(&self, item: &RelayItem) -> Result<(), CoreError> {
        self.store
            .insert(&self.collection, to_document(item)?)
            .await?;
        Ok(())
    }

    pub async fn all(&self) -> Result<Vec<RelayItem>, CoreError> {
        self.find_many(&Filter::All).await
    }

    /// Watch local changes stamped `min_stamp` or higher. Deletes and drops
    /// carry no stamp and always pass.
    pub async fn watch(&self, min_stamp: i64) -> Result<RelayWatcher, CoreError> {
        let filter = Filter::Or(vec![
            Filter::gte(RELAY_STAMP, min_stamp),
            Filter::exists(RELAY_STAMP, false),
        ]);
        let stream = self.store.watch(&self.collection, filter).await?;
        tracing::debug!(collection = %self.collection, min_stamp, "opened relay watcher");
        Ok(RelayWatcher::new(stream))
    }

    async fn find_one(&self, filter: Filter) -> Result<Option<RelayItem>, CoreError> {
        self.store
            .find_one(&self.collection, &filter, &Sort::Natural)
            .await?
            .map(|doc| from_document(KIND, doc))
            .transpose()
    }

    async fn find_many(&self, filter: &Filter) -> Result<Vec<RelayItem>, CoreError> {
        let docs = self
            .store
            .find_many(&self.collection, filter, &Sort::asc(RELAY_TIME))
            .await?;
        docs.into_iter().map(|doc| from_document(KIND, doc)).collect()
    }
}
