//! In-memory [`DocumentStore`] backend.
//!
//! Each collection is a `BTreeMap` keyed by [`DocId`] behind one tokio mutex.
//! Every operation, including `find_and_update_atomic`, runs under that
//! mutex, which is what makes the find-and-update atomic. Change events are
//! published on a broadcast channel while the mutex is held, so the feed
//! order matches the commit order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};

use crate::document::{doc_id, DocId, Document, Filter, IndexSpec, Sort, Update, ID_FIELD};
use crate::error::StoreError;
use crate::traits::DocumentStore;
use crate::watch::{ChangeEvent, ChangeKind, ChangeStream};

/// Events buffered per collection before slow watchers start lagging.
const DEFAULT_FEED_CAPACITY: usize = 1024;

#[derive(Debug)]
struct Collection {
    name: String,
    state: Mutex<CollectionState>,
    feed: broadcast::Sender<ChangeEvent>,
}

#[derive(Debug, Default)]
struct CollectionState {
    docs: BTreeMap<DocId, Document>,
    indexes: Vec<IndexSpec>,
    /// Set by the first write or index creation; a watch alone does not
    /// bring a collection into existence.
    materialized: bool,
}

impl Collection {
    fn new(name: &str, capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity);
        Collection {
            name: name.to_string(),
            state: Mutex::new(CollectionState::default()),
            feed,
        }
    }

    fn publish(&self, kind: ChangeKind, id: Option<DocId>, document: Option<Document>) {
        // No subscribers is not an error.
        let _ = self.feed.send(ChangeEvent { kind, id, document });
    }

    fn check_unique(
        &self,
        state: &CollectionState,
        candidate: &Document,
        skip: Option<DocId>,
    ) -> Result<(), StoreError> {
        for index in state.indexes.iter().filter(|i| i.unique) {
            let Some(value) = candidate.get(&index.field) else {
                continue;
            };
            let clash = state
                .docs
                .iter()
                .any(|(id, other)| Some(*id) != skip && other.get(&index.field) == Some(value));
            if clash {
                return Err(StoreError::DuplicateKey {
                    collection: self.name.clone(),
                    field: index.field.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// A [`DocumentStore`] held entirely in process memory.
#[derive(Debug)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    feed_capacity: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    /// Create a store whose change feeds buffer `capacity` events per
    /// collection.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        MemoryStore {
            collections: RwLock::new(HashMap::new()),
            feed_capacity: capacity.max(1),
        }
    }

    /// Number of documents currently in `collection`.
    pub async fn document_count(&self, collection: &str) -> usize {
        match self.existing(collection).await {
            Some(coll) => coll.state.lock().await.docs.len(),
            None => 0,
        }
    }

    async fn existing(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().await.get(name).cloned()
    }

    async fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(coll) = self.existing(name).await {
            return coll;
        }
        let mut map = self.collections.write().await;
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(Collection::new(name, self.feed_capacity)))
            .clone()
    }
}

fn matching<'a>(state: &'a CollectionState, filter: &Filter, sort: &Sort) -> Vec<&'a Document> {
    let mut hits: Vec<&Document> = state.docs.values().filter(|d| filter.matches(d)).collect();
    hits.sort_by(|a, b| sort.compare(a, b));
    hits
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, doc: Document) -> Result<(), StoreError> {
        let id = doc_id(&doc).ok_or_else(|| StoreError::InvalidDocument {
            collection: collection.to_string(),
            reason: format!("missing or malformed {ID_FIELD}"),
        })?;

        let coll = self.collection(collection).await;
        let mut state = coll.state.lock().await;
        if state.docs.contains_key(&id) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                field: ID_FIELD.to_string(),
                value: id.to_hex(),
            });
        }
        coll.check_unique(&state, &doc, None)?;

        state.docs.insert(id, doc.clone());
        state.materialized = true;
        coll.publish(ChangeKind::Insert, Some(id), Some(doc));
        tracing::trace!(collection, %id, "inserted document");
        Ok(())
    }

    async fn replace_by_id(
        &self,
        collection: &str,
        id: DocId,
        mut fields: Document,
    ) -> Result<(), StoreError> {
        fields.remove(ID_FIELD);

        let not_found = || StoreError::NotFound {
            collection: collection.to_string(),
            id,
        };
        let coll = self.existing(collection).await.ok_or_else(not_found)?;
        let mut state = coll.state.lock().await;
        let mut updated = state.docs.get(&id).cloned().ok_or_else(not_found)?;
        updated.extend(fields);
        coll.check_unique(&state, &updated, Some(id))?;

        state.docs.insert(id, updated.clone());
        coll.publish(ChangeKind::Replace, Some(id), Some(updated));
        Ok(())
    }

    async fn delete_by_id(&self, collection: &str, id: DocId) -> Result<bool, StoreError> {
        let Some(coll) = self.existing(collection).await else {
            return Ok(false);
        };
        let mut state = coll.state.lock().await;
        if state.docs.remove(&id).is_none() {
            return Ok(false);
        }
        coll.publish(ChangeKind::Delete, Some(id), None);
        Ok(true)
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
    ) -> Result<Option<Document>, StoreError> {
        let Some(coll) = self.existing(collection).await else {
            return Ok(None);
        };
        let state = coll.state.lock().await;
        Ok(matching(&state, filter, sort).first().map(|d| (*d).clone()))
    }

    async fn find_many(
        &self,
        collection: &str,
        filter: &Filter,
        sort: &Sort,
    ) -> Result<Vec<Document>, StoreError> {
        let Some(coll) = self.existing(collection).await else {
            return Ok(Vec::new());
        };
        let state = coll.state.lock().await;
        Ok(matching(&state, filter, sort)
            .into_iter()
            .cloned()
            .collect())
    }

    async fn find_and_update_atomic(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        sort: &Sort,
    ) -> Result<Option<Document>, StoreError> {
        let Some(coll) = self.existing(collection).await else {
            return Ok(None);
        };
        let mut state = coll.state.lock().await;
        let Some(before) = matching(&state, filter, sort).first().map(|d| (*d).clone()) else {
            return Ok(None);
        };
        let id = doc_id(&before).ok_or_else(|| StoreError::InvalidDocument {
            collection: collection.to_string(),
            reason: format!("stored document lost its {ID_FIELD}"),
        })?;

        let mut after = before.clone();
        update.apply(&mut after);
        after.insert(ID_FIELD.to_string(), before[ID_FIELD].clone());
        coll.check_unique(&state, &after, Some(id))?;

        state.docs.insert(id, after.clone());
        coll.publish(ChangeKind::Replace, Some(id), Some(after));
        Ok(Some(before))
    }

    async fn watch(&self, collection: &str, filter: Filter) -> Result<ChangeStream, StoreError> {
        let coll = self.collection(collection).await;
        Ok(ChangeStream::new(collection, filter, coll.feed.subscribe()))
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> Result<(), StoreError> {
        let coll = self.collection(collection).await;
        let mut state = coll.state.lock().await;
        state.materialized = true;
        if state.indexes.iter().any(|i| i.name == index.name) {
            return Ok(());
        }
        if index.unique {
            let mut seen = Vec::new();
            for doc in state.docs.values() {
                if let Some(value) = doc.get(&index.field) {
                    if seen.contains(&value) {
                        return Err(StoreError::DuplicateKey {
                            collection: collection.to_string(),
                            field: index.field.clone(),
                            value: value.to_string(),
                        });
                    }
                    seen.push(value);
                }
            }
        }
        state.indexes.push(index);
        Ok(())
    }

    async fn drop_indexes(&self, collection: &str) -> Result<(), StoreError> {
        if let Some(coll) = self.existing(collection).await {
            coll.state.lock().await.indexes.clear();
        }
        Ok(())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool, StoreError> {
        Ok(match self.existing(collection).await {
            Some(coll) => coll.state.lock().await.materialized,
            None => false,
        })
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StoreError> {
        let removed = self.collections.write().await.remove(collection);
        if let Some(coll) = removed {
            let mut state = coll.state.lock().await;
            state.docs.clear();
            state.indexes.clear();
            coll.publish(ChangeKind::Drop, None, None);
        }
        Ok(())
    }
}
