//! The three services over one shared store.

use std::sync::Arc;

use aafs_store::DocumentStore;

use crate::alias::AliasResolver;
use crate::backup::BackupRecord;
use crate::config::CollectionNames;
use crate::error::CoreError;
use crate::relay::RelaySync;
use crate::task::TaskQueue;

pub struct Coordinator<S> {
    pub tasks: TaskQueue<S>,
    pub aliases: AliasResolver<S>,
    pub relays: RelaySync<S>,
}

impl<S> Clone for Coordinator<S> {
    fn clone(&self) -> Self {
        Coordinator {
            tasks: self.tasks.clone(),
            aliases: self.aliases.clone(),
            relays: self.relays.clone(),
        }
    }
}

impl<S: DocumentStore> Coordinator<S> {
    pub fn new(store: Arc<S>, names: &CollectionNames) -> Self {
        Coordinator {
            tasks: TaskQueue::new(Arc::clone(&store), names.tasks.clone()),
            aliases: AliasResolver::new(Arc::clone(&store), names.alias_families.clone()),
            relays: RelaySync::new(store, names.relay_items.clone()),
        }
    }

    pub async fn ensure_indexes(&self) -> Result<(), CoreError> {
        self.tasks.ensure_indexes().await?;
        self.aliases.ensure_indexes().await?;
        self.relays.ensure_indexes().await?;
        Ok(())
    }

    /// Every record of all three collections: tasks, then alias families,
    /// then relay items.
    pub async fn export_all(&self) -> Result<Vec<BackupRecord>, CoreError> {
        let mut records: Vec<BackupRecord> = Vec::new();
        records.extend(self.tasks.all().await?.into_iter().map(BackupRecord::Task));
        records.extend(
            self.aliases
                .all()
                .await?
                .into_iter()
                .map(BackupRecord::AliasFamily),
        );
        records.extend(
            self.relays
                .all()
                .await?
                .into_iter()
                .map(BackupRecord::RelayItem),
        );
        tracing::info!(records = records.len(), "exported all records");
        Ok(records)
    }

    /// Store one record exactly as given.
    pub async fn import_record(&self, record: &BackupRecord) -> Result<(), CoreError> {
        match record {
            BackupRecord::Task(task) => self.tasks.store_as_is(task).await,
            BackupRecord::AliasFamily(family) => self.aliases.store_as_is(family).await,
            BackupRecord::RelayItem(item) => self.relays.store_as_is(item).await,
        }
    }

    /// Import records in order, stopping at the first failure. Returns how
    /// many were stored.
    pub async fn import_all<'a, I>(&self, records: I) -> Result<usize, CoreError>
    where
        I: IntoIterator<Item = &'a BackupRecord>,
    {
        let mut count = 0;
        for record in records {
            self.import_record(record).await?;
            count += 1;
        }
        tracing::info!(records = count, "imported records");
        Ok(count)
    }
}
