//! The database file: a JSON-lines backup loaded into a `MemoryStore` for
//! the duration of one command and written back if the command changed it.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aafs_core::{read_backup, write_backup, AafsConfig, Coordinator};
use aafs_store::MemoryStore;

pub(crate) struct Database {
    path: PathBuf,
    pub(crate) coordinator: Coordinator<MemoryStore>,
}

impl Database {
    pub(crate) async fn open(path: &Path, config: &AafsConfig) -> Result<Self, String> {
        let store = Arc::new(MemoryStore::new());
        let coordinator = Coordinator::new(store, &config.collections);
        coordinator
            .ensure_indexes()
            .await
            .map_err(|e| e.to_string())?;

        if path.exists() {
            let file = File::open(path)
                .map_err(|e| format!("could not open '{}': {}", path.display(), e))?;
            let records = read_backup(BufReader::new(file))
                .map_err(|e| format!("could not read '{}': {}", path.display(), e))?;
            let loaded = coordinator
                .import_all(&records)
                .await
                .map_err(|e| format!("could not load '{}': {}", path.display(), e))?;
            tracing::debug!(path = %path.display(), records = loaded, "loaded database");
        }

        Ok(Database {
            path: path.to_path_buf(),
            coordinator,
        })
    }

    /// Replace the database file with the current contents. The new file is
    /// written next to the old one and renamed over it.
    pub(crate) async fn save(&self) -> Result<(), String> {
        let records = self
            .coordinator
            .export_all()
            .await
            .map_err(|e| e.to_string())?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| format!("could not create file in '{}': {}", dir.display(), e))?;
        write_backup(BufWriter::new(tmp.as_file()), &records)
            .map_err(|e| format!("could not write '{}': {}", self.path.display(), e))?;
        tmp.persist(&self.path)
            .map_err(|e| format!("could not replace '{}': {}", self.path.display(), e))?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "saved database");
        Ok(())
    }
}
