// src/database.rs
// Database handle: one directory of collection files, or an in-memory store

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::Result;
use crate::storage::file_storage::validate_collection_name;
use crate::storage::{
    CollectionIndexEntry, FileStorage, IndexFooter, MemoryStorage, StorageAdapter,
};
use crate::transaction::{Transaction, TransactionManager};
use crate::{log_debug, log_info};

enum Backend {
    File(Arc<FileStorage>),
    Memory {
        storage: Arc<MemoryStorage>,
        index: RwLock<IndexFooter>,
    },
}

/// A named database
///
/// File-backed databases live in `config.root_dir()/<name>`, one
/// `<collection>.<extension>` file per collection.
pub struct Database {
    name: String,
    backend: Backend,
    collections: RwLock<BTreeSet<String>>,
}

impl Database {
    /// Open or create a file-backed database and register the collection
    /// files already present in its directory
    pub fn open(name: &str, config: StoreConfig) -> Result<Self> {
        validate_collection_name(name)?;
        let dir = config.database_dir(name);
        fs::create_dir_all(&dir)?;

        let storage = Arc::new(FileStorage::new(config.scoped_to(dir)));
        let existing: BTreeSet<String> = storage.list_collections()?.into_iter().collect();
        log_info!(
            "Opened database '{}' at {} ({} collections)",
            name,
            storage.root_dir().display(),
            existing.len()
        );

        Ok(Database {
            name: name.to_string(),
            backend: Backend::File(storage),
            collections: RwLock::new(existing),
        })
    }

    /// Database backed by the in-memory adapter
    pub fn in_memory(name: &str) -> Self {
        Database {
            name: name.to_string(),
            backend: Backend::Memory {
                storage: Arc::new(MemoryStorage::new()),
                index: RwLock::new(IndexFooter::default()),
            },
            collections: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory of a file-backed database
    pub fn path(&self) -> Option<&Path> {
        match &self.backend {
            Backend::File(storage) => Some(storage.root_dir()),
            Backend::Memory { .. } => None,
        }
    }

    pub fn storage(&self) -> Arc<dyn StorageAdapter> {
        match &self.backend {
            Backend::File(storage) => Arc::clone(storage) as Arc<dyn StorageAdapter>,
            Backend::Memory { storage, .. } => Arc::clone(storage) as Arc<dyn StorageAdapter>,
        }
    }

    /// Create the collection's backing storage (idempotent) and register it
    pub fn create_collection(&self, name: &str) -> Result<Collection> {
        validate_collection_name(name)?;
        self.storage().ensure_collection(name)?;
        if self.collections.write().insert(name.to_string()) {
            log_debug!("Registered collection '{}' in '{}'", name, self.name);
        }
        Ok(Collection::new(name, self.storage()))
    }

    /// Handle to a collection; storage is created lazily on first write
    pub fn collection(&self, name: &str) -> Result<Collection> {
        validate_collection_name(name)?;
        self.collections.write().insert(name.to_string());
        Ok(Collection::new(name, self.storage()))
    }

    /// Collections on disk plus registered ones, sorted and deduplicated
    pub fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: BTreeSet<String> = self.storage().list_collections()?.into_iter().collect();
        names.extend(self.collections.read().iter().cloned());
        Ok(names.into_iter().collect())
    }

    /// Record per-collection document counts and sizes.
    /// File-backed databases append the footer to their index file.
    pub fn save_index(&self) -> Result<IndexFooter> {
        match &self.backend {
            Backend::File(storage) => storage.save_index(),
            Backend::Memory { storage, index } => {
                let mut collections = BTreeMap::new();
                for name in self.list_collections()? {
                    let documents = storage.count(&name, &Document::new())?;
                    collections.insert(name, CollectionIndexEntry { documents, bytes: 0 });
                }
                let footer = IndexFooter::new(collections);
                *index.write() = footer.clone();
                Ok(footer)
            }
        }
    }

    /// Last saved index, or the version-1 default
    pub fn cached_index(&self) -> Result<IndexFooter> {
        match &self.backend {
            Backend::File(storage) => storage.cached_index(),
            Backend::Memory { index, .. } => Ok(index.read().clone()),
        }
    }

    /// Best-effort transaction over several collections
    pub fn transaction<T, F>(&self, collections: &[&str], operations: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        for name in collections {
            validate_collection_name(name)?;
        }
        TransactionManager::new(self.storage()).run(collections, operations)
    }
}
