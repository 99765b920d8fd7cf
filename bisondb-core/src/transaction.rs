// src/transaction.rs
//! Best-effort transactions over the adapter contract
//!
//! `run` snapshots the live documents of every listed collection, hands the
//! closure a restricted view, and on failure restores each snapshot by
//! deleting everything and re-inserting the saved documents. There is no
//! isolation: concurrent readers see intermediate state, and a rollback that
//! fails halfway leaves earlier collections restored and later ones not.
//!
//! ```text
//! snapshot(c1..cn) → begin hook → operations(tx)
//!                                   ├── Ok  → commit hook
//!                                   └── Err → restore(c1..cn) → rollback hook → Err
//! ```

use std::sync::Arc;

use crate::document::Document;
use crate::error::{BisonError, Result};
use crate::query::parse_filter;
use crate::storage::{DeleteOptions, DeleteResult, StorageAdapter, UpdateOptions, UpdateResult};
use crate::update::parse_update;
use crate::value::Value;
use crate::{log_debug, log_error};

/// Runs transactional blocks against one adapter
pub struct TransactionManager {
    storage: Arc<dyn StorageAdapter>,
}

struct Snapshot {
    collection: String,
    documents: Vec<Document>,
}

impl TransactionManager {
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        TransactionManager { storage }
    }

    /// Run `operations` with access to `collections` only.
    ///
    /// On error every collection is restored to its snapshot and the
    /// original error is returned.
    pub fn run<T, F>(&self, collections: &[&str], operations: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        // No hook runs until every snapshot is taken
        let mut snapshots = Vec::with_capacity(collections.len());
        for &name in collections {
            let documents = self.storage.find(name, &Document::new(), None)?;
            snapshots.push(Snapshot {
                collection: name.to_string(),
                documents,
            });
        }

        self.storage.begin_transaction()?;

        let tx = Transaction {
            storage: self.storage.as_ref(),
            collections: collections.iter().map(|name| name.to_string()).collect(),
        };

        match operations(&tx) {
            Ok(value) => {
                self.storage.commit_transaction()?;
                Ok(value)
            }
            Err(err) => {
                log_debug!("Transaction failed, restoring {} collections: {}", snapshots.len(), err);
                self.restore(snapshots);
                if let Err(hook_err) = self.storage.rollback_transaction() {
                    log_error!("Rollback hook failed: {}", hook_err);
                }
                Err(err)
            }
        }
    }

    fn restore(&self, snapshots: Vec<Snapshot>) {
        for snapshot in snapshots {
            if let Err(err) = self.restore_one(&snapshot.collection, snapshot.documents) {
                log_error!(
                    "Failed to restore collection '{}' after transaction error: {}",
                    snapshot.collection,
                    err
                );
            }
        }
    }

    fn restore_one(&self, collection: &str, documents: Vec<Document>) -> Result<()> {
        self.storage.delete_many(
            collection,
            &Document::new(),
            &DeleteOptions::with_auto_compact(true),
        )?;
        if !documents.is_empty() {
            self.storage.write_many(collection, documents)?;
        }
        Ok(())
    }
}

/// View handed to a transactional block
pub struct Transaction<'a> {
    storage: &'a dyn StorageAdapter,
    collections: Vec<String>,
}

impl<'a> Transaction<'a> {
    /// Handle for one of the listed collections
    pub fn collection(&self, name: &str) -> Result<TransactionCollection<'_>> {
        let name = self
            .collections
            .iter()
            .find(|listed| listed.as_str() == name)
            .ok_or_else(|| BisonError::CollectionNotFound(name.to_string()))?;
        Ok(TransactionCollection {
            storage: self.storage,
            name,
        })
    }
}

/// Restricted collection view: insert, update_one, delete_one
pub struct TransactionCollection<'a> {
    storage: &'a dyn StorageAdapter,
    name: &'a str,
}

impl TransactionCollection<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn insert(&self, document: Document) -> Result<Value> {
        self.storage.write(self.name, document)
    }

    pub fn update_one(
        &self,
        filter: &serde_json::Value,
        update: &serde_json::Value,
    ) -> Result<UpdateResult> {
        let filter = parse_filter(filter)?;
        let update = parse_update(update)?;
        self.storage
            .update_one(self.name, &filter, &update, &UpdateOptions::default())
    }

    pub fn delete_one(&self, filter: &serde_json::Value) -> Result<DeleteResult> {
        let filter = parse_filter(filter)?;
        self.storage
            .delete_one(self.name, &filter, &DeleteOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(&value).unwrap()
    }

    fn seeded() -> Arc<dyn StorageAdapter> {
        let storage = MemoryStorage::new();
        storage
            .write_many(
                "accounts",
                vec![
                    doc(json!({"_id": "a", "balance": 10})),
                    doc(json!({"_id": "b", "balance": 5})),
                ],
            )
            .unwrap();
        Arc::new(storage)
    }

    fn all(storage: &Arc<dyn StorageAdapter>, name: &str) -> Vec<Document> {
        storage.find(name, &Document::new(), None).unwrap()
    }

    #[test]
    fn test_commit_keeps_changes() {
        let storage = seeded();
        let manager = TransactionManager::new(Arc::clone(&storage));
        let moved = manager
            .run(&["accounts"], |tx| {
                let accounts = tx.collection("accounts")?;
                accounts.update_one(&json!({"_id": "a"}), &json!({"$inc": {"balance": -3}}))?;
                accounts.update_one(&json!({"_id": "b"}), &json!({"$inc": {"balance": 3}}))?;
                Ok(3)
            })
            .unwrap();
        assert_eq!(moved, 3);
        assert_eq!(
            all(&storage, "accounts"),
            vec![
                doc(json!({"_id": "a", "balance": 7})),
                doc(json!({"_id": "b", "balance": 8}))
            ]
        );
    }

    #[test]
    fn test_failure_restores_snapshot() {
        let storage = seeded();
        let before = all(&storage, "accounts");
        let manager = TransactionManager::new(Arc::clone(&storage));

        let err = manager
            .run(&["accounts", "audit"], |tx| -> Result<()> {
                let accounts = tx.collection("accounts")?;
                accounts.insert(doc(json!({"_id": "c", "balance": 1})))?;
                accounts.delete_one(&json!({"_id": "a"}))?;
                tx.collection("audit")?.insert(doc(json!({"event": "x"})))?;
                Err(BisonError::Validation("boom".to_string()))
            })
            .unwrap_err();

        assert!(matches!(err, BisonError::Validation(ref m) if m == "boom"));
        assert_eq!(all(&storage, "accounts"), before);
        assert!(all(&storage, "audit").is_empty());
    }

    #[test]
    fn test_unlisted_collection() {
        let storage = seeded();
        let manager = TransactionManager::new(Arc::clone(&storage));
        let err = manager
            .run(&["accounts"], |tx| tx.collection("other").map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, BisonError::CollectionNotFound(ref name) if name == "other"));
        assert_eq!(all(&storage, "accounts").len(), 2);
    }

    /// Memory adapter that records hook calls and can fail snapshot reads
    #[derive(Default)]
    struct HookTracking {
        inner: MemoryStorage,
        fail_reads: bool,
        hooks: parking_lot::Mutex<Vec<&'static str>>,
    }

    impl StorageAdapter for HookTracking {
        fn write(&self, collection: &str, document: Document) -> Result<Value> {
            self.inner.write(collection, document)
        }
        fn find(
            &self,
            collection: &str,
            filter: &Document,
            projection: Option<&Document>,
        ) -> Result<Vec<Document>> {
            if self.fail_reads {
                return Err(BisonError::MalformedRecord("bad frame".to_string()));
            }
            self.inner.find(collection, filter, projection)
        }
        fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
            self.inner.count(collection, filter)
        }
        fn update_one(
            &self,
            collection: &str,
            filter: &Document,
            update: &Document,
            options: &UpdateOptions,
        ) -> Result<UpdateResult> {
            self.inner.update_one(collection, filter, update, options)
        }
        fn update_many(
            &self,
            collection: &str,
            filter: &Document,
            update: &Document,
            options: &UpdateOptions,
        ) -> Result<UpdateResult> {
            self.inner.update_many(collection, filter, update, options)
        }
        fn delete_one(
            &self,
            collection: &str,
            filter: &Document,
            options: &DeleteOptions,
        ) -> Result<DeleteResult> {
            self.inner.delete_one(collection, filter, options)
        }
        fn delete_many(
            &self,
            collection: &str,
            filter: &Document,
            options: &DeleteOptions,
        ) -> Result<DeleteResult> {
            self.inner.delete_many(collection, filter, options)
        }
        fn compact(&self, collection: &str) -> Result<crate::storage::CompactionStats> {
            self.inner.compact(collection)
        }
        fn list_collections(&self) -> Result<Vec<String>> {
            self.inner.list_collections()
        }
        fn ensure_collection(&self, collection: &str) -> Result<()> {
            self.inner.ensure_collection(collection)
        }
        fn begin_transaction(&self) -> Result<()> {
            self.hooks.lock().push("begin");
            Ok(())
        }
        fn commit_transaction(&self) -> Result<()> {
            self.hooks.lock().push("commit");
            Ok(())
        }
        fn rollback_transaction(&self) -> Result<()> {
            self.hooks.lock().push("rollback");
            Ok(())
        }
    }

    #[test]
    fn test_hooks_wrap_the_block() {
        let storage = Arc::new(HookTracking::default());
        let manager = TransactionManager::new(storage.clone());
        manager.run(&["items"], |_| Ok(())).unwrap();
        let failed: Result<()> =
            manager.run(&["items"], |_| Err(BisonError::Validation("x".to_string())));
        assert!(failed.is_err());
        assert_eq!(*storage.hooks.lock(), vec!["begin", "commit", "begin", "rollback"]);
    }

    #[test]
    fn test_failed_snapshot_calls_no_hooks() {
        let storage = Arc::new(HookTracking {
            fail_reads: true,
            ..HookTracking::default()
        });
        let manager = TransactionManager::new(storage.clone());
        let mut ran = false;
        let err = manager
            .run(&["items"], |_| {
                ran = true;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, BisonError::MalformedRecord(_)));
        assert!(!ran);
        assert!(storage.hooks.lock().is_empty());
    }
}
