// src/storage/traits.rs
//! Storage adapter contract
//!
//! The collection API and the transaction manager only talk to this trait.
//! Implementations pick their own physical layout but must share the
//! observable semantics: identities assigned on write, tombstoned documents
//! invisible to `find`/`count`, results returned in insertion order, and
//! well-formed summaries even when nothing matched.
//!
//! ```text
//! StorageAdapter
//!   ├── FileStorage    (frame files + rewrite passes)
//!   └── MemoryStorage  (in-memory vectors)
//! ```

use crate::document::Document;
use crate::error::Result;
use crate::storage::{CompactionStats, DeleteOptions, DeleteResult, UpdateOptions, UpdateResult};
use crate::value::Value;

/// Backend-agnostic storage operations
///
/// Methods take `&self`; implementations use interior mutability where they
/// need it. Writers to the same collection must be serialized by the caller.
pub trait StorageAdapter: Send + Sync {
    // ========================================================================
    // WRITES
    // ========================================================================

    /// Store one document, assigning `_id` if absent. Returns the identity.
    fn write(&self, collection: &str, document: Document) -> Result<Value>;

    /// Store a non-empty batch. The default writes one document at a time.
    fn write_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<Value>> {
        documents
            .into_iter()
            .map(|document| self.write(collection, document))
            .collect()
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Live documents matching `filter`, in insertion order, optionally projected
    fn find(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
    ) -> Result<Vec<Document>>;

    /// First live document matching `filter`
    fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        Ok(self.find(collection, filter, None)?.into_iter().next())
    }

    fn count(&self, collection: &str, filter: &Document) -> Result<u64>;

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult>;

    fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult>;

    /// Tombstone the first match; compacts afterwards when auto-compact applies
    fn delete_one(
        &self,
        collection: &str,
        filter: &Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult>;

    fn delete_many(
        &self,
        collection: &str,
        filter: &Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult>;

    /// Physically remove tombstoned documents
    fn compact(&self, collection: &str) -> Result<CompactionStats>;

    // ========================================================================
    // CATALOG
    // ========================================================================

    /// Names of collections that have backing storage, sorted
    fn list_collections(&self) -> Result<Vec<String>>;

    /// Make sure a collection exists, even when empty
    fn ensure_collection(&self, collection: &str) -> Result<()>;

    // ========================================================================
    // TRANSACTION HOOKS
    // ========================================================================

    /// Backends without native transactions keep the no-op defaults
    fn begin_transaction(&self) -> Result<()> {
        Ok(())
    }

    fn commit_transaction(&self) -> Result<()> {
        Ok(())
    }

    fn rollback_transaction(&self) -> Result<()> {
        Ok(())
    }
}
