// storage/memory_storage.rs
//! In-memory adapter
//!
//! Same observable behavior as [`FileStorage`](super::FileStorage) with the
//! documents held in vectors: deletes leave tombstones until compaction,
//! updates replace documents in place, results keep insertion order. Useful
//! for tests and for callers that want a throwaway database.
//!
//! ```text
//! MemoryStorage
//!      ↓
//! RwLock<HashMap<String, Vec<Document>>>   (collection -> records, tombstones included)
//! ```

use crate::codec;
use crate::document::Document;
use crate::error::{BisonError, Result};
use crate::projection::apply_projection;
use crate::query::matches_filter;
use crate::storage::{
    CompactionStats, DeleteOptions, DeleteResult, ReturnDocument, StorageAdapter, UpdateOptions,
    UpdateResult,
};
use crate::update::apply_update;
use crate::value::Value;
use parking_lot::RwLock;
use std::collections::HashMap;

pub struct MemoryStorage {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    auto_compact: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            collections: RwLock::new(HashMap::new()),
            auto_compact: true,
        }
    }

    /// Default for `DeleteOptions::auto_compact`
    pub fn with_auto_compact(mut self, auto_compact: bool) -> Self {
        self.auto_compact = auto_compact;
        self
    }

    /// Reject tombstones and assign `_id`, returning the identity alongside
    fn prepare(mut document: Document) -> Result<(Value, Document)> {
        if document.is_deleted() {
            return Err(BisonError::Validation(
                "Cannot insert a document marked as deleted".to_string(),
            ));
        }
        let id = document.ensure_id();
        Ok((id, document))
    }

    fn update(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
        limit_one: bool,
    ) -> Result<UpdateResult> {
        let mut collections = self.collections.write();
        let mut result = UpdateResult::default();
        let Some(records) = collections.get_mut(collection) else {
            return Ok(result);
        };

        // Evaluate everything first so a failure leaves the collection as it was
        let mut replacements = Vec::new();
        for (position, document) in records.iter().enumerate() {
            if document.is_deleted() || !matches_filter(document, filter)? {
                continue;
            }
            let updated = apply_update(document, update)?;
            result.matched_count += 1;
            result.document = match options.return_document {
                Some(ReturnDocument::Before) => Some(document.clone()),
                Some(ReturnDocument::After) => Some(updated.clone()),
                None => None,
            };
            if updated != *document {
                result.modified_count += 1;
                replacements.push((position, updated));
            }
            if limit_one {
                break;
            }
        }

        for (position, updated) in replacements {
            records[position] = updated;
        }
        Ok(result)
    }

    fn delete(
        &self,
        collection: &str,
        filter: &Document,
        options: &DeleteOptions,
        limit_one: bool,
    ) -> Result<DeleteResult> {
        let mut targets = Vec::new();
        {
            let mut collections = self.collections.write();
            if let Some(records) = collections.get_mut(collection) {
                for (position, document) in records.iter().enumerate() {
                    if document.is_deleted() || !matches_filter(document, filter)? {
                        continue;
                    }
                    targets.push(position);
                    if limit_one {
                        break;
                    }
                }
                for &position in &targets {
                    records[position].mark_deleted();
                }
            }
        }

        let deleted = targets.len() as u64;
        if deleted > 0 && options.auto_compact.unwrap_or(self.auto_compact) {
            self.compact(collection)?;
        }
        Ok(DeleteResult {
            deleted_count: deleted,
        })
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

fn frame_size(document: &Document) -> u64 {
    codec::encode_frame(document)
        .map(|frame| frame.len() as u64)
        .unwrap_or(0)
}

impl StorageAdapter for MemoryStorage {
    fn write(&self, collection: &str, document: Document) -> Result<Value> {
        let (id, stored) = Self::prepare(document)?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(stored);
        Ok(id)
    }

    fn write_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<Value>> {
        if documents.is_empty() {
            return Err(BisonError::Validation(
                "Document batch must not be empty".to_string(),
            ));
        }
        let (ids, stored): (Vec<Value>, Vec<Document>) = documents
            .into_iter()
            .map(Self::prepare)
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .unzip();
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .extend(stored);
        Ok(ids)
    }

    fn find(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
    ) -> Result<Vec<Document>> {
        let collections = self.collections.read();
        let Some(records) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut results = Vec::new();
        for document in records.iter().filter(|d| !d.is_deleted()) {
            if matches_filter(document, filter)? {
                results.push(match projection {
                    Some(projection) => apply_projection(document, projection),
                    None => document.clone(),
                });
            }
        }
        Ok(results)
    }

    fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
        let collections = self.collections.read();
        let Some(records) = collections.get(collection) else {
            return Ok(0);
        };
        let mut count = 0;
        for document in records.iter().filter(|d| !d.is_deleted()) {
            if matches_filter(document, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult> {
        self.update(collection, filter, update, options, true)
    }

    fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult> {
        self.update(collection, filter, update, options, false)
    }

    fn delete_one(
        &self,
        collection: &str,
        filter: &Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult> {
        self.delete(collection, filter, options, true)
    }

    fn delete_many(
        &self,
        collection: &str,
        filter: &Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult> {
        self.delete(collection, filter, options, false)
    }

    fn compact(&self, collection: &str) -> Result<CompactionStats> {
        let mut collections = self.collections.write();
        let mut stats = CompactionStats::default();
        let Some(records) = collections.get_mut(collection) else {
            return Ok(stats);
        };

        stats.documents_scanned = records.len() as u64;
        stats.size_before = records.iter().map(frame_size).sum();
        records.retain(|document| !document.is_deleted());
        stats.documents_kept = records.len() as u64;
        stats.tombstones_removed = stats.documents_scanned - stats.documents_kept;
        stats.size_after = records.iter().map(frame_size).sum();
        Ok(stats)
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(&value).unwrap()
    }

    #[test]
    fn test_tombstones_until_compaction() {
        let storage = MemoryStorage::new();
        storage
            .write_many("items", vec![doc(json!({"n": 1})), doc(json!({"n": 2}))])
            .unwrap();
        storage
            .delete_one("items", &doc(json!({"n": 1})), &DeleteOptions::with_auto_compact(false))
            .unwrap();
        assert_eq!(storage.count("items", &Document::new()).unwrap(), 1);
        assert_eq!(storage.collections.read()["items"].len(), 2);

        let stats = storage.compact("items").unwrap();
        assert_eq!(stats.tombstones_removed, 1);
        assert!(stats.space_saved() > 0);
        assert_eq!(storage.collections.read()["items"].len(), 1);
    }

    #[test]
    fn test_failed_update_changes_nothing() {
        let storage = MemoryStorage::new();
        storage
            .write_many("items", vec![doc(json!({"n": 1})), doc(json!({"n": "x"}))])
            .unwrap();
        let before = storage.find("items", &Document::new(), None).unwrap();
        let err = storage
            .update_many(
                "items",
                &Document::new(),
                &doc(json!({"$set": {"_id": "new"}})),
                &UpdateOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err, BisonError::Validation(_)));
        assert_eq!(storage.find("items", &Document::new(), None).unwrap(), before);
    }

    #[test]
    fn test_empty_batch_rejected() {
        let storage = MemoryStorage::new();
        assert!(matches!(
            storage.write_many("items", Vec::new()),
            Err(BisonError::Validation(_))
        ));
    }
}
