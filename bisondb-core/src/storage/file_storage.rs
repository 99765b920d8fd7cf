// storage/file_storage.rs
//! File-backed adapter
//!
//! One append-only frame file per collection, named
//! `<root_dir>/<collection>.<extension>`. Writes go through the append
//! writer; mutations run a rewrite pass; reads stream the file through the
//! frame parser so memory stays bounded by one read window plus the result.

use crate::config::StoreConfig;
use crate::document::Document;
use crate::error::{BisonError, Result};
use crate::projection::apply_projection;
use crate::query::matches_filter;
use crate::storage::footer::{self, CollectionIndexEntry, IndexFooter, INDEX_FILE_NAME};
use crate::storage::rewrite::{self, CompactionStats};
use crate::storage::{DeleteOptions, DeleteResult, StorageAdapter, UpdateOptions, UpdateResult};
use crate::stream::{open_documents, DocumentReader};
use crate::value::Value;
use crate::writer;
use crate::{log_debug, log_info};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// File-backed storage rooted at one directory
#[derive(Debug, Clone)]
pub struct FileStorage {
    config: StoreConfig,
}

impl FileStorage {
    /// Adapter over `config.root_dir()`. The directory is created on first write.
    pub fn new(config: StoreConfig) -> Self {
        FileStorage { config }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn root_dir(&self) -> &Path {
        self.config.root_dir()
    }

    /// Backing file of a collection
    pub fn collection_path(&self, collection: &str) -> Result<PathBuf> {
        validate_collection_name(collection)?;
        Ok(self
            .config
            .root_dir()
            .join(format!("{}.{}", collection, self.config.extension())))
    }

    pub fn index_path(&self) -> PathBuf {
        self.config.root_dir().join(INDEX_FILE_NAME)
    }

    fn live_documents(&self, collection: &str) -> Result<Option<LiveDocuments>> {
        let path = self.collection_path(collection)?;
        Ok(open_documents(&path, self.config.read_chunk_size())?.map(|inner| LiveDocuments { inner }))
    }

    fn resolve_auto_compact(&self, options: &DeleteOptions) -> bool {
        options.auto_compact.unwrap_or(self.config.auto_compact())
    }

    fn after_delete(&self, collection: &str, deleted: u64, options: &DeleteOptions) -> Result<DeleteResult> {
        if deleted > 0 && self.resolve_auto_compact(options) {
            self.compact(collection)?;
        }
        Ok(DeleteResult {
            deleted_count: deleted,
        })
    }

    /// Scan every collection and append a fresh index footer
    pub fn save_index(&self) -> Result<IndexFooter> {
        let mut collections = BTreeMap::new();
        for name in self.list_collections()? {
            let path = self.collection_path(&name)?;
            let bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            let documents = self.count(&name, &Document::new())?;
            collections.insert(name, CollectionIndexEntry { documents, bytes });
        }

        fs::create_dir_all(self.config.root_dir())?;
        let footer = IndexFooter::new(collections);
        footer::write_index_footer(&self.index_path(), &footer)?;
        log_info!(
            "Saved index for {} collections in {}",
            footer.collections.len(),
            self.root_dir().display()
        );
        Ok(footer)
    }

    /// Last saved index footer, or the version-1 default
    pub fn cached_index(&self) -> Result<IndexFooter> {
        footer::read_latest_index(&self.index_path())
    }
}

/// Decoded documents with tombstones skipped
struct LiveDocuments {
    inner: DocumentReader<File>,
}

impl Iterator for LiveDocuments {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(document) if document.is_deleted() => continue,
                other => return Some(other),
            }
        }
    }
}

/// Collection names map directly to file names
pub fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(BisonError::Validation(
            "Collection name must not be empty".to_string(),
        ));
    }
    if name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(BisonError::Validation(format!(
            "Invalid collection name '{}'",
            name
        )));
    }
    Ok(())
}

impl StorageAdapter for FileStorage {
    fn write(&self, collection: &str, document: Document) -> Result<Value> {
        let path = self.collection_path(collection)?;
        let stored = writer::append_one(&path, document)?;
        stored
            .id()
            .cloned()
            .ok_or_else(|| BisonError::Validation("Stored document has no _id".to_string()))
    }

    fn write_many(&self, collection: &str, documents: Vec<Document>) -> Result<Vec<Value>> {
        let path = self.collection_path(collection)?;
        let stored = writer::append_many(&path, documents)?;
        Ok(stored
            .iter()
            .filter_map(|document| document.id().cloned())
            .collect())
    }

    fn find(
        &self,
        collection: &str,
        filter: &Document,
        projection: Option<&Document>,
    ) -> Result<Vec<Document>> {
        let Some(documents) = self.live_documents(collection)? else {
            return Ok(Vec::new());
        };

        let mut results = Vec::new();
        for document in documents {
            let document = document?;
            if matches_filter(&document, filter)? {
                results.push(match projection {
                    Some(projection) => apply_projection(&document, projection),
                    None => document,
                });
            }
        }
        log_debug!("find on {} returned {} documents", collection, results.len());
        Ok(results)
    }

    fn find_one(&self, collection: &str, filter: &Document) -> Result<Option<Document>> {
        let Some(documents) = self.live_documents(collection)? else {
            return Ok(None);
        };
        for document in documents {
            let document = document?;
            if matches_filter(&document, filter)? {
                return Ok(Some(document));
            }
        }
        Ok(None)
    }

    fn count(&self, collection: &str, filter: &Document) -> Result<u64> {
        let Some(documents) = self.live_documents(collection)? else {
            return Ok(0);
        };
        let mut count = 0;
        for document in documents {
            if matches_filter(&document?, filter)? {
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
        let path = self.collection_path(collection)?;
        rewrite::update_one(
            &path,
            filter,
            update,
            options.return_document,
            self.config.read_chunk_size(),
        )
    }

    fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        update: &Document,
        options: &UpdateOptions,
    ) -> Result<UpdateResult> {
        let path = self.collection_path(collection)?;
        rewrite::update_many(
            &path,
            filter,
            update,
            options.return_document,
            self.config.read_chunk_size(),
        )
    }

    fn delete_one(
        &self,
        collection: &str,
        filter: &Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult> {
        let path = self.collection_path(collection)?;
        let deleted = rewrite::delete_one(&path, filter, self.config.read_chunk_size())?;
        self.after_delete(collection, deleted, options)
    }

    fn delete_many(
        &self,
        collection: &str,
        filter: &Document,
        options: &DeleteOptions,
    ) -> Result<DeleteResult> {
        let path = self.collection_path(collection)?;
        let deleted = rewrite::delete_many(&path, filter, self.config.read_chunk_size())?;
        self.after_delete(collection, deleted, options)
    }

    fn compact(&self, collection: &str) -> Result<CompactionStats> {
        let path = self.collection_path(collection)?;
        rewrite::compact(&path, self.config.read_chunk_size())
    }

    fn list_collections(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(self.config.root_dir()) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let has_extension = path
                .extension()
                .map(|ext| ext == self.config.extension())
                .unwrap_or(false);
            if let (true, Some(stem)) = (has_extension, path.file_stem().and_then(|s| s.to_str())) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn ensure_collection(&self, collection: &str) -> Result<()> {
        writer::ensure_collection(&self.collection_path(collection)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(&value).unwrap()
    }

    fn storage(dir: &TempDir) -> FileStorage {
        FileStorage::new(StoreConfig::new(dir.path()).with_read_chunk_size(16))
    }

    #[test]
    fn test_write_and_find() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let id = storage.write("users", doc(json!({"name": "a", "age": 30}))).unwrap();
        storage.write("users", doc(json!({"name": "b", "age": 20}))).unwrap();

        let found = storage
            .find("users", &doc(json!({"age": {"$gt": 25}})), None)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id(), Some(&id));
        assert_eq!(storage.count("users", &Document::new()).unwrap(), 2);
    }

    #[test]
    fn test_missing_collection_is_empty() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        assert!(storage.find("ghost", &Document::new(), None).unwrap().is_empty());
        assert_eq!(storage.count("ghost", &Document::new()).unwrap(), 0);
        assert!(storage.find_one("ghost", &Document::new()).unwrap().is_none());
        assert!(storage.list_collections().unwrap().is_empty());
    }

    #[test]
    fn test_projection_applied() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage.write("users", doc(json!({"name": "a", "age": 30}))).unwrap();
        let found = storage
            .find("users", &Document::new(), Some(&doc(json!({"name": 1}))))
            .unwrap();
        assert_eq!(found[0].to_json(), json!({"name": "a"}));
    }

    #[test]
    fn test_delete_respects_auto_compact() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage
            .write_many("items", vec![doc(json!({"n": 1})), doc(json!({"n": 2}))])
            .unwrap();
        let path = storage.collection_path("items").unwrap();
        let full_len = fs::metadata(&path).unwrap().len();

        let result = storage
            .delete_one("items", &doc(json!({"n": 1})), &DeleteOptions::with_auto_compact(false))
            .unwrap();
        assert_eq!(result.deleted_count, 1);
        assert!(fs::metadata(&path).unwrap().len() >= full_len);
        assert_eq!(storage.count("items", &Document::new()).unwrap(), 1);

        let stats = storage.compact("items").unwrap();
        assert_eq!(stats.tombstones_removed, 1);
        assert!(fs::metadata(&path).unwrap().len() < full_len);
    }

    #[test]
    fn test_list_collections_by_extension() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        storage.ensure_collection("zeta").unwrap();
        storage.write("alpha", doc(json!({"a": 1}))).unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        storage.save_index().unwrap();
        assert_eq!(storage.list_collections().unwrap(), ["alpha", "zeta"]);
    }

    #[test]
    fn test_invalid_collection_names() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        for name in ["", "../x", "a/b", ".hidden"] {
            assert!(matches!(
                storage.write(name, Document::new()),
                Err(BisonError::Validation(_))
            ));
        }
    }

    #[test]
    fn test_save_and_read_index() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        assert_eq!(storage.cached_index().unwrap(), IndexFooter::default());

        storage
            .write_many("items", vec![doc(json!({"n": 1})), doc(json!({"n": 2}))])
            .unwrap();
        let saved = storage.save_index().unwrap();
        let cached = storage.cached_index().unwrap();
        assert_eq!(cached, saved);
        assert_eq!(cached.collections["items"].documents, 2);
    }
}
