// src/collection.rs
// Per-collection public API
//
// ├── Inserts        insert_one, insert_many
// ├── Reads          find, find_with_projection, find_one, find_by_id, count, distinct
// ├── Mutations      update_one/_with, update_many/_with, delete_one/_with, delete_many/_with
// ├── Maintenance    compact
// └── Collaborators  aggregate, transaction
//
// Filters, updates, projections and pipelines arrive as JSON and are parsed
// up front, so malformed input is rejected before the adapter touches storage.

use std::sync::Arc;

use crate::aggregation::Pipeline;
use crate::document::{Document, ID_FIELD};
use crate::error::{BisonError, Result};
use crate::log_trace;
use crate::projection::parse_projection;
use crate::query::parse_filter;
use crate::storage::{
    CompactionStats, DeleteOptions, DeleteResult, StorageAdapter, UpdateOptions, UpdateResult,
};
use crate::transaction::{Transaction, TransactionManager};
use crate::update::parse_update;
use crate::value::{values_equal, Value};

/// Result of insert_one
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    pub inserted_id: Value,
}

/// Result of insert_many
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    pub inserted_ids: Vec<Value>,
}

impl InsertManyResult {
    pub fn inserted_count(&self) -> usize {
        self.inserted_ids.len()
    }
}

/// Handle to one named collection over a shared adapter
#[derive(Clone)]
pub struct Collection {
    name: String,
    storage: Arc<dyn StorageAdapter>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}

impl Collection {
    pub fn new(name: impl Into<String>, storage: Arc<dyn StorageAdapter>) -> Self {
        Collection {
            name: name.into(),
            storage,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========== INSERTS ==========

    pub fn insert_one(&self, document: Document) -> Result<InsertOneResult> {
        let inserted_id = self.storage.write(&self.name, document)?;
        log_trace!("insert_one into '{}': {}", self.name, inserted_id);
        Ok(InsertOneResult { inserted_id })
    }

    /// Insert a non-empty batch; identities come back in input order
    pub fn insert_many(&self, documents: Vec<Document>) -> Result<InsertManyResult> {
        if documents.is_empty() {
            return Err(BisonError::Validation(
                "insert_many requires at least one document".to_string(),
            ));
        }
        let inserted_ids = self.storage.write_many(&self.name, documents)?;
        Ok(InsertManyResult { inserted_ids })
    }

    // ========== READS ==========

    /// Live documents matching `filter`, in insertion order
    pub fn find(&self, filter: &serde_json::Value) -> Result<Vec<Document>> {
        let filter = parse_filter(filter)?;
        self.storage.find(&self.name, &filter, None)
    }

    /// `find` with an inclusion projection (`{"field": 1}`)
    pub fn find_with_projection(
        &self,
        filter: &serde_json::Value,
        projection: &serde_json::Value,
    ) -> Result<Vec<Document>> {
        let filter = parse_filter(filter)?;
        let projection = parse_projection(projection)?;
        self.storage.find(&self.name, &filter, projection.as_ref())
    }

    pub fn find_one(&self, filter: &serde_json::Value) -> Result<Option<Document>> {
        let filter = parse_filter(filter)?;
        self.storage.find_one(&self.name, &filter)
    }

    pub fn find_by_id(&self, id: impl Into<Value>) -> Result<Option<Document>> {
        let filter = Document::new().with(ID_FIELD, id);
        self.storage.find_one(&self.name, &filter)
    }

    pub fn count(&self, filter: &serde_json::Value) -> Result<u64> {
        let filter = parse_filter(filter)?;
        self.storage.count(&self.name, &filter)
    }

    /// Distinct values of a top-level field among matching documents.
    /// First-seen order; documents without the field contribute nothing.
    pub fn distinct(&self, field: &str, filter: &serde_json::Value) -> Result<Vec<Value>> {
        let mut values: Vec<Value> = Vec::new();
        for document in self.find(filter)? {
            if let Some(value) = document.get(field) {
                if !values.iter().any(|seen| values_equal(seen, value)) {
                    values.push(value.clone());
                }
            }
        }
        Ok(values)
    }

    // ========== MUTATIONS ==========

    pub fn update_one(
        &self,
        filter: &serde_json::Value,
        update: &serde_json::Value,
    ) -> Result<UpdateResult> {
        self.update_one_with(filter, update, &UpdateOptions::default())
    }

    pub fn update_one_with(
        &self,
        filter: &serde_json::Value,
        update: &serde_json::Value,
        options: &UpdateOptions,
    ) -> Result<UpdateResult> {
        let filter = parse_filter(filter)?;
        let update = parse_update(update)?;
        self.storage.update_one(&self.name, &filter, &update, options)
    }

    pub fn update_many(
        &self,
        filter: &serde_json::Value,
        update: &serde_json::Value,
    ) -> Result<UpdateResult> {
        self.update_many_with(filter, update, &UpdateOptions::default())
    }

    pub fn update_many_with(
        &self,
        filter: &serde_json::Value,
        update: &serde_json::Value,
        options: &UpdateOptions,
    ) -> Result<UpdateResult> {
        let filter = parse_filter(filter)?;
        let update = parse_update(update)?;
        self.storage.update_many(&self.name, &filter, &update, options)
    }

    pub fn delete_one(&self, filter: &serde_json::Value) -> Result<DeleteResult> {
        self.delete_one_with(filter, &DeleteOptions::default())
    }

    pub fn delete_one_with(
        &self,
        filter: &serde_json::Value,
        options: &DeleteOptions,
    ) -> Result<DeleteResult> {
        let filter = parse_filter(filter)?;
        self.storage.delete_one(&self.name, &filter, options)
    }

    pub fn delete_many(&self, filter: &serde_json::Value) -> Result<DeleteResult> {
        self.delete_many_with(filter, &DeleteOptions::default())
    }

    pub fn delete_many_with(
        &self,
        filter: &serde_json::Value,
        options: &DeleteOptions,
    ) -> Result<DeleteResult> {
        let filter = parse_filter(filter)?;
        self.storage.delete_many(&self.name, &filter, options)
    }

    // ========== MAINTENANCE ==========

    pub fn compact(&self) -> Result<CompactionStats> {
        self.storage.compact(&self.name)
    }

    // ========== COLLABORATORS ==========

    /// Run a pipeline over every live document of this collection
    pub fn aggregate(&self, pipeline: &serde_json::Value) -> Result<Vec<Document>> {
        let pipeline = Pipeline::from_json(pipeline)?;
        let documents = self.storage.find(&self.name, &Document::new(), None)?;
        pipeline.execute(documents)
    }

    /// Best-effort transaction scoped to this collection
    pub fn transaction<T, F>(&self, operations: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        TransactionManager::new(Arc::clone(&self.storage)).run(&[self.name.as_str()], operations)
    }
}
