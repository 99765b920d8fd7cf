// src/storage/mod.rs
//! Storage layer
//!
//! ```text
//! StorageAdapter (traits.rs)
//!   ├── FileStorage    one append-only frame file per collection
//!   │     ├── writer          appends
//!   │     ├── rewrite         delete / update / compact passes
//!   │     └── footer          optional cached index
//!   └── MemoryStorage  same semantics, documents held in memory
//! ```

pub mod file_storage;
pub mod footer;
pub mod memory_storage;
pub mod rewrite;
pub mod traits;

pub use file_storage::FileStorage;
pub use footer::{CollectionIndexEntry, IndexFooter};
pub use memory_storage::MemoryStorage;
pub use rewrite::CompactionStats;
pub use traits::StorageAdapter;

use crate::document::Document;

/// Which version of an updated document to hand back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDocument {
    /// The document as it was before the update
    Before,
    /// The document after the update was applied
    After,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// `None` returns only the counts
    pub return_document: Option<ReturnDocument>,
}

impl UpdateOptions {
    pub fn returning(mode: ReturnDocument) -> Self {
        UpdateOptions {
            return_document: Some(mode),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Compact after a delete that removed at least one document.
    /// `None` uses the adapter's configured default.
    pub auto_compact: Option<bool>,
}

impl DeleteOptions {
    pub fn with_auto_compact(auto_compact: bool) -> Self {
        DeleteOptions {
            auto_compact: Some(auto_compact),
        }
    }
}

/// Outcome of an update. Always well-formed, also when nothing matched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateResult {
    pub matched_count: u64,
    /// Matched documents that actually changed (deep comparison)
    pub modified_count: u64,
    /// Filled when a return mode was requested and something matched;
    /// update-many keeps the last affected document
    pub document: Option<Document>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteResult {
    pub deleted_count: u64,
}
