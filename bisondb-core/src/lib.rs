// bisondb-core/src/lib.rs
// Embedded document store: append-only collection files, MongoDB-style queries

pub mod aggregation;
pub mod codec;
pub mod collection;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod logging;
pub mod projection;
pub mod query;
pub mod storage;
pub mod stream;
pub mod transaction;
pub mod update;
pub mod value;
pub mod writer;

// Public exports
pub use aggregation::Pipeline;
pub use collection::{Collection, InsertManyResult, InsertOneResult};
pub use config::StoreConfig;
pub use database::Database;
pub use document::Document;
pub use error::{BisonError, Result};
pub use logging::{get_log_level, init_from_env, set_log_level, LogLevel};
pub use storage::{
    CompactionStats, DeleteOptions, DeleteResult, FileStorage, IndexFooter, MemoryStorage,
    ReturnDocument, StorageAdapter, UpdateOptions, UpdateResult,
};
pub use transaction::{Transaction, TransactionCollection, TransactionManager};
pub use value::{ObjectId, Value};
