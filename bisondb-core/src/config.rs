//! Store configuration
//!
//! Every adapter is built from an explicit [`StoreConfig`]; there is no
//! process-wide root directory.

use std::path::{Path, PathBuf};

/// Default root folder for all databases
pub const DEFAULT_ROOT_DIR: &str = ".bisondb";
/// Default collection file extension
pub const DEFAULT_EXTENSION: &str = "bson";
/// Default Stream Parser read size (64 KiB)
pub const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// Configuration threaded through adapter construction
///
/// # Examples
///
/// ```
/// use bisondb_core::StoreConfig;
///
/// let config = StoreConfig::new("/tmp/data")
///     .with_extension("bdb")
///     .with_read_chunk_size(4096)
///     .with_auto_compact(false);
/// assert_eq!(config.extension(), "bdb");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    root_dir: PathBuf,
    extension: String,
    read_chunk_size: usize,
    auto_compact: bool,
}

impl StoreConfig {
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Self {
        StoreConfig {
            root_dir: root_dir.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    /// Read size used by the Stream Parser. Values below 1 are clamped to 1.
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Default for `DeleteOptions::auto_compact`
    pub fn with_auto_compact(mut self, auto_compact: bool) -> Self {
        self.auto_compact = auto_compact;
        self
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn read_chunk_size(&self) -> usize {
        self.read_chunk_size
    }

    pub fn auto_compact(&self) -> bool {
        self.auto_compact
    }

    /// Directory holding one database's collection files
    pub fn database_dir(&self, db_name: &str) -> PathBuf {
        self.root_dir.join(db_name)
    }

    /// Configuration whose root is the given database directory
    pub(crate) fn scoped_to(&self, dir: PathBuf) -> Self {
        StoreConfig {
            root_dir: dir,
            ..self.clone()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            extension: DEFAULT_EXTENSION.to_string(),
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            auto_compact: true,
        }
    }
}
