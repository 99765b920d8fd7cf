// storage/footer.rs
//! Cached index footer
//!
//! The database directory holds an index file, `_index.bisondata`, to which
//! every save appends one footer:
//!
//! ```text
//! [encoded IndexFooter][u32 LE length of the encoding][b"BISONIDX"]
//! ```
//!
//! Readers check the trailing 12 bytes first. A missing file, a file under
//! 12 bytes or a foreign magic marker all mean "no cached index" and yield
//! the version-1 default. Only a length that points outside the file, or an
//! undecodable footer behind a valid marker, is `MalformedRecord`.

use crate::codec::{deserialize_payload, serialize_payload};
use crate::error::{BisonError, Result};
use crate::log_debug;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Index file name inside a database directory
pub const INDEX_FILE_NAME: &str = "_index.bisondata";
/// Footer magic marker
pub const FOOTER_MAGIC: &[u8; 8] = b"BISONIDX";
/// Length field plus magic marker
pub const FOOTER_TRAILER_SIZE: u64 = 12;

/// Cached per-collection metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionIndexEntry {
    /// Live (non-tombstoned) documents
    pub documents: u64,
    /// Collection file size in bytes
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFooter {
    pub version: u32,
    /// Unix time in milliseconds, 0 when never saved
    pub saved_at: i64,
    pub collections: BTreeMap<String, CollectionIndexEntry>,
}

impl Default for IndexFooter {
    fn default() -> Self {
        IndexFooter {
            version: 1,
            saved_at: 0,
            collections: BTreeMap::new(),
        }
    }
}

impl IndexFooter {
    pub fn new(collections: BTreeMap<String, CollectionIndexEntry>) -> Self {
        IndexFooter {
            version: 1,
            saved_at: Utc::now().timestamp_millis(),
            collections,
        }
    }

    pub fn saved_at(&self) -> Option<DateTime<Utc>> {
        if self.saved_at == 0 {
            return None;
        }
        Utc.timestamp_millis_opt(self.saved_at).single()
    }
}

/// Read the last footer in `path`
pub fn read_latest_index(path: &Path) -> Result<IndexFooter> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(IndexFooter::default()),
        Err(e) => return Err(e.into()),
    };

    let file_len = file.metadata()?.len();
    if file_len < FOOTER_TRAILER_SIZE {
        return Ok(IndexFooter::default());
    }

    let mut trailer = [0u8; FOOTER_TRAILER_SIZE as usize];
    file.seek(SeekFrom::Start(file_len - FOOTER_TRAILER_SIZE))?;
    file.read_exact(&mut trailer)?;
    if &trailer[4..] != FOOTER_MAGIC {
        log_debug!("No index footer marker in {}", path.display());
        return Ok(IndexFooter::default());
    }

    let len = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]) as u64;
    if len + FOOTER_TRAILER_SIZE > file_len {
        return Err(BisonError::MalformedRecord(format!(
            "index footer length {} exceeds file size {}",
            len, file_len
        )));
    }

    let mut payload = vec![0u8; len as usize];
    file.seek(SeekFrom::Start(file_len - FOOTER_TRAILER_SIZE - len))?;
    file.read_exact(&mut payload)?;
    deserialize_payload(&payload)
}

/// Append a footer; it becomes the latest one
pub fn write_index_footer(path: &Path, footer: &IndexFooter) -> Result<()> {
    let payload = serialize_payload(footer)?;
    let mut bytes = Vec::with_capacity(payload.len() + FOOTER_TRAILER_SIZE as usize);
    bytes.extend_from_slice(&payload);
    bytes.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    bytes.extend_from_slice(FOOTER_MAGIC);

    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    Ok(())
}
