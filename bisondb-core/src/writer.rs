// src/writer.rs
//! Append writer
//!
//! Creates a collection's backing file on demand and appends framed records
//! to it. Appends never truncate; a batch is concatenated and written with a
//! single `write_all` so it is not interleaved with other appends.

use crate::codec;
use crate::document::Document;
use crate::error::{BisonError, Result};
use crate::log_debug;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Create the parent directory and an empty file if absent. Idempotent.
pub fn ensure_collection(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)?;
    Ok(())
}

fn open_for_append(path: &Path) -> Result<File> {
    ensure_collection(path)?;
    Ok(OpenOptions::new().append(true).open(path)?)
}

/// Prepare a document for storage: reject tombstones, assign `_id` if absent
fn prepare(mut document: Document) -> Result<Document> {
    if document.is_deleted() {
        return Err(BisonError::Validation(
            "Cannot insert a document marked as deleted".to_string(),
        ));
    }
    document.ensure_id();
    Ok(document)
}

/// Append one document, assigning `_id` if missing. Returns the stored document.
pub fn append_one(path: &Path, document: Document) -> Result<Document> {
    let stored = prepare(document)?;
    let frame = codec::encode_frame(&stored)?;

    let mut file = open_for_append(path)?;
    file.write_all(&frame)?;
    file.flush()?;

    log_debug!("Appended 1 record ({} bytes) to {}", frame.len(), path.display());
    Ok(stored)
}

/// Append a batch in one write. Every document is encoded before the file
/// is opened, so an encoding failure writes nothing.
pub fn append_many(path: &Path, documents: Vec<Document>) -> Result<Vec<Document>> {
    if documents.is_empty() {
        return Err(BisonError::Validation(
            "Document batch must not be empty".to_string(),
        ));
    }

    let stored = documents
        .into_iter()
        .map(prepare)
        .collect::<Result<Vec<_>>>()?;
    let mut buffer = Vec::new();
    for document in &stored {
        buffer.extend_from_slice(&codec::encode_frame(document)?);
    }

    let mut file = open_for_append(path)?;
    file.write_all(&buffer)?;
    file.flush()?;

    log_debug!(
        "Appended {} records ({} bytes) to {}",
        stored.len(),
        buffer.len(),
        path.display()
    );
    Ok(stored)
}
