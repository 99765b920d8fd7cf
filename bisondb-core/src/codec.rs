//! Record codec and framing
//!
//! A record frame is `[u32 little-endian payload length][payload]`. The
//! payload is the `bincode` encoding of the document's value tree; every
//! value carries its variant tag, so no external schema is needed to decode.

use crate::document::Document;
use crate::error::{BisonError, Result};
use bincode::Options;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Size of the frame length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Upper bound on a single encoded payload (16 MiB)
pub const MAX_DOCUMENT_SIZE: usize = 16 * 1024 * 1024;

fn options() -> impl Options {
    // Varint integers, little endian, trailing bytes rejected
    bincode::DefaultOptions::new().with_limit(MAX_DOCUMENT_SIZE as u64)
}

pub(crate) fn serialize_payload<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    options().serialize(value).map_err(|e| {
        BisonError::Validation(format!("Cannot encode record: {}", e))
    })
}

pub(crate) fn deserialize_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    options()
        .deserialize(bytes)
        .map_err(|e| BisonError::MalformedRecord(format!("{} ({} bytes)", e, bytes.len())))
}

/// Encode one document into its payload bytes (no length prefix)
pub fn encode(document: &Document) -> Result<Vec<u8>> {
    serialize_payload(document)
}

/// Decode a payload produced by [`encode`]
///
/// Fails with `MalformedRecord` when the span is truncated, carries
/// trailing bytes, or is not a valid encoding.
pub fn decode(bytes: &[u8]) -> Result<Document> {
    deserialize_payload(bytes)
}

/// Encode a document as a complete frame (length prefix + payload)
pub fn encode_frame(document: &Document) -> Result<Vec<u8>> {
    let payload = encode(document)?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Read the length prefix at the start of `bytes`, if 4 bytes are available
pub fn read_length_prefix(bytes: &[u8]) -> Option<u32> {
    let prefix: [u8; LENGTH_PREFIX_SIZE] = bytes.get(..LENGTH_PREFIX_SIZE)?.try_into().ok()?;
    Some(u32::from_le_bytes(prefix))
}
