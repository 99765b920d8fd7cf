//! Incremental frame parser
//!
//! Turns a byte stream cut into chunks of any size (down to one byte) into
//! an ordered, lazy, finite sequence of records. Chunk boundaries never need
//! to line up with frame boundaries: incomplete trailing bytes are held back
//! until more input arrives. At end of input, bytes that never became a full
//! frame are discarded (a torn final append) instead of failing the read.
//!
//! ```text
//! Read / chunk iterator ─→ FrameDecoder ─→ RawFrame ─→ Document
//!                          (buffer window)   (verbatim bytes)
//! ```
//!
//! Rewrite passes consume [`RawFrame`]s so unchanged records can be copied
//! byte-for-byte without re-encoding; plain reads use [`DocumentReader`].

use crate::codec::{self, LENGTH_PREFIX_SIZE, MAX_DOCUMENT_SIZE};
use crate::document::Document;
use crate::error::{BisonError, Result};
use crate::{log_trace, log_warn};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// One complete frame, prefix included, exactly as it appeared in the stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    bytes: Vec<u8>,
}

impl RawFrame {
    /// Full frame bytes (length prefix + payload)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[LENGTH_PREFIX_SIZE..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn decode(&self) -> Result<Document> {
        codec::decode(self.payload())
    }
}

/// Accumulation buffer that yields frames once they are complete
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    start: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of input
    pub fn push(&mut self, chunk: &[u8]) {
        // Drop consumed bytes before growing so the window stays bounded
        if self.start > 0 && self.start >= self.buffer.len() / 2 {
            self.buffer.drain(..self.start);
            self.start = 0;
        }
        self.buffer.extend_from_slice(chunk);
    }

    /// Next complete frame, or `None` when more input is needed
    ///
    /// A length prefix above [`MAX_DOCUMENT_SIZE`] cannot come from this
    /// engine and is reported as `MalformedRecord`.
    pub fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        let available = &self.buffer[self.start..];
        let len = match codec::read_length_prefix(available) {
            Some(len) => len as usize,
            None => return Ok(None),
        };
        if len > MAX_DOCUMENT_SIZE {
            return Err(BisonError::MalformedRecord(format!(
                "frame length {} exceeds limit of {} bytes",
                len, MAX_DOCUMENT_SIZE
            )));
        }

        let total = LENGTH_PREFIX_SIZE + len;
        if available.len() < total {
            return Ok(None);
        }

        let frame = RawFrame {
            bytes: available[..total].to_vec(),
        };
        self.start += total;
        Ok(Some(frame))
    }

    /// Number of buffered bytes not yet emitted as frames
    pub fn buffered(&self) -> usize {
        self.buffer.len() - self.start
    }

    /// Take the un-emitted bytes, leaving the decoder empty
    pub fn take_remainder(&mut self) -> Vec<u8> {
        let rest = self.buffer.split_off(self.start);
        self.buffer.clear();
        self.start = 0;
        rest
    }
}

/// Frame iterator over any [`Read`] source
pub struct FrameReader<R> {
    reader: R,
    decoder: FrameDecoder,
    chunk: Vec<u8>,
    eof: bool,
    failed: bool,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        FrameReader {
            reader,
            decoder: FrameDecoder::new(),
            chunk: vec![0u8; chunk_size.max(1)],
            eof: false,
            failed: false,
        }
    }

    /// Stop parsing and hand back everything not yet emitted: the buffered
    /// bytes and the untouched source. Used to copy a remainder verbatim.
    pub fn into_remainder(mut self) -> (Vec<u8>, R) {
        let buffered = self.decoder.take_remainder();
        (buffered, self.reader)
    }

    fn fill(&mut self) -> io::Result<()> {
        loop {
            match self.reader.read(&mut self.chunk) {
                Ok(0) => {
                    self.eof = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.decoder.push(&self.chunk[..n]);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<RawFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.failed {
                return None;
            }
            match self.decoder.next_frame() {
                Ok(Some(frame)) => return Some(Ok(frame)),
                Ok(None) => {}
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }

            if self.eof {
                let leftover = self.decoder.take_remainder();
                if !leftover.is_empty() {
                    log_warn!(
                        "Discarding {} trailing bytes that do not form a complete frame",
                        leftover.len()
                    );
                }
                return None;
            }

            if let Err(e) = self.fill() {
                self.failed = true;
                return Some(Err(e.into()));
            }
        }
    }
}

/// Decoded-document iterator over any [`Read`] source
pub struct DocumentReader<R> {
    frames: FrameReader<R>,
}

impl<R: Read> DocumentReader<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        DocumentReader {
            frames: FrameReader::new(reader, chunk_size),
        }
    }
}

impl<R: Read> Iterator for DocumentReader<R> {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.frames.next()?;
        Some(frame.and_then(|f| f.decode()))
    }
}

/// Decoded-document iterator over an explicit sequence of byte chunks
pub struct ChunkedDocuments<I> {
    chunks: I,
    decoder: FrameDecoder,
    done: bool,
}

impl<I, C> Iterator for ChunkedDocuments<I>
where
    I: Iterator<Item = C>,
    C: AsRef<[u8]>,
{
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }
            match self.decoder.next_frame() {
                Ok(Some(frame)) => return Some(frame.decode()),
                Ok(None) => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
            match self.chunks.next() {
                Some(chunk) => {
                    log_trace!("chunk of {} bytes", chunk.as_ref().len());
                    self.decoder.push(chunk.as_ref());
                }
                None => {
                    self.done = true;
                    if self.decoder.buffered() > 0 {
                        log_warn!(
                            "Discarding {} trailing bytes at end of input",
                            self.decoder.buffered()
                        );
                    }
                    return None;
                }
            }
        }
    }
}

/// Parse documents out of arbitrarily split chunks
pub fn parse_chunks<I>(chunks: I) -> ChunkedDocuments<I::IntoIter>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    ChunkedDocuments {
        chunks: chunks.into_iter(),
        decoder: FrameDecoder::new(),
        done: false,
    }
}

/// Open a collection file for frame-level reading.
/// A missing file yields `Ok(None)`.
pub fn open_frames(path: &Path, chunk_size: usize) -> Result<Option<FrameReader<File>>> {
    match File::open(path) {
        Ok(file) => Ok(Some(FrameReader::new(file, chunk_size))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Open a collection file for document reading.
/// A missing file yields `Ok(None)`.
pub fn open_documents(path: &Path, chunk_size: usize) -> Result<Option<DocumentReader<File>>> {
    Ok(open_frames(path, chunk_size)?.map(|frames| DocumentReader { frames }))
}
