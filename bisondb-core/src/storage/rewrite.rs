// storage/rewrite.rs
//! Rewrite passes over a collection file
//!
//! Every mutation has the same shape: stream the source file frame by frame,
//! decide per frame whether to keep it, replace it or drop it, write the
//! outcome into `<file>.tmp`, then rename the temp file over the source. The
//! source is never written while it is being read. If anything fails before
//! the rename, the temp file is removed and the source is left as it was.
//!
//! A pass that changes nothing is discarded instead of renamed, so a
//! no-match delete or a compaction without tombstones leaves the file
//! byte-identical.

use crate::codec;
use crate::document::Document;
use crate::error::Result;
use crate::query::matches_filter;
use crate::storage::{ReturnDocument, UpdateResult};
use crate::stream::{open_frames, RawFrame};
use crate::update::apply_update;
use crate::{log_debug, log_info};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Compaction statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub size_before: u64,
    pub size_after: u64,
    pub documents_scanned: u64,
    pub documents_kept: u64,
    pub tombstones_removed: u64,
}

impl CompactionStats {
    pub fn space_saved(&self) -> u64 {
        self.size_before.saturating_sub(self.size_after)
    }
}

/// What to do with the frame just read
pub(crate) enum FrameAction {
    Keep,
    Replace(Document),
    Drop,
}

/// Whether to keep evaluating or copy the rest of the file verbatim
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    CopyRest,
}

#[derive(Debug, Default)]
pub(crate) struct PassSummary {
    pub frames_read: u64,
    pub replaced: u64,
    pub dropped: u64,
    pub bytes_before: u64,
    pub bytes_after: u64,
    pub committed: bool,
}

/// `<file>.tmp` that replaces its target on commit and is removed otherwise
struct ReplacementFile {
    target: PathBuf,
    temp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl ReplacementFile {
    fn create(target: &Path) -> Result<Self> {
        let mut name = OsString::from(target.as_os_str());
        name.push(".tmp");
        let temp_path = PathBuf::from(name);
        let file = File::create(&temp_path)?;
        Ok(ReplacementFile {
            target: target.to_path_buf(),
            temp_path,
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    fn writer(&mut self) -> io::Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "replacement file already closed"))
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer()?.write_all(bytes)?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn copy_from<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let copied = io::copy(reader, self.writer()?)?;
        self.written += copied;
        Ok(())
    }

    /// Flush, sync and rename over the target
    fn commit(mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        fs::rename(&self.temp_path, &self.target)?;
        Ok(())
    }
}

impl Drop for ReplacementFile {
    fn drop(&mut self) {
        // After a successful commit the temp path no longer exists
        if self.writer.take().is_some() || self.temp_path.exists() {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Run one rewrite pass. A missing source file yields `Ok(None)` and
/// touches nothing. `commit_when` decides from the summary whether the
/// replacement is renamed into place.
pub(crate) fn rewrite_pass<V, C>(
    path: &Path,
    chunk_size: usize,
    mut visit: V,
    commit_when: C,
) -> Result<Option<PassSummary>>
where
    V: FnMut(&RawFrame) -> Result<(FrameAction, Flow)>,
    C: FnOnce(&PassSummary) -> bool,
{
    let Some(mut frames) = open_frames(path, chunk_size)? else {
        return Ok(None);
    };
    let mut summary = PassSummary {
        bytes_before: fs::metadata(path)?.len(),
        ..PassSummary::default()
    };
    let mut out = ReplacementFile::create(path)?;

    let mut copy_rest = false;
    for frame in frames.by_ref() {
        let frame = frame?;
        summary.frames_read += 1;
        let (action, flow) = visit(&frame).map_err(|err| {
            if err.is_evaluation_error() {
                log_debug!("Rewrite of {} aborted, source kept: {}", path.display(), err);
            }
            err
        })?;
        match action {
            FrameAction::Keep => out.write(frame.as_bytes())?,
            FrameAction::Replace(document) => {
                out.write(&codec::encode_frame(&document)?)?;
                summary.replaced += 1;
            }
            FrameAction::Drop => summary.dropped += 1,
        }
        if flow == Flow::CopyRest {
            copy_rest = true;
            break;
        }
    }

    if copy_rest {
        let (buffered, mut rest) = frames.into_remainder();
        out.write(&buffered)?;
        out.copy_from(&mut rest)?;
    }
    summary.bytes_after = out.written;

    if commit_when(&summary) {
        out.commit()?;
        summary.committed = true;
    } else {
        summary.bytes_after = summary.bytes_before;
    }

    log_debug!(
        "Rewrite of {}: {} frames read, {} replaced, {} dropped, committed={}",
        path.display(),
        summary.frames_read,
        summary.replaced,
        summary.dropped,
        summary.committed
    );
    Ok(Some(summary))
}

fn changed(summary: &PassSummary) -> bool {
    summary.replaced > 0 || summary.dropped > 0
}

/// Tombstone the first live document matching `filter`
pub fn delete_one(path: &Path, filter: &Document, chunk_size: usize) -> Result<u64> {
    let mut deleted = 0;
    rewrite_pass(
        path,
        chunk_size,
        |frame| {
            let mut document = frame.decode()?;
            if document.is_deleted() || !matches_filter(&document, filter)? {
                return Ok((FrameAction::Keep, Flow::Continue));
            }
            document.mark_deleted();
            deleted = 1;
            Ok((FrameAction::Replace(document), Flow::CopyRest))
        },
        changed,
    )?;
    Ok(deleted)
}

/// Tombstone every live document matching `filter`. The whole file is scanned.
pub fn delete_many(path: &Path, filter: &Document, chunk_size: usize) -> Result<u64> {
    let mut deleted = 0;
    rewrite_pass(
        path,
        chunk_size,
        |frame| {
            let mut document = frame.decode()?;
            if document.is_deleted() || !matches_filter(&document, filter)? {
                return Ok((FrameAction::Keep, Flow::Continue));
            }
            document.mark_deleted();
            deleted += 1;
            Ok((FrameAction::Replace(document), Flow::Continue))
        },
        changed,
    )?;
    Ok(deleted)
}

fn returned(
    mode: Option<ReturnDocument>,
    before: &Document,
    after: &Document,
) -> Option<Document> {
    match mode {
        Some(ReturnDocument::Before) => Some(before.clone()),
        Some(ReturnDocument::After) => Some(after.clone()),
        None => None,
    }
}

/// Update the first live document matching `filter`; later frames are
/// copied without being evaluated
pub fn update_one(
    path: &Path,
    filter: &Document,
    update: &Document,
    return_document: Option<ReturnDocument>,
    chunk_size: usize,
) -> Result<UpdateResult> {
    let mut result = UpdateResult::default();
    rewrite_pass(
        path,
        chunk_size,
        |frame| {
            let document = frame.decode()?;
            if document.is_deleted() || !matches_filter(&document, filter)? {
                return Ok((FrameAction::Keep, Flow::Continue));
            }
            let updated = apply_update(&document, update)?;
            result.matched_count = 1;
            result.document = returned(return_document, &document, &updated);
            if updated == document {
                return Ok((FrameAction::Keep, Flow::CopyRest));
            }
            result.modified_count = 1;
            Ok((FrameAction::Replace(updated), Flow::CopyRest))
        },
        changed,
    )?;
    Ok(result)
}

/// Update every live document matching `filter`
pub fn update_many(
    path: &Path,
    filter: &Document,
    update: &Document,
    return_document: Option<ReturnDocument>,
    chunk_size: usize,
) -> Result<UpdateResult> {
    let mut result = UpdateResult::default();
    rewrite_pass(
        path,
        chunk_size,
        |frame| {
            let document = frame.decode()?;
            if document.is_deleted() || !matches_filter(&document, filter)? {
                return Ok((FrameAction::Keep, Flow::Continue));
            }
            let updated = apply_update(&document, update)?;
            result.matched_count += 1;
            result.document = returned(return_document, &document, &updated);
            if updated == document {
                return Ok((FrameAction::Keep, Flow::Continue));
            }
            result.modified_count += 1;
            Ok((FrameAction::Replace(updated), Flow::Continue))
        },
        changed,
    )?;
    Ok(result)
}

/// Drop tombstoned frames and copy the rest verbatim. Torn trailing bytes
/// are dropped as well. A missing file is a no-op.
pub fn compact(path: &Path, chunk_size: usize) -> Result<CompactionStats> {
    let mut stats = CompactionStats::default();
    let summary = rewrite_pass(
        path,
        chunk_size,
        |frame| {
            stats.documents_scanned += 1;
            if frame.decode()?.is_deleted() {
                stats.tombstones_removed += 1;
                Ok((FrameAction::Drop, Flow::Continue))
            } else {
                stats.documents_kept += 1;
                Ok((FrameAction::Keep, Flow::Continue))
            }
        },
        |summary| summary.bytes_after != summary.bytes_before,
    )?;

    if let Some(summary) = summary {
        stats.size_before = summary.bytes_before;
        stats.size_after = summary.bytes_after;
        if summary.committed {
            log_info!(
                "Compacted {}: {} tombstones removed, {} bytes saved",
                path.display(),
                stats.tombstones_removed,
                stats.space_saved()
            );
        }
    }
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BisonError;
    use crate::stream::DocumentReader;
    use crate::value::Value;
    use crate::writer::append_many;
    use serde_json::json;
    use tempfile::TempDir;

    const CHUNK: usize = 5;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_json(&value).unwrap()
    }

    fn seed(dir: &TempDir, docs: Vec<serde_json::Value>) -> PathBuf {
        let path = dir.path().join("items.bson");
        append_many(&path, docs.into_iter().map(doc).collect()).unwrap();
        path
    }

    fn read_all(path: &Path) -> Vec<Document> {
        DocumentReader::new(File::open(path).unwrap(), 3)
            .collect::<Result<_>>()
            .unwrap()
    }

    fn names(path: &Path, include_deleted: bool) -> Vec<String> {
        read_all(path)
            .into_iter()
            .filter(|d| include_deleted || !d.is_deleted())
            .map(|d| d.get("name").and_then(Value::as_str).unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_delete_one_tombstones_first_match_only() {
        let dir = TempDir::new().unwrap();
        let path = seed(&dir, vec![
            json!({"name": "a", "k": 1}),
            json!({"name": "b", "k": 1}),
            json!({"name": "c", "k": 1}),
        ]);
        assert_eq!(delete_one(&path, &doc(json!({"k": 1})), CHUNK).unwrap(), 1);
        assert_eq!(names(&path, false), ["b", "c"]);
        assert_eq!(names(&path, true), ["a", "b", "c"]);
        assert!(!dir.path().join("items.bson.tmp").exists());
    }

    #[test]
    fn test_delete_one_skips_tombstones() {
        let dir = TempDir::new().unwrap();
        let path = seed(&dir, vec![json!({"name": "a"}), json!({"name": "a"})]);
        delete_one(&path, &doc(json!({"name": "a"})), CHUNK).unwrap();
        delete_one(&path, &doc(json!({"name": "a"})), CHUNK).unwrap();
        assert!(names(&path, false).is_empty());
        assert_eq!(delete_one(&path, &doc(json!({"name": "a"})), CHUNK).unwrap(), 0);
    }

    #[test]
    fn test_delete_many_scans_whole_file() {
        let dir = TempDir::new().unwrap();
        let docs = (0..40).map(|i| json!({"name": format!("n{}", i), "even": i % 2 == 0})).collect();
        let path = seed(&dir, docs);
        let deleted = delete_many(&path, &doc(json!({"even": true})), 1).unwrap();
        assert_eq!(deleted, 20);
        assert_eq!(names(&path, false).len(), 20);
    }

    #[test]
    fn test_no_match_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = seed(&dir, vec![json!({"name": "a"}), json!({"name": "b"})]);
        let before = fs::read(&path).unwrap();
        assert_eq!(delete_many(&path, &doc(json!({"name": "z"})), CHUNK).unwrap(), 0);
        let result = update_many(&path, &doc(json!({"name": "z"})), &doc(json!({"$set": {"x": 1}})), None, CHUNK).unwrap();
        assert_eq!(result, UpdateResult::default());
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_missing_file_reports_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing.bson");
        let filter = doc(json!({}));
        assert_eq!(delete_one(&path, &filter, CHUNK).unwrap(), 0);
        assert_eq!(delete_many(&path, &filter, CHUNK).unwrap(), 0);
        let update = doc(json!({"$set": {"a": 1}}));
        assert_eq!(update_one(&path, &filter, &update, None, CHUNK).unwrap().matched_count, 0);
        assert_eq!(compact(&path, CHUNK).unwrap(), CompactionStats::default());
        assert!(!path.exists());
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_update_one_return_modes() {
        let dir = TempDir::new().unwrap();
        let path = seed(&dir, vec![json!({"name": "a", "qty": 1}), json!({"name": "a", "qty": 2})]);
        let filter = doc(json!({"name": "a"}));
        let update = doc(json!({"$inc": {"qty": 10}}));

        let before = update_one(&path, &filter, &update, Some(ReturnDocument::Before), CHUNK).unwrap();
        assert_eq!(before.matched_count, 1);
        assert_eq!(before.modified_count, 1);
        assert_eq!(before.document.unwrap().get("qty"), Some(&Value::Int(1)));

        let after = update_one(&path, &filter, &update, Some(ReturnDocument::After), CHUNK).unwrap();
        assert_eq!(after.document.unwrap().get("qty"), Some(&Value::Int(21)));

        let qtys: Vec<i64> = read_all(&path).iter().map(|d| d.get("qty").and_then(Value::as_i64).unwrap()).collect();
        assert_eq!(qtys, vec![21, 2]);
    }

    #[test]
    fn test_update_many_counts_modified_by_deep_equality() {
        let dir = TempDir::new().unwrap();
        let path = seed(&dir, vec![
            json!({"name": "a", "status": "on"}),
            json!({"name": "b", "status": "off"}),
            json!({"name": "c", "status": "off"}),
        ]);
        let result = update_many(&path, &doc(json!({})), &doc(json!({"$set": {"status": "off"}})), Some(ReturnDocument::After), CHUNK).unwrap();
        assert_eq!(result.matched_count, 3);
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.document.unwrap().get("name"), Some(&Value::from("c")));
    }

    #[test]
    fn test_update_preserves_order_and_identity() {
        let dir = TempDir::new().unwrap();
        let path = seed(&dir, vec![json!({"name": "a"}), json!({"name": "b"}), json!({"name": "c"})]);
        let ids: Vec<Value> = read_all(&path).iter().map(|d| d.id().cloned().unwrap()).collect();
        update_one(&path, &doc(json!({"name": "b"})), &doc(json!({"$set": {"name": "B"}})), None, CHUNK).unwrap();
        let after = read_all(&path);
        assert_eq!(names(&path, false), ["a", "B", "c"]);
        let ids_after: Vec<Value> = after.iter().map(|d| d.id().cloned().unwrap()).collect();
        assert_eq!(ids, ids_after);
    }

    #[test]
    fn test_evaluation_error_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = seed(&dir, vec![json!({"name": "a"}), json!({"name": "b"})]);
        let before = fs::read(&path).unwrap();

        let err = update_many(&path, &doc(json!({})), &doc(json!({"$inc": {"name": "x"}})), None, CHUNK).unwrap_err();
        assert!(matches!(err, BisonError::Validation(_)));
        let err = delete_many(&path, &doc(json!({"name": {"$bogus": 1}})), CHUNK).unwrap_err();
        assert!(matches!(err, BisonError::UnsupportedOperator(_)));

        assert_eq!(fs::read(&path).unwrap(), before);
        assert!(!dir.path().join("items.bson.tmp").exists());
    }

    #[test]
    fn test_compact_removes_tombstones() {
        let dir = TempDir::new().unwrap();
        let path = seed(&dir, vec![json!({"name": "a"}), json!({"name": "b"}), json!({"name": "c"})]);
        delete_one(&path, &doc(json!({"name": "b"})), CHUNK).unwrap();

        let stats = compact(&path, CHUNK).unwrap();
        assert_eq!(stats.documents_scanned, 3);
        assert_eq!(stats.documents_kept, 2);
        assert_eq!(stats.tombstones_removed, 1);
        assert!(stats.space_saved() > 0);
        assert_eq!(stats.size_after, fs::metadata(&path).unwrap().len());
        assert_eq!(names(&path, true), ["a", "c"]);
    }

    #[test]
    fn test_compact_without_tombstones_is_byte_identical() {
        let dir = TempDir::new().unwrap();
        let path = seed(&dir, vec![json!({"name": "a"}), json!({"name": "b"})]);
        let before = fs::read(&path).unwrap();
        let stats = compact(&path, CHUNK).unwrap();
        assert_eq!(stats.tombstones_removed, 0);
        assert_eq!(stats.space_saved(), 0);
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_compact_drops_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = seed(&dir, vec![json!({"name": "a"})]);
        let clean = fs::read(&path).unwrap();
        let mut torn = clean.clone();
        torn.extend_from_slice(&[40, 0, 0, 0, 1, 2]);
        fs::write(&path, &torn).unwrap();

        compact(&path, CHUNK).unwrap();
        assert_eq!(fs::read(&path).unwrap(), clean);
    }
}
