/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Random-access and ordered-traversal reads over one revlog.
//!
//! A [`RevlogStream`] wraps a `.i` index file and its optional `.d` data
//! counterpart. Revision payloads are stored either as full snapshots or
//! as patches against the previous revision, so reconstructing revision
//! `r` means replaying patches from the chain's base snapshot. The
//! traversal keeps the most recent reconstruction around as a rolling
//! base, which makes reads of adjacent revisions cheap.

use std::io;
use std::path::Path;
use std::path::PathBuf;

use crate::chunk::Chunk;
use crate::chunk::Inflater;
use crate::errors::Result;
use crate::errors::RevlogError;
use crate::index::offset_field_to_inline_file_offset;
use crate::index::IndexRecord;
use crate::index::Outline;
use crate::inspector::Inspector;
use crate::inspector::RevisionEntry;
use crate::nodeid::Nodeid;
use crate::patch::Patch;
use crate::source::DataSource;
use crate::source::SliceSource;
use crate::source::StreamProvider;

/// Sentinel revision meaning "the last revision in the revlog".
pub const TIP: i32 = -3;

/// Sentinel returned by [`RevlogStream::find_revision_index`] when a
/// nodeid is not present.
pub const BAD_REVISION: i32 = i32::MIN;

/// One revlog on disk: the `.i` file plus, for the split layout, the `.d`
/// file next to it. The index outline (delta-chain bases and, inline,
/// physical record offsets) is built lazily on first use and kept for the
/// lifetime of the handle.
///
/// A handle is single-threaded; clone-free concurrent use is not
/// supported. Only one traversal may be active at a time.
pub struct RevlogStream {
    provider: StreamProvider,
    index_path: PathBuf,
    data_path: PathBuf,
    outline: Option<Outline>,
}

impl RevlogStream {
    pub fn new(index_path: impl Into<PathBuf>) -> Self {
        Self::with_provider(StreamProvider::default(), index_path)
    }

    pub fn with_provider(provider: StreamProvider, index_path: impl Into<PathBuf>) -> Self {
        let index_path = index_path.into();
        let data_path = data_path_for(&index_path);
        RevlogStream {
            provider,
            index_path,
            data_path,
            outline: None,
        }
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    /// The `.d` counterpart of the index file. Only meaningful when the
    /// revlog is not inline.
    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn is_inline(&mut self) -> Result<bool> {
        self.init_outline()?;
        Ok(self.outline_ref()?.inline)
    }

    pub fn revision_count(&mut self) -> Result<usize> {
        self.init_outline()?;
        Ok(self.outline_ref()?.count())
    }

    /// Uncompressed length of a revision's payload, read from the index
    /// alone.
    pub fn data_length(&mut self, rev: i32) -> Result<u32> {
        let record_offset = self.record_offset_of(rev)?;
        let mut src = self.index_source()?;
        src.seek(record_offset + 12)
            .map_err(|err| self.index_read_err(err))?;
        src.read_u32().map_err(|err| self.index_read_err(err))
    }

    pub fn nodeid(&mut self, rev: i32) -> Result<Nodeid> {
        let record_offset = self.record_offset_of(rev)?;
        let mut src = self.index_source()?;
        src.seek(record_offset + 32)
            .map_err(|err| self.index_read_err(err))?;
        let mut buf = [0u8; 20];
        src.read_exact(&mut buf)
            .map_err(|err| self.index_read_err(err))?;
        Ok(Nodeid::from_byte_array(buf))
    }

    pub fn link_revision(&mut self, rev: i32) -> Result<i32> {
        let record_offset = self.record_offset_of(rev)?;
        let mut src = self.index_source()?;
        src.seek(record_offset + 20)
            .map_err(|err| self.index_read_err(err))?;
        Ok(src.read_u32().map_err(|err| self.index_read_err(err))? as i32)
    }

    /// Linear scan of the index for a nodeid. Returns [`BAD_REVISION`]
    /// when the node is not present.
    pub fn find_revision_index(&mut self, nodeid: &Nodeid) -> Result<i32> {
        self.init_outline()?;
        let outline = self.outline_ref()?;
        let count = outline.count();
        let inline = outline.inline;
        let mut src = self.index_source()?;
        let mut buf = [0u8; 20];
        for rev in 0..count {
            src.skip(8).map_err(|err| self.index_read_err(err))?;
            let compressed_len = src.read_u32().map_err(|err| self.index_read_err(err))?;
            src.skip(20).map_err(|err| self.index_read_err(err))?;
            src.read_exact(&mut buf)
                .map_err(|err| self.index_read_err(err))?;
            if nodeid.as_bytes() == &buf[..] {
                return Ok(rev as i32);
            }
            let tail = if inline { 12 + compressed_len as u64 } else { 12 };
            src.skip(tail).map_err(|err| self.index_read_err(err))?;
        }
        tracing::trace!(node = %nodeid.short_hex(), "nodeid not present in revlog");
        Ok(BAD_REVISION)
    }

    /// Value for the offset field of the next appended record. This is
    /// the logical data offset, not a physical file position (the two
    /// differ for inline revlogs).
    pub fn new_entry_offset(&mut self) -> Result<u64> {
        self.init_outline()?;
        let outline = self.outline_ref()?;
        let count = outline.count();
        if count == 0 {
            return Ok(0);
        }
        let last = count - 1;
        let record_offset = outline.record_offset(last);
        let mut src = self.index_source()?;
        src.seek(record_offset)
            .map_err(|err| self.index_read_err(err))?;
        let word = src.read_u64().map_err(|err| self.index_read_err(err))?;
        let compressed_len = src.read_u32().map_err(|err| self.index_read_err(err))?;
        // Revision 0's offset field is overlaid by the header; its
        // payload starts at logical offset 0.
        Ok(if last == 0 {
            compressed_len as u64
        } else {
            (word >> 16) + compressed_len as u64
        })
    }

    /// Visit revisions `start..=end` in ascending order. [`TIP`] is
    /// accepted for either endpoint. With `need_data` unset only the
    /// index is walked and inspectors see an empty payload.
    pub fn iterate_range(
        &mut self,
        start: i32,
        end: i32,
        need_data: bool,
        inspector: &mut dyn Inspector,
    ) -> Result<()> {
        self.init_outline()?;
        let outline = self.outline_ref()?;
        let count = outline.count();
        if count == 0 {
            return Ok(());
        }
        let end = resolve_revision(end, count)?;
        let start = resolve_revision(start, count)?;
        if start > end {
            return Err(RevlogError::InvalidRevision {
                rev: start as i32,
                count,
            });
        }
        tracing::trace!(start, end, need_data, "iterating revlog range");
        let mut reader = Reader::new(self, outline, need_data, inspector)?;
        reader.start(end - start + 1);
        let result = reader.range(start, end);
        reader.finish();
        result.map(|_| ())
    }

    /// Visit an ascending set of revisions. Maximal runs of consecutive
    /// indices share one pass over the delta chain, and the rolling
    /// snapshot carries over between runs whenever the next run's chain
    /// passes through the last revision read.
    pub fn iterate_set(
        &mut self,
        sorted_revisions: &[i32],
        need_data: bool,
        inspector: &mut dyn Inspector,
    ) -> Result<()> {
        self.init_outline()?;
        let outline = self.outline_ref()?;
        let count = outline.count();
        if count == 0 || sorted_revisions.is_empty() {
            return Ok(());
        }
        for &rev in &[
            sorted_revisions[0],
            sorted_revisions[sorted_revisions.len() - 1],
        ] {
            if rev < 0 || rev as usize >= count {
                return Err(RevlogError::InvalidRevision { rev, count });
            }
        }
        tracing::trace!(
            revisions = sorted_revisions.len(),
            need_data,
            "iterating revlog set"
        );
        let mut reader = Reader::new(self, outline, need_data, inspector)?;
        reader.start(sorted_revisions.len());
        let mut result = Ok(true);
        let mut i = 0;
        while i < sorted_revisions.len() {
            let run_start = i;
            i += 1;
            while i < sorted_revisions.len() && sorted_revisions[i] == sorted_revisions[i - 1] + 1 {
                i += 1;
            }
            match reader.range(
                sorted_revisions[run_start] as usize,
                sorted_revisions[i - 1] as usize,
            ) {
                Ok(true) => {}
                other => {
                    result = other;
                    break;
                }
            }
        }
        reader.finish();
        result.map(|_| ())
    }

    /// Fix up the cached outline after the writer appended a record.
    /// `offset_field` is the logical offset stored in the new record's
    /// header. A handle that has not materialized its outline has nothing
    /// to do.
    pub fn revision_added(
        &mut self,
        rev: i32,
        nodeid: &Nodeid,
        base_revision: i32,
        offset_field: u64,
    ) -> Result<()> {
        let cached = matches!(&self.outline, Some(o) if !o.base_revisions.is_empty());
        if !cached {
            return Ok(());
        }
        let (count, inline) = {
            let outline = self.outline_ref()?;
            (outline.count(), outline.inline)
        };
        if rev < 0 || rev as usize != count {
            return Err(RevlogError::inconsistent_append(
                &self.index_path,
                format!("new entry's index shall be {}, not {}", count, rev),
            ));
        }
        // base == count is legal: the new revision is based on itself.
        if base_revision < 0 || base_revision as usize > count {
            return Err(RevlogError::inconsistent_append(
                &self.index_path,
                format!(
                    "base revision index {} does not fit [0..{}]",
                    base_revision, count
                ),
            ));
        }
        if nodeid.is_null() {
            return Err(RevlogError::inconsistent_append(
                &self.index_path,
                "appended revision has the null nodeid",
            ));
        }
        let physical = if inline {
            Some(
                offset_field_to_inline_file_offset(offset_field, count).ok_or_else(|| {
                    RevlogError::corrupt(&self.index_path, "inline record offset does not fit 32 bits")
                })?,
            )
        } else {
            None
        };
        if let Some(outline) = self.outline.as_mut() {
            outline.base_revisions.push(base_revision);
            if let (Some(offsets), Some(physical)) = (outline.record_offsets.as_mut(), physical) {
                debug_assert_eq!(offsets.len(), count);
                offsets.push(physical);
            }
        }
        Ok(())
    }

    fn init_outline(&mut self) -> Result<()> {
        let outline = match self.outline.take() {
            // An empty outline is not cached: the revlog may have been
            // populated since the last look.
            Some(outline) if !outline.base_revisions.is_empty() => outline,
            _ => {
                let mut src = self.index_source()?;
                let outline = Outline::read(src.as_mut(), &self.index_path)?;
                tracing::debug!(
                    path = %self.index_path.display(),
                    revisions = outline.count(),
                    inline = outline.inline,
                    "revlog outline built"
                );
                outline
            }
        };
        self.outline = Some(outline);
        Ok(())
    }

    fn outline_ref(&self) -> Result<&Outline> {
        self.outline
            .as_ref()
            .ok_or_else(|| RevlogError::corrupt(&self.index_path, "revlog outline not initialized"))
    }

    fn record_offset_of(&mut self, rev: i32) -> Result<u64> {
        self.init_outline()?;
        let outline = self.outline_ref()?;
        let rev = resolve_revision(rev, outline.count())?;
        Ok(outline.record_offset(rev))
    }

    fn index_source(&self) -> Result<Box<dyn DataSource>> {
        self.provider.open(&self.index_path).map_err(|err| RevlogError::Io {
            path: self.index_path.clone(),
            source: err,
        })
    }

    fn data_source(&self) -> Result<Box<dyn DataSource>> {
        self.provider.open(&self.data_path).map_err(|err| RevlogError::Io {
            path: self.data_path.clone(),
            source: err,
        })
    }

    fn index_read_err(&self, err: io::Error) -> RevlogError {
        RevlogError::from_read(&self.index_path, err)
    }
}

fn resolve_revision(rev: i32, count: usize) -> Result<usize> {
    let last = count as i64 - 1;
    let resolved = if rev == TIP { last } else { i64::from(rev) };
    if resolved < 0 || resolved > last {
        return Err(RevlogError::InvalidRevision { rev, count });
    }
    Ok(resolved as usize)
}

/// Derive the `.d` path: the trailing character of the index file name
/// flips from `i` to `d`.
fn data_path_for(index_path: &Path) -> PathBuf {
    match index_path.file_name().and_then(|name| name.to_str()) {
        Some(name) if !name.is_empty() => {
            index_path.with_file_name(format!("{}d", &name[..name.len() - 1]))
        }
        _ => index_path.with_extension("d"),
    }
}

/// One traversal: open streams, a reusable inflater, and the rolling
/// snapshot. Lives for a single `iterate_*` call; `range` may run several
/// times (once per run of a set iteration).
struct Reader<'a> {
    outline: &'a Outline,
    index_path: &'a Path,
    data_path: &'a Path,
    need_data: bool,
    inspector: &'a mut dyn Inspector,
    da_index: Box<dyn DataSource>,
    da_data: Option<Box<dyn DataSource>>,
    inflater: Inflater,
    has_lifecycle: bool,
    last_revision_read: Option<usize>,
    last_user_data: Option<Vec<u8>>,
}

impl<'a> Reader<'a> {
    fn new(
        stream: &'a RevlogStream,
        outline: &'a Outline,
        need_data: bool,
        inspector: &'a mut dyn Inspector,
    ) -> Result<Reader<'a>> {
        let da_index = stream.index_source()?;
        let da_data = if need_data && !outline.inline {
            Some(stream.data_source()?)
        } else {
            None
        };
        Ok(Reader {
            outline,
            index_path: &stream.index_path,
            data_path: &stream.data_path,
            need_data,
            inspector,
            da_index,
            da_data,
            inflater: Inflater::new(),
            has_lifecycle: false,
            last_revision_read: None,
            last_user_data: None,
        })
    }

    fn start(&mut self, total_work: usize) {
        if let Some(lifecycle) = self.inspector.as_lifecycle() {
            lifecycle.start(total_work);
            self.has_lifecycle = true;
        }
    }

    /// Invoked once per traversal, on every exit path. Streams are
    /// released when the reader is dropped.
    fn finish(&mut self) {
        self.last_user_data = None;
        if self.has_lifecycle {
            if let Some(lifecycle) = self.inspector.as_lifecycle() {
                lifecycle.finish();
            }
        }
    }

    /// Walk `start..=end`, invoking the inspector for each revision in
    /// the requested window. Returns `false` when the inspector asked to
    /// stop.
    fn range(&mut self, start: usize, end: usize) -> Result<bool> {
        let mut first = start;
        if self.need_data {
            let base = self.outline.base_revision(start) as usize;
            if base < start {
                match self.last_revision_read {
                    // The rolling snapshot sits inside this chain: pick
                    // up right after it instead of replaying from the
                    // base.
                    Some(last) if base <= last && last < start => {
                        tracing::trace!(start, resume_at = last + 1, "reusing cached snapshot");
                        first = last + 1;
                    }
                    _ => {
                        self.last_user_data = None;
                        first = base;
                    }
                }
            } else {
                self.last_user_data = None;
            }
        }

        for rev in first..=end {
            self.da_index
                .seek(self.outline.record_offset(rev))
                .map_err(|err| RevlogError::from_read(self.index_path, err))?;
            let record = IndexRecord::read(self.da_index.as_mut(), rev)
                .map_err(|err| RevlogError::from_read(self.index_path, err))?;

            let mut current: Option<Vec<u8>> = None;
            if self.need_data {
                let is_patch = record.base_revision != rev as i32;
                let payload_path = if self.outline.inline {
                    self.index_path
                } else {
                    self.data_path
                };
                let chunk = if self.outline.inline {
                    // The payload sits right behind the record, where the
                    // index cursor now is.
                    Chunk::read(self.da_index.as_mut(), record.compressed_len as usize)
                        .map_err(|err| RevlogError::from_read(self.index_path, err))?
                } else {
                    let da_data = self
                        .da_data
                        .as_mut()
                        .expect("data stream opened for split layout");
                    da_data
                        .seek(record.offset)
                        .map_err(|err| RevlogError::from_read(self.data_path, err))?;
                    Chunk::read(da_data.as_mut(), record.compressed_len as usize)
                        .map_err(|err| RevlogError::from_read(self.data_path, err))?
                };

                if is_patch {
                    let patch_bytes = self
                        .materialize(chunk, None)
                        .map_err(|err| RevlogError::from_read(payload_path, err))?;
                    let previous = self.last_user_data.take().ok_or_else(|| {
                        RevlogError::corrupt(
                            self.index_path,
                            format!("revision {} is a patch with no base snapshot", rev),
                        )
                    })?;
                    if patch_bytes.is_empty() {
                        // An empty patch changes nothing: the previous
                        // snapshot moves through unchanged.
                        if previous.len() != record.actual_len as usize {
                            return Err(RevlogError::corrupt(
                                payload_path,
                                format!(
                                    "empty patch for revision {} expects {} bytes, base has {}",
                                    rev,
                                    record.actual_len,
                                    previous.len()
                                ),
                            ));
                        }
                        current = Some(previous);
                    } else {
                        let patch = Patch::parse(&patch_bytes)
                            .map_err(|err| RevlogError::corrupt(payload_path, err.to_string()))?;
                        let patched = patch
                            .apply(&previous, record.actual_len as usize)
                            .map_err(|err| RevlogError::corrupt(payload_path, err.to_string()))?;
                        current = Some(patched);
                    }
                } else {
                    let snapshot = self
                        .materialize(chunk, Some(record.actual_len as usize))
                        .map_err(|err| RevlogError::from_read(payload_path, err))?;
                    if snapshot.len() != record.actual_len as usize {
                        return Err(RevlogError::corrupt(
                            payload_path,
                            format!(
                                "revision {} snapshot is {} bytes, expected {}",
                                rev,
                                snapshot.len(),
                                record.actual_len
                            ),
                        ));
                    }
                    current = Some(snapshot);
                }
            }

            if rev >= start {
                let entry = RevisionEntry {
                    revision: rev as i32,
                    actual_len: record.actual_len,
                    base_revision: record.base_revision,
                    link_revision: record.link_revision,
                    parent1: record.parent1,
                    parent2: record.parent2,
                    nodeid: record.nodeid,
                };
                let payload = current.as_deref().unwrap_or(&[]);
                let mut view = SliceSource::new(payload);
                self.inspector
                    .next(&entry, &mut view)
                    .map_err(RevlogError::Inspector)?;
                if self.has_lifecycle {
                    if let Some(lifecycle) = self.inspector.as_lifecycle() {
                        if lifecycle.stop_requested() {
                            return Ok(false);
                        }
                    }
                }
            }

            if self.need_data {
                self.last_user_data = current;
            }
        }
        self.last_revision_read = Some(end);
        Ok(true)
    }

    fn materialize(&mut self, chunk: Chunk, size_hint: Option<usize>) -> io::Result<Vec<u8>> {
        chunk.into_bytes(&mut self.inflater, size_hint)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use std::path::PathBuf;

    use byteorder::BigEndian;
    use byteorder::WriteBytesExt;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    use super::*;
    use crate::index::Features;
    use crate::inspector::Lifecycle;
    use crate::nodeid::NULL_ID;

    fn zlib(data: &[u8]) -> Vec<u8> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    fn literal(data: &[u8]) -> Vec<u8> {
        let mut out = vec![b'u'];
        out.extend_from_slice(data);
        out
    }

    fn hunk(start: u32, end: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.write_u32::<BigEndian>(start).unwrap();
        out.write_u32::<BigEndian>(end).unwrap();
        out.write_u32::<BigEndian>(data.len() as u32).unwrap();
        out.extend_from_slice(data);
        out
    }

    struct BuiltEntry {
        payload: Vec<u8>,
        actual_len: u32,
        base: u32,
        link: u32,
        p1: i32,
        p2: i32,
        node: Nodeid,
    }

    /// Writes syntactically valid revlogs for the tests. Payloads are
    /// supplied already encoded.
    #[derive(Default)]
    struct Builder {
        entries: Vec<BuiltEntry>,
    }

    impl Builder {
        fn add(mut self, base: u32, actual_len: u32, payload: Vec<u8>) -> Self {
            let rev = self.entries.len();
            self.entries.push(BuiltEntry {
                payload,
                actual_len,
                base,
                link: rev as u32,
                p1: rev as i32 - 1,
                p2: -1,
                node: Nodeid::from_byte_array([rev as u8 + 1; 20]),
            });
            self
        }

        fn write(&self, dir: &Path, name: &str, inline: bool) -> PathBuf {
            let index_path = dir.join(format!("{}.i", name));
            let mut index = Vec::new();
            let mut data = Vec::new();
            let mut offset = 0u64;
            for (rev, entry) in self.entries.iter().enumerate() {
                let word = if rev == 0 {
                    let features = if inline { Features::INLINE.bits() } else { 0 };
                    (u64::from(features) << 48) | (1u64 << 32)
                } else {
                    offset << 16
                };
                index.write_u64::<BigEndian>(word).unwrap();
                index
                    .write_u32::<BigEndian>(entry.payload.len() as u32)
                    .unwrap();
                index.write_u32::<BigEndian>(entry.actual_len).unwrap();
                index.write_u32::<BigEndian>(entry.base).unwrap();
                index.write_u32::<BigEndian>(entry.link).unwrap();
                index.write_u32::<BigEndian>(entry.p1 as u32).unwrap();
                index.write_u32::<BigEndian>(entry.p2 as u32).unwrap();
                index.extend_from_slice(entry.node.as_bytes());
                index.extend_from_slice(&[0u8; 12]);
                if inline {
                    index.extend_from_slice(&entry.payload);
                } else {
                    data.extend_from_slice(&entry.payload);
                }
                offset += entry.payload.len() as u64;
            }
            fs::write(&index_path, &index).unwrap();
            if !inline {
                fs::write(data_path_for(&index_path), &data).unwrap();
            }
            index_path
        }
    }

    /// A four-revision chain: a base and three one-byte appends.
    fn chain() -> Builder {
        Builder::default()
            .add(0, 4, literal(b"0123"))
            .add(0, 5, hunk(4, 4, b"4"))
            .add(0, 6, hunk(5, 5, b"5"))
            .add(0, 7, hunk(6, 6, b"6"))
    }

    #[derive(Default)]
    struct Collect {
        visits: Vec<(RevisionEntry, Vec<u8>)>,
    }

    impl Collect {
        fn bytes(&self) -> Vec<Vec<u8>> {
            self.visits.iter().map(|(_, data)| data.clone()).collect()
        }

        fn revisions(&self) -> Vec<i32> {
            self.visits.iter().map(|(entry, _)| entry.revision).collect()
        }
    }

    impl Inspector for Collect {
        fn next(&mut self, entry: &RevisionEntry, data: &mut dyn DataSource) -> anyhow::Result<()> {
            let mut buf = vec![0u8; data.len() as usize];
            data.read_exact(&mut buf)?;
            self.visits.push((*entry, buf));
            Ok(())
        }
    }

    struct StopAfter {
        limit: usize,
        visited: Vec<i32>,
        started: Option<usize>,
        finished: bool,
    }

    impl StopAfter {
        fn new(limit: usize) -> Self {
            StopAfter {
                limit,
                visited: Vec::new(),
                started: None,
                finished: false,
            }
        }
    }

    impl Inspector for StopAfter {
        fn next(&mut self, entry: &RevisionEntry, _data: &mut dyn DataSource) -> anyhow::Result<()> {
            self.visited.push(entry.revision);
            Ok(())
        }

        fn as_lifecycle(&mut self) -> Option<&mut dyn Lifecycle> {
            Some(self)
        }
    }

    impl Lifecycle for StopAfter {
        fn start(&mut self, total_work: usize) {
            self.started = Some(total_work);
        }

        fn finish(&mut self) {
            self.finished = true;
        }

        fn stop_requested(&self) -> bool {
            self.visited.len() >= self.limit
        }
    }

    struct FailOn {
        rev: i32,
        visited: Vec<i32>,
    }

    impl Inspector for FailOn {
        fn next(&mut self, entry: &RevisionEntry, _data: &mut dyn DataSource) -> anyhow::Result<()> {
            if entry.revision == self.rev {
                anyhow::bail!("inspector refused revision {}", entry.revision);
            }
            self.visited.push(entry.revision);
            Ok(())
        }
    }

    #[test]
    fn test_empty_revlog() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.i");
        fs::write(&path, b"").unwrap();

        let mut stream = RevlogStream::new(&path);
        assert_eq!(stream.revision_count().unwrap(), 0);
        assert!(stream.is_inline().unwrap());

        let mut collect = Collect::default();
        stream.iterate_range(0, TIP, true, &mut collect).unwrap();
        stream.iterate_set(&[], true, &mut collect).unwrap();
        assert!(collect.visits.is_empty());
        assert_eq!(stream.new_entry_offset().unwrap(), 0);
    }

    #[test]
    fn test_missing_index_reads_as_empty() {
        let dir = tempdir().unwrap();
        let mut stream = RevlogStream::new(dir.path().join("absent.i"));
        assert_eq!(stream.revision_count().unwrap(), 0);
        let mut collect = Collect::default();
        stream.iterate_range(0, TIP, true, &mut collect).unwrap();
        assert!(collect.visits.is_empty());
    }

    #[test]
    fn test_single_zlib_base() {
        let dir = tempdir().unwrap();
        let path = Builder::default()
            .add(0, 5, zlib(b"hello"))
            .write(dir.path(), "one", true);

        let mut stream = RevlogStream::new(&path);
        let mut collect = Collect::default();
        stream.iterate_range(0, 0, true, &mut collect).unwrap();
        assert_eq!(collect.visits.len(), 1);
        let (entry, data) = &collect.visits[0];
        assert_eq!(entry.revision, 0);
        assert_eq!(entry.actual_len, 5);
        assert_eq!(entry.base_revision, 0);
        assert_eq!(entry.link_revision, 0);
        assert_eq!(entry.parent1, -1);
        assert_eq!(entry.parent2, -1);
        assert_eq!(entry.nodeid, Nodeid::from_byte_array([1u8; 20]));
        assert_eq!(data, b"hello");
    }

    #[test]
    fn test_base_plus_delta() {
        for inline in [true, false] {
            let dir = tempdir().unwrap();
            let path = Builder::default()
                .add(0, 6, literal(b"abcdef"))
                .add(0, 5, hunk(2, 4, b"X"))
                .write(dir.path(), "two", inline);

            let mut stream = RevlogStream::new(&path);
            let mut collect = Collect::default();
            stream.iterate_range(0, 1, true, &mut collect).unwrap();
            assert_eq!(collect.bytes(), vec![b"abcdef".to_vec(), b"abXef".to_vec()]);
        }
    }

    #[test]
    fn test_layout_equivalence() {
        let dir = tempdir().unwrap();
        let inline_path = chain().write(dir.path(), "inl", true);
        let split_path = chain().write(dir.path(), "spl", false);

        let mut inline_visits = Collect::default();
        RevlogStream::new(&inline_path)
            .iterate_range(0, TIP, true, &mut inline_visits)
            .unwrap();
        let mut split_visits = Collect::default();
        RevlogStream::new(&split_path)
            .iterate_range(0, TIP, true, &mut split_visits)
            .unwrap();

        assert_eq!(inline_visits.visits, split_visits.visits);
        assert_eq!(inline_visits.bytes().last().unwrap(), b"0123456");
    }

    #[test]
    fn test_set_matches_range() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "chain", true);

        let mut by_range = Collect::default();
        RevlogStream::new(&path)
            .iterate_range(0, TIP, true, &mut by_range)
            .unwrap();
        let mut by_set = Collect::default();
        RevlogStream::new(&path)
            .iterate_set(&[0, 1, 2, 3], true, &mut by_set)
            .unwrap();

        assert_eq!(by_range.visits, by_set.visits);
        assert_eq!(by_range.revisions(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_set_skips_and_reuses_snapshot() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "chain", true);

        let mut collect = Collect::default();
        RevlogStream::new(&path)
            .iterate_set(&[1, 3], true, &mut collect)
            .unwrap();
        assert_eq!(collect.revisions(), vec![1, 3]);
        assert_eq!(
            collect.bytes(),
            vec![b"01234".to_vec(), b"0123456".to_vec()]
        );
    }

    #[test]
    fn test_snapshot_determinism() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "chain", false);

        let mut full = Collect::default();
        RevlogStream::new(&path)
            .iterate_range(0, TIP, true, &mut full)
            .unwrap();

        for rev in 0..4 {
            let mut single = Collect::default();
            RevlogStream::new(&path)
                .iterate_range(rev, rev, true, &mut single)
                .unwrap();
            assert_eq!(single.visits.len(), 1);
            assert_eq!(single.visits[0], full.visits[rev as usize]);
        }
    }

    #[test]
    fn test_empty_patch_identity() {
        for inline in [true, false] {
            let dir = tempdir().unwrap();
            let path = Builder::default()
                .add(0, 4, literal(b"base"))
                .add(0, 4, Vec::new())
                .write(dir.path(), "idem", inline);

            let mut collect = Collect::default();
            RevlogStream::new(&path)
                .iterate_range(0, 1, true, &mut collect)
                .unwrap();
            assert_eq!(collect.bytes(), vec![b"base".to_vec(), b"base".to_vec()]);
            assert_eq!(collect.visits[1].0.actual_len, 4);
        }
    }

    #[test]
    fn test_cancellation() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "chain", true);

        let mut stopper = StopAfter::new(2);
        RevlogStream::new(&path)
            .iterate_range(0, TIP, true, &mut stopper)
            .unwrap();
        assert_eq!(stopper.visited, vec![0, 1]);
        assert_eq!(stopper.started, Some(4));
        assert!(stopper.finished);
    }

    #[test]
    fn test_stop_short_circuits_set_runs() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "chain", true);

        let mut stopper = StopAfter::new(1);
        RevlogStream::new(&path)
            .iterate_set(&[0, 2, 3], true, &mut stopper)
            .unwrap();
        assert_eq!(stopper.visited, vec![0]);
        assert!(stopper.finished);
    }

    #[test]
    fn test_inspector_error_propagates() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "chain", true);

        let mut failer = FailOn {
            rev: 1,
            visited: Vec::new(),
        };
        let err = RevlogStream::new(&path)
            .iterate_range(0, TIP, true, &mut failer)
            .unwrap_err();
        assert!(matches!(err, RevlogError::Inspector(_)));
        assert_eq!(failer.visited, vec![0]);
    }

    #[test]
    fn test_corrupt_patch_size() {
        let dir = tempdir().unwrap();
        // The hunk shrinks the base to 4 bytes while the record claims 5.
        let path = Builder::default()
            .add(0, 6, literal(b"abcdef"))
            .add(0, 5, hunk(2, 4, b""))
            .write(dir.path(), "bad", true);

        let mut collect = Collect::default();
        let err = RevlogStream::new(&path)
            .iterate_range(1, 1, true, &mut collect)
            .unwrap_err();
        assert!(matches!(err, RevlogError::Corrupt { .. }));
        assert!(collect.visits.is_empty());
    }

    #[test]
    fn test_find_revision_index() {
        for inline in [true, false] {
            let dir = tempdir().unwrap();
            let path = chain().write(dir.path(), "find", inline);
            let mut stream = RevlogStream::new(&path);

            for rev in 0..4u8 {
                let node = Nodeid::from_byte_array([rev + 1; 20]);
                assert_eq!(stream.find_revision_index(&node).unwrap(), rev as i32);
            }
            assert_eq!(stream.find_revision_index(&NULL_ID).unwrap(), BAD_REVISION);
        }
    }

    #[test]
    fn test_nodeid_roundtrip() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "rt", true);
        let mut stream = RevlogStream::new(&path);

        let count = stream.revision_count().unwrap();
        for rev in 0..count as i32 {
            let node = stream.nodeid(rev).unwrap();
            assert_eq!(stream.find_revision_index(&node).unwrap(), rev);
        }
    }

    #[test]
    fn test_index_queries() {
        for inline in [true, false] {
            let dir = tempdir().unwrap();
            let path = chain().write(dir.path(), "q", inline);
            let mut stream = RevlogStream::new(&path);

            assert_eq!(stream.revision_count().unwrap(), 4);
            assert_eq!(stream.revision_count().unwrap(), 4);
            assert_eq!(stream.is_inline().unwrap(), inline);
            for rev in 0..4 {
                assert_eq!(stream.data_length(rev).unwrap(), 4 + rev as u32);
                assert_eq!(stream.link_revision(rev).unwrap(), rev);
            }
            assert_eq!(stream.data_length(TIP).unwrap(), 7);
            assert_eq!(
                stream.nodeid(TIP).unwrap(),
                Nodeid::from_byte_array([4u8; 20])
            );
        }
    }

    #[test]
    fn test_tip_range() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "tip", true);
        let mut collect = Collect::default();
        RevlogStream::new(&path)
            .iterate_range(TIP, TIP, true, &mut collect)
            .unwrap();
        assert_eq!(collect.revisions(), vec![3]);
        assert_eq!(collect.bytes(), vec![b"0123456".to_vec()]);
    }

    #[test]
    fn test_invalid_revisions() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "inv", true);
        let mut stream = RevlogStream::new(&path);

        assert!(matches!(
            stream.data_length(4),
            Err(RevlogError::InvalidRevision { rev: 4, .. })
        ));
        assert!(matches!(
            stream.data_length(-1),
            Err(RevlogError::InvalidRevision { .. })
        ));

        let mut collect = Collect::default();
        assert!(matches!(
            stream.iterate_range(2, 5, true, &mut collect),
            Err(RevlogError::InvalidRevision { .. })
        ));
        assert!(matches!(
            stream.iterate_range(3, 1, true, &mut collect),
            Err(RevlogError::InvalidRevision { .. })
        ));
        assert!(matches!(
            stream.iterate_set(&[0, 4], true, &mut collect),
            Err(RevlogError::InvalidRevision { rev: 4, .. })
        ));
        assert!(collect.visits.is_empty());
    }

    #[test]
    fn test_new_entry_offset() {
        let dir = tempdir().unwrap();

        let path = Builder::default()
            .add(0, 5, zlib(b"hello"))
            .write(dir.path(), "one", true);
        let clen = zlib(b"hello").len() as u64;
        assert_eq!(RevlogStream::new(&path).new_entry_offset().unwrap(), clen);

        let path = chain().write(dir.path(), "many", false);
        // Compressed lengths: 5 (literal), then three 13-byte hunks.
        assert_eq!(
            RevlogStream::new(&path).new_entry_offset().unwrap(),
            5 + 13 + 13 + 13
        );
    }

    #[test]
    fn test_revision_added() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "app", false);
        let mut stream = RevlogStream::new(&path);

        // Without a materialized outline the hook is a no-op.
        let node = Nodeid::from_byte_array([9u8; 20]);
        stream.revision_added(0, &node, 0, 0).unwrap();
        assert_eq!(stream.revision_count().unwrap(), 4);

        stream.revision_added(4, &node, 4, 44).unwrap();
        assert_eq!(stream.revision_count().unwrap(), 5);

        assert!(matches!(
            stream.revision_added(7, &node, 7, 0),
            Err(RevlogError::InconsistentAppend { .. })
        ));
        assert!(matches!(
            stream.revision_added(5, &node, 9, 0),
            Err(RevlogError::InconsistentAppend { .. })
        ));
        assert!(matches!(
            stream.revision_added(5, &NULL_ID, 5, 0),
            Err(RevlogError::InconsistentAppend { .. })
        ));
    }

    #[test]
    fn test_lenient_first_byte() {
        let dir = tempdir().unwrap();
        // Neither 'x' nor 'u': the whole chunk is the payload.
        let path = Builder::default()
            .add(0, 4, b"Zfoo".to_vec())
            .write(dir.path(), "verbatim", true);

        let mut collect = Collect::default();
        RevlogStream::new(&path)
            .iterate_range(0, 0, true, &mut collect)
            .unwrap();
        assert_eq!(collect.bytes(), vec![b"Zfoo".to_vec()]);
    }

    #[test]
    fn test_index_only_walk() {
        for inline in [true, false] {
            let dir = tempdir().unwrap();
            let path = chain().write(dir.path(), "meta", inline);

            let mut collect = Collect::default();
            RevlogStream::new(&path)
                .iterate_range(0, TIP, false, &mut collect)
                .unwrap();
            assert_eq!(collect.revisions(), vec![0, 1, 2, 3]);
            assert!(collect.bytes().iter().all(|data| data.is_empty()));
            assert_eq!(collect.visits[2].0.actual_len, 6);
        }
    }

    #[test]
    fn test_mmap_provider() {
        let dir = tempdir().unwrap();
        let path = chain().write(dir.path(), "map", true);

        let provider = StreamProvider {
            mmap_threshold: 1,
            buffer_size: 4,
        };
        let mut mapped = Collect::default();
        RevlogStream::with_provider(provider, &path)
            .iterate_range(0, TIP, true, &mut mapped)
            .unwrap();
        let mut buffered = Collect::default();
        RevlogStream::new(&path)
            .iterate_range(0, TIP, true, &mut buffered)
            .unwrap();
        assert_eq!(mapped.visits, buffered.visits);
    }

    #[test]
    fn test_data_path_derivation() {
        assert_eq!(
            data_path_for(Path::new("/store/00changelog.i")),
            Path::new("/store/00changelog.d")
        );
        assert_eq!(
            data_path_for(Path::new("data/some file.txt.i")),
            Path::new("data/some file.txt.d")
        );
    }
}
