/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Revlog v1 index decoding: the header word, the per-revision 64-byte
//! records, and the one-pass outline walk that collects base revisions and
//! (for inline revlogs) physical record offsets.

use std::io;
use std::path::Path;

use bitflags::bitflags;

use crate::errors::Result;
use crate::errors::RevlogError;
use crate::nodeid::Nodeid;
use crate::source::DataSource;

/// Size of one index record on disk.
pub const RECORD_SIZE: u64 = 64;

bitflags! {
    /// Feature half-word of the version field (record 0, bytes 0-1).
    pub struct Features: u16 {
        const INLINE        = 1 << 0;
        const GENERAL_DELTA = 1 << 1;
    }
}

bitflags! {
    /// Per-revision flags (low 16 bits of the 8-byte header word).
    /// Decoded but not interpreted by the reader.
    pub struct RevFlags: u16 {
        const EXTSTORED = 1 << 13;
        const CENSORED  = 1 << 15;
    }
}

/// One decoded index record.
#[derive(Clone, Copy, Debug)]
pub struct IndexRecord {
    /// Logical offset of the payload in the data stream. Defined to be 0
    /// for revision 0, whose offset field is overlaid by the header.
    pub offset: u64,
    pub flags: RevFlags,
    pub compressed_len: u32,
    pub actual_len: u32,
    pub base_revision: i32,
    pub link_revision: i32,
    /// First parent revision index, -1 when absent.
    pub parent1: i32,
    /// Second parent revision index, -1 when absent.
    pub parent2: i32,
    pub nodeid: Nodeid,
}

impl IndexRecord {
    /// Decode the record at the source's current position. `rev` is needed
    /// to apply the revision-0 offset override.
    pub fn read(src: &mut dyn DataSource, rev: usize) -> io::Result<IndexRecord> {
        let word = src.read_u64()?;
        let offset = if rev == 0 { 0 } else { word >> 16 };
        let flags = RevFlags::from_bits_truncate((word & 0xffff) as u16);
        let compressed_len = src.read_u32()?;
        let actual_len = src.read_u32()?;
        let base_revision = src.read_u32()? as i32;
        let link_revision = src.read_u32()? as i32;
        let parent1 = src.read_u32()? as i32;
        let parent2 = src.read_u32()? as i32;
        let mut node = [0u8; 20];
        src.read_exact(&mut node)?;
        // 12 reserved bytes round the record up to 64.
        src.skip(12)?;
        Ok(IndexRecord {
            offset,
            flags,
            compressed_len,
            actual_len,
            base_revision,
            link_revision,
            parent1,
            parent2,
            nodeid: Nodeid::from_byte_array(node),
        })
    }
}

/// Translate a record's 6-byte offset field into the physical offset of
/// the record in an inline `.i` file. Inline data stays under 2 GiB, so
/// the result must fit 32 bits; `None` reports an offset that does not.
///
/// Meaningless for split revlogs, where record `k` simply lives at
/// `k * 64`.
pub fn offset_field_to_inline_file_offset(offset: u64, record_index: usize) -> Option<u32> {
    let physical = offset.checked_add(RECORD_SIZE * record_index as u64)?;
    u32::try_from(physical).ok()
}

/// The per-revlog skeleton built by a single walk of the index: layout
/// flag, delta-chain bases, and (inline only) physical record offsets.
#[derive(Clone, Debug)]
pub(crate) struct Outline {
    pub inline: bool,
    pub base_revisions: Vec<i32>,
    pub record_offsets: Option<Vec<u32>>,
}

impl Outline {
    pub fn count(&self) -> usize {
        self.base_revisions.len()
    }

    pub fn base_revision(&self, rev: usize) -> i32 {
        self.base_revisions[rev]
    }

    /// Offset of revision `rev`'s record in the index stream.
    pub fn record_offset(&self, rev: usize) -> u64 {
        match &self.record_offsets {
            Some(offsets) => offsets[rev] as u64,
            None => rev as u64 * RECORD_SIZE,
        }
    }

    /// Walk the whole index stream once. An empty stream is a legal,
    /// empty revlog, considered inline so that a first append starts out
    /// as a single file.
    pub fn read(src: &mut dyn DataSource, path: &Path) -> Result<Outline> {
        if src.is_empty() {
            return Ok(Outline {
                inline: true,
                base_revisions: Vec::new(),
                record_offsets: None,
            });
        }
        let read_err = |err| RevlogError::from_read(path, err);

        let version = src.read_u32().map_err(read_err)?;
        // The rest of the first offset+flags word carries no information.
        src.read_u32().map_err(read_err)?;
        let features = Features::from_bits_truncate((version >> 16) as u16);
        let inline = features.contains(Features::INLINE);

        let mut entry_guess = (src.len() / RECORD_SIZE) as usize;
        if inline {
            entry_guess >>= 2;
        }
        let mut base_revisions = Vec::with_capacity(entry_guess);
        let mut record_offsets = inline.then(|| Vec::with_capacity(entry_guess));

        // The first record's offset is 0 by definition; the field is
        // reused for the version word.
        let mut offset: u64 = 0;
        loop {
            let compressed_len = src.read_u32().map_err(read_err)?;
            let _actual_len = src.read_u32().map_err(read_err)?;
            let base_revision = src.read_u32().map_err(read_err)? as i32;

            let rev = base_revisions.len();
            if base_revision < 0 || base_revision as usize > rev {
                return Err(RevlogError::corrupt(
                    path,
                    format!("revision {} has impossible base {}", rev, base_revision),
                ));
            }
            base_revisions.push(base_revision);

            if let Some(offsets) = record_offsets.as_mut() {
                let physical = offset_field_to_inline_file_offset(offset, rev)
                    .ok_or_else(|| {
                        RevlogError::corrupt(path, "inline record offset does not fit 32 bits")
                    })?;
                offsets.push(physical);
                // 44 remaining record bytes, then the interleaved payload.
                src.skip(44 + compressed_len as u64).map_err(read_err)?;
            } else {
                src.skip(44).map_err(read_err)?;
            }

            if src.is_empty() {
                break;
            }
            let word = src.read_u64().map_err(read_err)?;
            offset = word >> 16;
        }

        Ok(Outline {
            inline,
            base_revisions,
            record_offsets,
        })
    }
}
