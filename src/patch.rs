/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The binary patch format carried by delta revisions.
//!
//! A patch is a concatenation of hunks, each a 12-byte big-endian header
//! `(start, end, len)` followed by `len` replacement bytes. Hunks are
//! sorted by `start` and address non-overlapping half-open `[start, end)`
//! ranges of the base revision.

use byteorder::BigEndian;
use byteorder::ByteOrder;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("truncated hunk header")]
    TruncatedHeader,
    #[error("hunk declares {declared} bytes but only {available} remain")]
    TruncatedBody { declared: usize, available: usize },
    #[error("bad hunk range {start}..{end}")]
    BadRange { start: u32, end: u32 },
    #[error("hunk at {start} overlaps the previous hunk")]
    Unsorted { start: u32 },
    #[error("hunk end {end} is beyond the {base_len}-byte base")]
    OutOfBounds { end: u32, base_len: usize },
    #[error("patched data is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Hunk {
    pub start: u32,
    pub end: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Patch {
    hunks: Vec<Hunk>,
}

impl Patch {
    /// Parse hunks until the input is exhausted. An empty input is the
    /// empty patch.
    pub fn parse(mut data: &[u8]) -> Result<Patch, PatchError> {
        let mut hunks = Vec::new();
        let mut prev_end = 0u32;
        while !data.is_empty() {
            if data.len() < 12 {
                return Err(PatchError::TruncatedHeader);
            }
            let start = BigEndian::read_u32(&data[0..4]);
            let end = BigEndian::read_u32(&data[4..8]);
            let len = BigEndian::read_u32(&data[8..12]) as usize;
            if end < start {
                return Err(PatchError::BadRange { start, end });
            }
            if start < prev_end {
                return Err(PatchError::Unsorted { start });
            }
            let body = &data[12..];
            if body.len() < len {
                return Err(PatchError::TruncatedBody {
                    declared: len,
                    available: body.len(),
                });
            }
            hunks.push(Hunk {
                start,
                end,
                data: body[..len].to_vec(),
            });
            prev_end = end;
            data = &body[len..];
        }
        Ok(Patch { hunks })
    }

    pub fn is_empty(&self) -> bool {
        self.hunks.is_empty()
    }

    pub fn hunks(&self) -> &[Hunk] {
        &self.hunks
    }

    /// Replay the hunks over `base`, producing exactly `declared_len`
    /// bytes: unpatched stretches of the base are copied through, each
    /// hunk's range is replaced by its payload.
    pub fn apply(&self, base: &[u8], declared_len: usize) -> Result<Vec<u8>, PatchError> {
        let mut out = Vec::with_capacity(declared_len);
        let mut cursor = 0usize;
        for hunk in &self.hunks {
            let start = hunk.start as usize;
            let end = hunk.end as usize;
            if end > base.len() {
                return Err(PatchError::OutOfBounds {
                    end: hunk.end,
                    base_len: base.len(),
                });
            }
            out.extend_from_slice(&base[cursor..start]);
            out.extend_from_slice(&hunk.data);
            cursor = end;
        }
        out.extend_from_slice(&base[cursor..]);
        if out.len() != declared_len {
            return Err(PatchError::SizeMismatch {
                expected: declared_len,
                actual: out.len(),
            });
        }
        Ok(out)
    }
}
