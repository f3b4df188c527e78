/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Payload chunk decoding.
//!
//! The first byte of a stored payload selects its encoding: `x` opens a
//! zlib stream covering the whole chunk, `u` marks a literal with the
//! marker byte excluded, and any other value (`\0` in practice) means the
//! chunk is a literal in its entirety. The reference implementation
//! rejects unknown markers; this reader keeps the bytes as-is.

use std::io;

use flate2::Decompress;
use flate2::FlushDecompress;
use flate2::Status;

use crate::source::DataSource;

const SCRATCH_SIZE: usize = 10 * 1024;

/// One revision's stored payload, classified but not yet decoded.
pub(crate) enum Chunk {
    Empty,
    Literal(Vec<u8>),
    Zlib(Vec<u8>),
}

impl Chunk {
    /// Pull `compressed_len` bytes off the source and classify them. A
    /// zero-length chunk, or a source with nothing left, is empty.
    pub fn read(src: &mut dyn DataSource, compressed_len: usize) -> io::Result<Chunk> {
        if compressed_len == 0 || src.is_empty() {
            return Ok(Chunk::Empty);
        }
        let mut buf = vec![0u8; compressed_len];
        src.read_exact(&mut buf)?;
        match buf[0] {
            0x78 => Ok(Chunk::Zlib(buf)),
            0x75 => {
                buf.drain(..1);
                Ok(Chunk::Literal(buf))
            }
            _ => Ok(Chunk::Literal(buf)),
        }
    }

    /// Materialize the payload bytes, inflating through the shared
    /// inflater when compressed.
    pub fn into_bytes(self, inflater: &mut Inflater, size_hint: Option<usize>) -> io::Result<Vec<u8>> {
        match self {
            Chunk::Empty => Ok(Vec::new()),
            Chunk::Literal(bytes) => Ok(bytes),
            Chunk::Zlib(bytes) => inflater.inflate(&bytes, size_hint),
        }
    }
}

/// A zlib inflater reused across the revisions of one traversal, reset
/// before each chunk, feeding its output through one scratch buffer.
pub(crate) struct Inflater {
    raw: Decompress,
    scratch: Vec<u8>,
}

impl Inflater {
    pub fn new() -> Self {
        Inflater {
            raw: Decompress::new(true),
            scratch: vec![0u8; SCRATCH_SIZE],
        }
    }

    pub fn inflate(&mut self, input: &[u8], size_hint: Option<usize>) -> io::Result<Vec<u8>> {
        self.raw.reset(true);
        let mut out = Vec::with_capacity(size_hint.unwrap_or(self.scratch.len()));
        loop {
            let consumed_before = self.raw.total_in() as usize;
            let produced_before = self.raw.total_out() as usize;
            let status = self
                .raw
                .decompress(&input[consumed_before..], &mut self.scratch, FlushDecompress::Finish)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
            let produced = self.raw.total_out() as usize - produced_before;
            out.extend_from_slice(&self.scratch[..produced]);
            match status {
                Status::StreamEnd => break,
                Status::Ok | Status::BufError => {
                    let consumed = self.raw.total_in() as usize - consumed_before;
                    if produced == 0 && consumed == 0 {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "truncated zlib stream",
                        ));
                    }
                }
            }
        }
        Ok(out)
    }
}
