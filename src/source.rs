/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Uniform byte-source abstraction over the index and data files.
//!
//! A [`DataSource`] is a positioned reader. Small files get a buffered
//! window over the file descriptor, large files are memory-mapped, and
//! in-memory slices back both test fixtures and the payload views handed
//! to inspectors. All multi-byte reads are big-endian, as everything in a
//! revlog is.

use std::fs::File;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

use byteorder::BigEndian;
use byteorder::ByteOrder;
use memmap2::Mmap;

pub trait DataSource {
    /// Total number of bytes in this source.
    fn len(&self) -> u64;

    /// Current read position.
    fn position(&self) -> u64;

    fn seek(&mut self, pos: u64) -> io::Result<()>;

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// True when no bytes remain at the current position.
    fn is_empty(&self) -> bool {
        self.position() >= self.len()
    }

    fn skip(&mut self, n: u64) -> io::Result<()> {
        let pos = self.position().saturating_add(n);
        if pos > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "skip past end of stream",
            ));
        }
        self.seek(pos)
    }

    fn read_u8(&mut self) -> io::Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(BigEndian::read_u32(&buf))
    }

    fn read_u64(&mut self) -> io::Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(BigEndian::read_u64(&buf))
    }
}

/// Open policy for revlog files: memory-map anything at or above
/// `mmap_threshold`, otherwise read through a window of `buffer_size`
/// bytes. A missing file reads as an empty source, the convention for a
/// revlog that has not been written yet.
#[derive(Clone, Copy, Debug)]
pub struct StreamProvider {
    pub mmap_threshold: u64,
    pub buffer_size: usize,
}

impl Default for StreamProvider {
    fn default() -> Self {
        StreamProvider {
            mmap_threshold: 100 * 1024,
            buffer_size: 8 * 1024,
        }
    }
}

impl StreamProvider {
    pub fn open(&self, path: &Path) -> io::Result<Box<dyn DataSource>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(Box::new(SliceSource::new(&[])));
            }
            Err(err) => return Err(err),
        };
        let len = file.metadata()?.len();
        if len >= self.mmap_threshold && len > 0 {
            let mmap = unsafe { Mmap::map(&file)? };
            Ok(Box::new(MmapSource::new(mmap)))
        } else {
            Ok(Box::new(FileSource::new(file, len, self.buffer_size)))
        }
    }
}

/// Buffered positioned reads over an open file.
pub struct FileSource {
    file: File,
    len: u64,
    pos: u64,
    window: Vec<u8>,
    window_start: u64,
    window_len: usize,
}

impl FileSource {
    pub fn new(file: File, len: u64, buffer_size: usize) -> Self {
        FileSource {
            file,
            len,
            pos: 0,
            window: vec![0u8; buffer_size.max(1)],
            window_start: 0,
            window_len: 0,
        }
    }

    pub fn open(path: &Path, buffer_size: usize) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(FileSource::new(file, len, buffer_size))
    }

    fn buffered(&self) -> usize {
        let window_end = self.window_start + self.window_len as u64;
        if self.pos >= self.window_start && self.pos < window_end {
            (window_end - self.pos) as usize
        } else {
            0
        }
    }

    fn refill(&mut self) -> io::Result<()> {
        if self.pos >= self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of file",
            ));
        }
        self.file.seek(SeekFrom::Start(self.pos))?;
        let n = self.file.read(&mut self.window)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of file",
            ));
        }
        self.window_start = self.pos;
        self.window_len = n;
        Ok(())
    }
}

impl DataSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let avail = self.buffered();
            if avail == 0 {
                self.refill()?;
                continue;
            }
            let take = avail.min(buf.len() - filled);
            let offset = (self.pos - self.window_start) as usize;
            buf[filled..filled + take].copy_from_slice(&self.window[offset..offset + take]);
            filled += take;
            self.pos += take as u64;
        }
        Ok(())
    }
}

/// A memory-mapped file.
pub struct MmapSource {
    mmap: Mmap,
    pos: u64,
}

impl MmapSource {
    pub fn new(mmap: Mmap) -> Self {
        MmapSource { mmap, pos: 0 }
    }
}

impl DataSource for MmapSource {
    fn len(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let start = self.pos as usize;
        let end = start + buf.len();
        if end > self.mmap.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of file",
            ));
        }
        buf.copy_from_slice(&self.mmap[start..end]);
        self.pos = end as u64;
        Ok(())
    }
}

/// A single-pass view over bytes already in memory. This is what
/// inspectors receive as the payload of a revision.
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: u64,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        SliceSource { data, pos: 0 }
    }
}

impl<'a> DataSource for SliceSource<'a> {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.pos = pos;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let start = self.pos as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of slice",
            ));
        }
        buf.copy_from_slice(&self.data[start..end]);
        self.pos = end as u64;
        Ok(())
    }
}
