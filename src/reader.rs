//! Raw byte access to the image being analysed.
//!
//! Every structure in this crate is decoded from a [`Reader`]: a read-only
//! view that hands out borrowed byte ranges or reports that a range does not
//! exist. Readers never panic on out-of-range requests.

use crate::{Error, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

/// Read-only access to the bytes of a file image.
///
/// Implement this trait to decode images held somewhere other than a slice,
/// a vector, or a mapped file.
pub trait Reader {
    /// Borrow `len` bytes at `offset`, or `None` if any part of the range is
    /// past the end of the data.
    fn read(&self, offset: u64, len: usize) -> Option<&[u8]>;

    /// Total size of the image in bytes.
    fn size(&self) -> u64;

    /// Like [`Reader::read`] but reports the failing range as an error.
    fn read_exact(&self, offset: u64, len: usize) -> Result<&[u8]> {
        self.read(offset, len).ok_or(Error::OffsetOutOfBounds {
            offset,
            size: self.size(),
        })
    }

    /// Read a u16 at the given offset (little-endian).
    fn read_u16(&self, offset: u64) -> Option<u16> {
        self.read(offset, 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a u32 at the given offset (little-endian).
    fn read_u32(&self, offset: u64) -> Option<u32> {
        self.read(offset, 4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a u64 at the given offset (little-endian).
    fn read_u64(&self, offset: u64) -> Option<u64> {
        self.read(offset, 8).map(|b| {
            u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
        })
    }
}

fn sub_slice(data: &[u8], offset: u64, len: usize) -> Option<&[u8]> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(len)?;
    data.get(start..end)
}

/// Reader implementation for byte slices (in-memory data).
#[derive(Debug, Clone, Copy)]
pub struct SliceReader<'a> {
    data: &'a [u8],
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

impl Reader for SliceReader<'_> {
    fn read(&self, offset: u64, len: usize) -> Option<&[u8]> {
        sub_slice(self.data, offset, len)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Reader implementation for owned byte vectors.
#[derive(Debug, Clone)]
pub struct VecReader {
    data: Vec<u8>,
}

impl VecReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Reader for VecReader {
    fn read(&self, offset: u64, len: usize) -> Option<&[u8]> {
        sub_slice(&self.data, offset, len)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Reader over a memory-mapped file.
///
/// Zero-length files cannot be mapped on every platform; they are held as an
/// empty image instead.
#[derive(Debug)]
pub struct MmapReader {
    map: Option<Mmap>,
}

impl MmapReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(Self { map: None });
        }
        // SAFETY: the mapping is read-only and never outlives `self`. Another
        // process truncating the file underneath us is outside our control,
        // same as with any mmap-based reader.
        let map = unsafe { Mmap::map(&file)? };
        Ok(Self { map: Some(map) })
    }

    pub fn data(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl Reader for MmapReader {
    fn read(&self, offset: u64, len: usize) -> Option<&[u8]> {
        sub_slice(self.data(), offset, len)
    }

    fn size(&self) -> u64 {
        self.data().len() as u64
    }
}
