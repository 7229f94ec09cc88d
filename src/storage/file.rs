//! Binary snapshot files for the record store and the embedding cache.
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic, version, dimension, entry count (u32 LE each)
//! - Entries: length-prefixed UTF-8 strings, i64 millisecond timestamps and
//!   contiguous f32 arrays, all little-endian
//!
//! Files are written to a temporary sibling and renamed into place, so a
//! crash mid-write leaves the previous snapshot intact. Reads go through a
//! memory map and never copy the whole file.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use memmap2::{Mmap, MmapOptions};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::vector::{VectorDimension, VectorError};

/// Current storage format version.
const STORAGE_VERSION: u32 = 1;

/// Size of the storage header in bytes.
const HEADER_SIZE: usize = 16;

/// Magic bytes of the record store file.
pub(crate) const RECORDS_MAGIC: &[u8; 4] = b"AVRS";

/// Magic bytes of the embedding cache file.
pub(crate) const CACHE_MAGIC: &[u8; 4] = b"AVCE";

/// Bytes of a record entry besides its vector: label and category length
/// prefixes plus `created_at`.
pub(crate) const RECORD_FIXED_BYTES: usize = 4 + 4 + 8;

/// Bytes of a cache entry besides its vector: three length prefixes plus
/// `created_at` and `last_accessed`.
pub(crate) const CACHE_FIXED_BYTES: usize = 4 * 3 + 8 * 2;

/// Errors reading or writing snapshot files.
#[derive(Error, Debug)]
pub enum FileFormatError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid storage format: {0}")]
    InvalidFormat(String),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Re-seed the store with the current version"
    )]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Vector error: {0}")]
    Vector(#[from] VectorError),
}

/// Parsed file header.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FileHeader {
    pub dimension: VectorDimension,
    pub count: usize,
}

/// Append-only little-endian encoder over an in-memory buffer.
#[derive(Debug, Default)]
pub(crate) struct RecordWriter {
    buf: Vec<u8>,
}

impl RecordWriter {
    pub fn new(magic: &[u8; 4], dimension: VectorDimension, count: usize) -> Self {
        let mut writer = Self {
            buf: Vec::with_capacity(HEADER_SIZE + count * dimension.get() * 4),
        };
        writer.buf.extend_from_slice(magic);
        writer.write_u32(STORAGE_VERSION);
        writer.write_u32(dimension.get() as u32);
        writer.write_u32(count as u32);
        writer
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_timestamp(&mut self, value: DateTime<Utc>) {
        self.buf
            .extend_from_slice(&value.timestamp_millis().to_le_bytes());
    }

    pub fn write_str(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_vector(&mut self, vector: &[f32]) {
        for &value in vector {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    /// Atomically replaces `path` with the encoded bytes.
    pub fn persist(self, path: &Path) -> Result<(), FileFormatError> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(&self.buf)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| FileFormatError::Io(e.error))?;
        Ok(())
    }
}

/// Memory-mapped snapshot file.
#[derive(Debug)]
pub(crate) struct MappedFile {
    mmap: Mmap,
    header: FileHeader,
}

impl MappedFile {
    /// Maps `path` and validates its header.
    ///
    /// Every entry takes at least `fixed_entry_bytes` plus its vector, so a
    /// header claiming more entries than the body can hold is rejected
    /// before anything is allocated for them.
    ///
    /// Returns `Ok(None)` when the file does not exist yet.
    pub fn open(
        path: &Path,
        magic: &[u8; 4],
        fixed_entry_bytes: usize,
    ) -> Result<Option<Self>, FileFormatError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if (file.metadata()?.len() as usize) < HEADER_SIZE {
            return Err(FileFormatError::InvalidFormat(
                "File too small to contain header".to_string(),
            ));
        }

        let mmap = unsafe { MmapOptions::new().map(&file)? };
        let header = Self::read_header(&mmap, magic)?;

        let body = mmap.len() - HEADER_SIZE;
        let min_entry = fixed_entry_bytes + header.dimension.get() * 4;
        if header
            .count
            .checked_mul(min_entry)
            .is_none_or(|needed| needed > body)
        {
            return Err(FileFormatError::InvalidFormat(format!(
                "Header claims {} entries but the body holds {body} bytes",
                header.count
            )));
        }

        Ok(Some(Self { mmap, header }))
    }

    pub fn header(&self) -> FileHeader {
        self.header
    }

    /// Reader positioned after the header.
    pub fn reader(&self) -> RecordReader<'_> {
        RecordReader {
            bytes: &self.mmap,
            offset: HEADER_SIZE,
        }
    }

    fn read_header(mmap: &Mmap, magic: &[u8; 4]) -> Result<FileHeader, FileFormatError> {
        if &mmap[0..4] != magic {
            return Err(FileFormatError::InvalidFormat(
                "Invalid magic bytes".to_string(),
            ));
        }

        let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
        if version != STORAGE_VERSION {
            return Err(FileFormatError::VersionMismatch {
                expected: STORAGE_VERSION,
                actual: version,
            });
        }

        let dim_value = u32::from_le_bytes([mmap[8], mmap[9], mmap[10], mmap[11]]);
        let dimension = VectorDimension::new(dim_value as usize)?;
        let count = u32::from_le_bytes([mmap[12], mmap[13], mmap[14], mmap[15]]) as usize;

        Ok(FileHeader { dimension, count })
    }
}

/// Bounds-checked cursor over mapped bytes.
pub(crate) struct RecordReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl RecordReader<'_> {
    fn take(&mut self, len: usize) -> Result<&[u8], FileFormatError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                FileFormatError::InvalidFormat(format!(
                    "Truncated entry at byte {}",
                    self.offset
                ))
            })?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    pub fn read_u32(&mut self) -> Result<u32, FileFormatError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_timestamp(&mut self) -> Result<DateTime<Utc>, FileFormatError> {
        let b = self.take(8)?;
        let millis = i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]);
        DateTime::from_timestamp_millis(millis).ok_or_else(|| {
            FileFormatError::InvalidFormat(format!("Timestamp out of range: {millis}"))
        })
    }

    pub fn read_string(&mut self) -> Result<String, FileFormatError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| FileFormatError::InvalidFormat(format!("Invalid UTF-8 string: {e}")))
    }

    pub fn read_vector(&mut self, dimension: VectorDimension) -> Result<Vec<f32>, FileFormatError> {
        let bytes = self.take(dimension.get() * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}
