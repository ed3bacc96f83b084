//! Immutable block file I/O.
//!
//! On-disk layout, grounded structurally on the reference storage engine's
//! checksummed SSTable (`sstable/builder.rs`'s phased construction and
//! atomic tmp-then-rename finalization), but flattened to this crate's
//! fixed-width row format (no tombstones, no LSN versioning):
//!
//! ```text
//! [HEADER][HEADER_CRC32_LE]
//! [INDEX: count * 16-byte sorted keys]
//! [DATA: count * (ROW_LEN_LE u32 || size * f64 LE)]
//! [FOOTER][FOOTER_CRC32_LE]
//! ```
//!
//! The footer is fixed-size and sits at the tail of the file so a reader
//! can locate the index and data blocks without scanning from the front.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crc32fast::Hasher as Crc32;
use memmap2::Mmap;
use thiserror::Error;

use super::key::{Key, KEY_LEN};

/// Errors raised while writing or reading a block file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlockFileError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("row for key has {actual} cells, expected {expected}")]
    RowSizeMismatch { expected: u32, actual: usize },

    #[error("keys must be written in strictly ascending order")]
    OutOfOrderKey,

    #[error("corrupt block: {0}")]
    Corrupt(String),

    #[error("header checksum mismatch")]
    HeaderChecksumMismatch,

    #[error("footer checksum mismatch")]
    FooterChecksumMismatch,
}

const MAGIC: [u8; 4] = *b"HISB";
const VERSION: u32 = 1;
/// magic(4) + version(4) + resolution(4) + start(8) + size(4) + count(4) = 28, + crc32(4) = 32
const HEADER_LEN: usize = 32;
/// index_offset(8) + index_len(8) + data_offset(8) + data_len(8) = 32, + crc32(4) = 36
const FOOTER_LEN: usize = 36;

#[derive(Debug, Clone, Copy)]
struct Header {
    resolution: u32,
    start: i64,
    size: u32,
    count: u32,
}

impl Header {
    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..8].copy_from_slice(&VERSION.to_le_bytes());
        buf[8..12].copy_from_slice(&self.resolution.to_le_bytes());
        buf[12..20].copy_from_slice(&self.start.to_le_bytes());
        buf[20..24].copy_from_slice(&self.size.to_le_bytes());
        buf[24..28].copy_from_slice(&self.count.to_le_bytes());
        let mut hasher = Crc32::new();
        hasher.update(&buf[..28]);
        buf[28..32].copy_from_slice(&hasher.finalize().to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, BlockFileError> {
        if buf.len() < HEADER_LEN {
            return Err(BlockFileError::Corrupt("header truncated".into()));
        }
        if buf[0..4] != MAGIC {
            return Err(BlockFileError::Corrupt("bad magic".into()));
        }
        let mut hasher = Crc32::new();
        hasher.update(&buf[..28]);
        let expected = hasher.finalize();
        let actual = u32::from_le_bytes(buf[28..32].try_into().unwrap());
        if expected != actual {
            return Err(BlockFileError::HeaderChecksumMismatch);
        }
        let version = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        if version != VERSION {
            return Err(BlockFileError::Corrupt(format!(
                "unsupported block version {version}"
            )));
        }
        Ok(Header {
            resolution: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            start: i64::from_le_bytes(buf[12..20].try_into().unwrap()),
            size: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            count: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Footer {
    index_offset: u64,
    index_len: u64,
    data_offset: u64,
    data_len: u64,
}

impl Footer {
    fn encode(&self) -> [u8; FOOTER_LEN] {
        let mut buf = [0u8; FOOTER_LEN];
        buf[0..8].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.index_len.to_le_bytes());
        buf[16..24].copy_from_slice(&self.data_offset.to_le_bytes());
        buf[24..32].copy_from_slice(&self.data_len.to_le_bytes());
        let mut hasher = Crc32::new();
        hasher.update(&buf[..32]);
        buf[32..36].copy_from_slice(&hasher.finalize().to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Result<Self, BlockFileError> {
        if buf.len() < FOOTER_LEN {
            return Err(BlockFileError::Corrupt("footer truncated".into()));
        }
        let mut hasher = Crc32::new();
        hasher.update(&buf[..32]);
        let expected = hasher.finalize();
        let actual = u32::from_le_bytes(buf[32..36].try_into().unwrap());
        if expected != actual {
            return Err(BlockFileError::FooterChecksumMismatch);
        }
        Ok(Footer {
            index_offset: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            index_len: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            data_offset: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            data_len: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
        })
    }
}

/// Writes an immutable block file atomically: build in memory, write to a
/// `.tmp` path, `sync_all`, then `rename` into place.
pub struct BlockWriter {
    resolution: u32,
    start: i64,
    size: u32,
    rows: Vec<(Key, Vec<u8>)>,
    last_key: Option<Key>,
}

impl BlockWriter {
    pub fn new(resolution: u32, start: i64, size: u32) -> Self {
        Self {
            resolution,
            start,
            size,
            rows: Vec::new(),
            last_key: None,
        }
    }

    /// Appends one key's row. Keys must be supplied in strictly ascending
    /// order; `values.len()` must equal `size`.
    pub fn push(&mut self, key: Key, values: &[f64]) -> Result<(), BlockFileError> {
        if values.len() != self.size as usize {
            return Err(BlockFileError::RowSizeMismatch {
                expected: self.size,
                actual: values.len(),
            });
        }
        if let Some(last) = self.last_key {
            if key <= last {
                return Err(BlockFileError::OutOfOrderKey);
            }
        }
        self.last_key = Some(key);
        let mut bytes = Vec::with_capacity(4 + values.len() * 8);
        bytes.extend_from_slice(&(values.len() as u32).to_le_bytes());
        for v in values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        self.rows.push((key, bytes));
        Ok(())
    }

    /// Finalizes the block at `path`, writing through a `.tmp` sibling and
    /// an atomic rename.
    pub fn build(self, path: &Path) -> Result<(), BlockFileError> {
        let header = Header {
            resolution: self.resolution,
            start: self.start,
            size: self.size,
            count: self.rows.len() as u32,
        };

        let mut buf = Vec::with_capacity(
            HEADER_LEN + self.rows.len() * KEY_LEN + self.rows.iter().map(|(_, v)| v.len()).sum::<usize>() + FOOTER_LEN,
        );
        buf.extend_from_slice(&header.encode());

        let index_offset = buf.len() as u64;
        for (key, _) in &self.rows {
            buf.extend_from_slice(key);
        }
        let index_len = buf.len() as u64 - index_offset;

        let data_offset = buf.len() as u64;
        for (_, row) in &self.rows {
            buf.extend_from_slice(row);
        }
        let data_len = buf.len() as u64 - data_offset;

        let footer = Footer {
            index_offset,
            index_len,
            data_offset,
            data_len,
        };
        buf.extend_from_slice(&footer.encode());

        let tmp_path = tmp_path_for(path);
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&buf)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// A read-only, memory-mapped view over a block file.
pub struct BlockReader {
    mmap: Mmap,
    header: Header,
    index_offset: usize,
    data_offset: usize,
}

impl BlockReader {
    pub fn open(path: &Path) -> Result<Self, BlockFileError> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let header = Header::decode(&mmap)?;
        let footer_start = mmap.len().checked_sub(FOOTER_LEN).ok_or_else(|| {
            BlockFileError::Corrupt("file too small for footer".into())
        })?;
        let footer = Footer::decode(&mmap[footer_start..])?;
        Ok(Self {
            header,
            index_offset: footer.index_offset as usize,
            data_offset: footer.data_offset as usize,
            mmap,
        })
    }

    pub fn resolution(&self) -> u32 {
        self.header.resolution
    }

    pub fn start(&self) -> i64 {
        self.header.start
    }

    pub fn size(&self) -> u32 {
        self.header.size
    }

    pub fn count(&self) -> u32 {
        self.header.count
    }

    fn index(&self) -> &[u8] {
        &self.mmap[self.index_offset..self.index_offset + self.header.count as usize * KEY_LEN]
    }

    fn key_at(&self, i: usize) -> Key {
        let idx = self.index();
        idx[i * KEY_LEN..(i + 1) * KEY_LEN].try_into().unwrap()
    }

    /// Binary searches the index for `key` and returns its row position.
    fn find(&self, key: &Key) -> Option<usize> {
        let count = self.header.count as usize;
        let mut lo = 0usize;
        let mut hi = count;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let candidate = self.key_at(mid);
            match candidate.cmp(key) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return Some(mid),
            }
        }
        None
    }

    /// Row byte width: `4 (len prefix) + size * 8`.
    fn row_width(&self) -> usize {
        4 + self.header.size as usize * 8
    }

    /// Looks up `key` and returns its decoded `f64` row, or `None` if absent.
    ///
    /// Returns an error if the row's embedded length prefix disagrees with
    /// the block's declared `size` (this is the redundant check the `check`
    /// CLI verb relies on).
    pub fn get(&self, key: &Key) -> Result<Option<Vec<f64>>, BlockFileError> {
        let Some(pos) = self.find(key) else {
            return Ok(None);
        };
        let width = self.row_width();
        let row_start = self.data_offset + pos * width;
        let row = &self.mmap[row_start..row_start + width];
        let declared_len = u32::from_le_bytes(row[0..4].try_into().unwrap());
        if declared_len != self.header.size {
            return Err(BlockFileError::Corrupt(format!(
                "row length {declared_len} disagrees with block size {}",
                self.header.size
            )));
        }
        let mut values = Vec::with_capacity(self.header.size as usize);
        for i in 0..self.header.size as usize {
            let off = 4 + i * 8;
            values.push(f64::from_le_bytes(row[off..off + 8].try_into().unwrap()));
        }
        Ok(Some(values))
    }

    /// Iterates `(key, row)` pairs in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (Key, &[u8])> + '_ {
        let width = self.row_width();
        (0..self.header.count as usize).map(move |i| {
            let key = self.key_at(i);
            let row_start = self.data_offset + i * width;
            (key, &self.mmap[row_start..row_start + width])
        })
    }

    /// Decodes a raw row slice (as returned by [`BlockReader::iter`]) to `f64`s.
    pub fn decode_row(row: &[u8]) -> Vec<f64> {
        let declared_len = u32::from_le_bytes(row[0..4].try_into().unwrap()) as usize;
        let mut values = Vec::with_capacity(declared_len);
        for i in 0..declared_len {
            let off = 4 + i * 8;
            values.push(f64::from_le_bytes(row[off..off + 8].try_into().unwrap()));
        }
        values
    }

    /// Verifies that every row's embedded length matches `size` (backs the
    /// `check` CLI verb).
    pub fn check(&self) -> Result<(), BlockFileError> {
        let width = self.row_width();
        for i in 0..self.header.count as usize {
            let row_start = self.data_offset + i * width;
            let row = &self.mmap[row_start..row_start + width];
            let declared_len = u32::from_le_bytes(row[0..4].try_into().unwrap());
            if declared_len != self.header.size {
                return Err(BlockFileError::Corrupt(format!(
                    "row {i} length {declared_len} disagrees with block size {}",
                    self.header.size
                )));
            }
        }
        Ok(())
    }
}
