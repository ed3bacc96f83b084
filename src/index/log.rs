//! Append-only persistence log for the metric index.
//!
//! Rather than an embedded transactional database, the index persists as
//! a flat append-only event log, framed with this crate's own
//! [`crate::encoding`] module and a CRC32 per record, replayed in full at
//! startup. The index's write path is already single-threaded (run from
//! the flush worker under the task manager's one-worker-per-kind
//! discipline) and idempotent at the name-hash level, so there is no
//! concurrent-writer problem a WAL+checkpoint manifest would be solving.
//! See `DESIGN.md`'s open question resolutions for why this was chosen
//! over an embedded-DB dependency.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use crc32fast::Hasher as Crc32;
use thiserror::Error;

use crate::encoding::{self, Decode, Encode, EncodingError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IndexLogError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("checksum mismatch at offset {0}")]
    ChecksumMismatch(u64),
}

/// One durable mutation to the metric index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexEvent {
    /// A newly interned `(tag, value)` pair.
    AddTag {
        tag_id: u32,
        tag: Vec<u8>,
        value: Vec<u8>,
    },
    /// A newly observed metric name, already split into tag ids.
    AddName {
        name_id: u32,
        name_hash: u64,
        tag_ids: Vec<u32>,
    },
}

impl Encode for IndexEvent {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        match self {
            IndexEvent::AddTag { tag_id, tag, value } => {
                0u32.encode_to(buf)?;
                tag_id.encode_to(buf)?;
                tag.clone().encode_to(buf)?;
                value.clone().encode_to(buf)?;
            }
            IndexEvent::AddName {
                name_id,
                name_hash,
                tag_ids,
            } => {
                1u32.encode_to(buf)?;
                name_id.encode_to(buf)?;
                name_hash.encode_to(buf)?;
                encoding::encode_vec(tag_ids, buf)?;
            }
        }
        Ok(())
    }
}

impl Decode for IndexEvent {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        let mut off = 0;
        let (tag, n) = u32::decode_from(&buf[off..])?;
        off += n;
        match tag {
            0 => {
                let (tag_id, n) = u32::decode_from(&buf[off..])?;
                off += n;
                let (t, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                let (value, n) = Vec::<u8>::decode_from(&buf[off..])?;
                off += n;
                Ok((
                    IndexEvent::AddTag {
                        tag_id,
                        tag: t,
                        value,
                    },
                    off,
                ))
            }
            1 => {
                let (name_id, n) = u32::decode_from(&buf[off..])?;
                off += n;
                let (name_hash, n) = u64::decode_from(&buf[off..])?;
                off += n;
                let (tag_ids, n) = encoding::decode_vec::<u32>(&buf[off..])?;
                off += n;
                Ok((
                    IndexEvent::AddName {
                        name_id,
                        name_hash,
                        tag_ids,
                    },
                    off,
                ))
            }
            other => Err(EncodingError::InvalidTag {
                tag: other,
                type_name: "IndexEvent",
            }),
        }
    }
}

/// Appends events to, and replays events from, `<data_dir>/index.log`.
pub struct IndexLog {
    file: File,
}

impl IndexLog {
    pub fn open(path: &Path) -> Result<Self, IndexLogError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)?;
        Ok(Self { file })
    }

    /// Appends one event: `[len u32][encoded event][crc32 u32]`.
    pub fn append(&mut self, event: &IndexEvent) -> Result<(), IndexLogError> {
        let encoded = encoding::encode_to_vec(event)?;
        let mut hasher = Crc32::new();
        hasher.update(&encoded);
        let crc = hasher.finalize();

        let mut record = Vec::with_capacity(4 + encoded.len() + 4);
        record.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        record.extend_from_slice(&encoded);
        record.extend_from_slice(&crc.to_le_bytes());
        self.file.write_all(&record)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Replays every event in the log in order, stopping cleanly at a
    /// truncated trailing record (the tail of a write that never synced).
    pub fn replay(path: &Path) -> Result<Vec<IndexEvent>, IndexLogError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut file = File::open(path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut events = Vec::new();
        let mut offset = 0usize;
        while offset + 4 <= bytes.len() {
            let len = u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            let body_start = offset + 4;
            let body_end = body_start + len;
            let crc_end = body_end + 4;
            if crc_end > bytes.len() {
                break;
            }
            let body = &bytes[body_start..body_end];
            let mut hasher = Crc32::new();
            hasher.update(body);
            let expected = hasher.finalize();
            let actual = u32::from_le_bytes(bytes[body_end..crc_end].try_into().unwrap());
            if expected != actual {
                return Err(IndexLogError::ChecksumMismatch(offset as u64));
            }
            let (event, _) = encoding::decode_from_slice::<IndexEvent>(body)?;
            events.push(event);
            offset = crc_end;
        }
        Ok(events)
    }
}
