//! Immutable on-disk block files: the unit of persistence for time-series
//! data at one resolution.
//!
//! A block covers a contiguous, resolution-aligned time window for a set of
//! metrics. Keys are fixed-length digests ([`key::make_key`]); the mapping
//! back to original names lives in a companion [`sidecar`] file, since
//! digests alone cannot be reversed.

pub mod file;
pub mod info;
pub mod key;
pub mod sidecar;

pub use file::{BlockFileError, BlockReader, BlockWriter};
pub use info::{BlockInfo, BlockSlice};
pub use key::{Key, KEY_LEN, make_key};
pub use sidecar::{SidecarError, read_sidecar, write_sidecar};

use std::path::Path;

use thiserror::Error;

/// Errors surfaced by the combined block + sidecar write path.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BlockError {
    #[error(transparent)]
    File(#[from] BlockFileError),

    #[error(transparent)]
    Sidecar(#[from] SidecarError),
}

/// Writes a block and its name sidecar together, in the order the catalogue
/// expects to observe them (data file renamed into place before the
/// sidecar, so a reader that only sees the `.hdb` file can still treat it
/// as a valid — if momentarily name-less — block).
pub fn write_block(
    dir: &Path,
    resolution: u32,
    start: i64,
    size: u32,
    rows: &mut [(Key, Vec<u8>, Vec<f64>)],
) -> Result<BlockInfo, BlockError> {
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    let filename = BlockInfo::filename(start, size);
    let path = dir.join(&filename);

    let mut writer = BlockWriter::new(resolution, start, size);
    let mut names = Vec::with_capacity(rows.len());
    for (key, name, values) in rows.iter() {
        writer.push(*key, values)?;
        names.push(name.clone());
    }
    writer.build(&path)?;

    let info = BlockInfo {
        path: path.clone(),
        resolution,
        start,
        size,
    };
    write_sidecar(&info.sidecar_path(), &names)?;
    Ok(info)
}
