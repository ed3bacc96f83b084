//! Merge executor: k-way merges a segment of adjacent same-resolution
//! blocks into a single new block, then unlinks the sources.
//!
//! Per open question #2 in `DESIGN.md`: overlay only writes a cell when
//! the row does not already hold a value, so an earlier non-NaN cell is
//! never clobbered by a later NaN one ("earlier non-NaN wins").

use std::fs;
use std::path::Path;

use thiserror::Error;
use tracing::info;

use crate::block::{self, BlockError, BlockInfo, BlockReader, Key, read_sidecar};
use crate::catalogue::{Catalogue, CatalogueError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MergeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error("merge segment must contain at least two blocks")]
    SegmentTooShort,

    #[error("all blocks in a merge segment must share one resolution")]
    ResolutionMismatch,
}

/// Merges `segment` (sorted by `start`, same resolution) into one new
/// block under `dir`, unlinks the sources, and notifies `catalogue`.
///
/// Returns the new block's [`BlockInfo`].
pub fn execute(
    dir: &Path,
    resolution: u32,
    segment: &[BlockInfo],
    catalogue: &Catalogue,
) -> Result<BlockInfo, MergeError> {
    if segment.len() < 2 {
        return Err(MergeError::SegmentTooShort);
    }
    if segment.iter().any(|b| b.resolution != resolution) {
        return Err(MergeError::ResolutionMismatch);
    }

    let first = &segment[0];
    let last = &segment[segment.len() - 1];
    let r = resolution as i64;
    let size = ((last.end() - first.start) / r) as u32;

    // key -> (name, merged row); rows start all-NaN and are filled
    // first-write-wins in ascending block-start order.
    let mut rows: std::collections::BTreeMap<Key, (Vec<u8>, Vec<f64>)> =
        std::collections::BTreeMap::new();

    for info in segment {
        let reader = BlockReader::open(&info.path)?;
        let names = read_sidecar(&info.sidecar_path())?;
        let offset = ((info.start - first.start) / r) as usize;
        for ((key, row), name) in reader.iter().zip(names.into_iter()) {
            let values = BlockReader::decode_row(row);
            let entry = rows
                .entry(key)
                .or_insert_with(|| (name.clone(), vec![f64::NAN; size as usize]));
            for (i, v) in values.into_iter().enumerate() {
                let cell = &mut entry.1[offset + i];
                if cell.is_nan() {
                    *cell = v;
                }
            }
        }
    }

    let mut out_rows: Vec<(Key, Vec<u8>, Vec<f64>)> = rows
        .into_iter()
        .map(|(key, (name, values))| (key, name, values))
        .collect();

    let new_info = block::write_block(dir, resolution, first.start, size, &mut out_rows)?;

    for info in segment {
        fs::remove_file(&info.path).ok();
        fs::remove_file(info.sidecar_path()).ok();
    }

    catalogue.notify_changed(resolution)?;
    info!(
        resolution,
        start = first.start,
        size,
        sources = segment.len(),
        "merged blocks"
    );

    Ok(new_info)
}
