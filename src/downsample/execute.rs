//! Downsample executor: aggregates a planned segment of same-resolution
//! block slices into one new block at a coarser resolution.
//!
//! Each name's aggregation method is resolved from [`AggRules`], falling
//! back to the configured default for names no rule matches.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::agg::AggRules;
use crate::block::{self, BlockInfo, BlockReader, BlockSlice, Key, SidecarError, read_sidecar};
use crate::catalogue::{Catalogue, CatalogueError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DownsampleError {
    #[error(transparent)]
    BlockFile(#[from] crate::block::BlockFileError),

    #[error(transparent)]
    Sidecar(#[from] SidecarError),

    #[error(transparent)]
    Block(#[from] crate::block::BlockError),

    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error("downsample segment must contain at least one slice")]
    EmptySegment,

    #[error("all slices in a downsample segment must share one resolution")]
    ResolutionMismatch,

    #[error("new_resolution must be a multiple of the source resolution")]
    ResolutionNotMultiple,

    #[error("segment window is not aligned to new_resolution")]
    UnalignedSegment,
}

fn sidecar_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push("m");
    path.with_file_name(name)
}

/// Folds `segment` (source-resolution slices covering `[s_start, s_stop)`,
/// as produced by [`super::plan::plan`]) into a single new block at
/// `new_resolution`, written under `dir`.
pub fn execute(
    dir: &Path,
    new_resolution: u32,
    agg_rules: &AggRules,
    segment: &[BlockSlice],
    s_start: i64,
    s_stop: i64,
    catalogue: &Catalogue,
) -> Result<BlockInfo, DownsampleError> {
    let Some(first) = segment.first() else {
        return Err(DownsampleError::EmptySegment);
    };
    let resolution = first.resolution;
    if segment.iter().any(|s| s.resolution != resolution) {
        return Err(DownsampleError::ResolutionMismatch);
    }

    let r = resolution as i64;
    let nr = new_resolution as i64;
    if nr % r != 0 {
        return Err(DownsampleError::ResolutionNotMultiple);
    }
    let csize = (nr / r) as usize;
    let s_size = ((s_stop - s_start) / r) as usize;
    if s_size % csize != 0 {
        return Err(DownsampleError::UnalignedSegment);
    }
    let out_size = s_size / csize;

    // key -> (name, source-resolution row spanning the whole segment window).
    let mut rows: BTreeMap<Key, (Vec<u8>, Vec<f64>)> = BTreeMap::new();

    for slice in segment {
        let reader = BlockReader::open(&slice.path)?;
        let names = read_sidecar(&sidecar_path_for(&slice.path))?;
        let s_idx = ((slice.start() - s_start) / r) as usize;
        let lo = slice.inner_idx as usize;
        let hi = lo + slice.size as usize;

        for ((key, row), name) in reader.iter().zip(names.into_iter()) {
            let full = BlockReader::decode_row(row);
            let entry = rows
                .entry(key)
                .or_insert_with(|| (name.clone(), vec![f64::NAN; s_size]));
            entry.1[s_idx..s_idx + (hi - lo)].copy_from_slice(&full[lo..hi]);
        }
    }

    let mut out_rows: Vec<(Key, Vec<u8>, Vec<f64>)> = rows
        .into_iter()
        .map(|(key, (name, values))| {
            let method = agg_rules.get_method(&String::from_utf8_lossy(&name));
            let agg: Vec<f64> = values.chunks(csize).map(|w| method.fold(w)).collect();
            (key, name, agg)
        })
        .collect();

    let new_info = block::write_block(dir, new_resolution, s_start, out_size as u32, &mut out_rows)?;

    catalogue.notify_changed(new_resolution)?;
    info!(
        new_resolution,
        start = s_start,
        size = out_size,
        sources = segment.len(),
        "downsampled block"
    );

    Ok(new_info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{make_key, write_block};
    use crate::config::AggRuleConfig;
    use tempfile::tempdir;

    fn mk_block(
        dir: &Path,
        resolution: u32,
        start: i64,
        values: &[(&str, Vec<f64>)],
    ) -> BlockInfo {
        let size = values[0].1.len() as u32;
        let mut rows: Vec<_> = values
            .iter()
            .map(|(n, v)| (make_key(n.as_bytes()), n.as_bytes().to_vec(), v.clone()))
            .collect();
        write_block(dir, resolution, start, size, &mut rows).unwrap()
    }

    #[test]
    fn averages_cells_with_default_method() {
        let dir = tempdir().unwrap();
        let cat = Catalogue::new(dir.path());
        let rules = AggRules::new(&[], "avg").unwrap();
        let info = mk_block(dir.path(), 10, 1000, &[("m1", vec![1.0, 2.0, 3.0, 4.0])]);
        let slice = BlockSlice::whole(&info);

        let out = execute(dir.path(), 20, &rules, &[slice], 1000, 1040, &cat).unwrap();
        assert_eq!(out.start, 1000);
        assert_eq!(out.size, 2);

        let reader = BlockReader::open(&out.path).unwrap();
        let values = reader.get(&make_key(b"m1")).unwrap().unwrap();
        assert_eq!(values, vec![1.5, 3.5]);
    }

    #[test]
    fn per_name_method_overrides_default() {
        let dir = tempdir().unwrap();
        let cat = Catalogue::new(dir.path());
        let rule = AggRuleConfig {
            pattern: "^sum\\.".to_string(),
            method: "sum".to_string(),
        };
        let rules = AggRules::new(&[rule], "avg").unwrap();
        let info = mk_block(
            dir.path(),
            10,
            1000,
            &[
                ("avg.m", vec![1.0, 3.0]),
                ("sum.m", vec![1.0, 3.0]),
            ],
        );
        let slice = BlockSlice::whole(&info);

        let out = execute(dir.path(), 20, &rules, &[slice], 1000, 1020, &cat).unwrap();
        let reader = BlockReader::open(&out.path).unwrap();
        assert_eq!(reader.get(&make_key(b"avg.m")).unwrap().unwrap(), vec![2.0]);
        assert_eq!(reader.get(&make_key(b"sum.m")).unwrap().unwrap(), vec![4.0]);
    }

    #[test]
    fn unaligned_segment_is_rejected() {
        let dir = tempdir().unwrap();
        let cat = Catalogue::new(dir.path());
        let rules = AggRules::new(&[], "avg").unwrap();
        let info = mk_block(dir.path(), 10, 1000, &[("m1", vec![1.0, 2.0, 3.0])]);
        let slice = BlockSlice::whole(&info);

        let err = execute(dir.path(), 20, &rules, &[slice], 1000, 1030, &cat).unwrap_err();
        assert!(matches!(err, DownsampleError::UnalignedSegment));
    }

    #[test]
    fn mismatched_resolutions_are_rejected() {
        let dir = tempdir().unwrap();
        let cat = Catalogue::new(dir.path());
        let rules = AggRules::new(&[], "avg").unwrap();
        let a = mk_block(dir.path(), 10, 1000, &[("m1", vec![1.0, 2.0])]);
        let b = mk_block(dir.path(), 20, 1020, &[("m1", vec![3.0])]);
        let slices = vec![BlockSlice::whole(&a), BlockSlice::whole(&b)];

        let err = execute(dir.path(), 40, &rules, &slices, 1000, 1040, &cat).unwrap_err();
        assert!(matches!(err, DownsampleError::ResolutionMismatch));
    }
}
