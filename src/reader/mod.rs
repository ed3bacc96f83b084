//! Query read path: resolution selection, disk-block slicing, and
//! live-buffer stitching.
//!
//! Disk phase places each overlapping `BlockSlice` at its offset into a
//! pre-sized matrix. Resolution pick and the live-buffer overlay on top
//! of that matrix are this crate's own addition on top of that shape.

use std::collections::HashMap;

use thiserror::Error;
use tracing::warn;

use crate::block::{BlockFileError, BlockReader, BlockSlice, make_key};
use crate::buffer::FlushPayload;
use crate::catalogue::{Catalogue, CatalogueError};
use crate::config::Config;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReaderError {
    #[error(transparent)]
    BlockFile(#[from] BlockFileError),

    #[error(transparent)]
    Catalogue(#[from] CatalogueError),
}

/// A link RPC call failed or was refused; stitching logs this and proceeds
/// with the disk-only result rather than failing the whole fetch.
#[derive(Debug, Error)]
#[error("link rpc error: {0}")]
pub struct LinkError(pub String);

/// Abstraction over the in-process RPC hop to the ingest server's live
/// Buffer, so the reader doesn't depend on the server's transport.
pub trait LinkFetch {
    fn fetch(&self, names: &[Vec<u8>], now: i64) -> Result<FlushPayload, LinkError>;
}

/// The result of a [`Reader::fetch`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub start: i64,
    pub stop: i64,
    pub resolution: u32,
    /// `data[i]` is `rnames[i]`'s row, `size = (stop - start) / resolution` wide.
    pub data: Vec<Vec<f64>>,
    pub rnames: Vec<String>,
}

fn ceil_to(v: i64, r: i64) -> i64 {
    let floor = v.div_euclid(r) * r;
    if floor == v { floor } else { floor + r }
}

pub struct Reader<'a> {
    catalogue: &'a Catalogue,
    config: &'a Config,
}

impl<'a> Reader<'a> {
    pub fn new(catalogue: &'a Catalogue, config: &'a Config) -> Self {
        Self { catalogue, config }
    }

    fn ingest_resolution(&self) -> u32 {
        self.config
            .retentions
            .iter()
            .map(|r| r.resolution)
            .min()
            .unwrap_or(1)
    }

    /// Among configured resolutions, picks the one whose `(stop - start) /
    /// resolution` is closest to 1000; forces the ingest resolution if the
    /// query's aligned stop still falls inside the live-buffer window.
    fn pick_resolution(&self, start: i64, stop: i64, now: i64) -> u32 {
        let duration = (stop - start).max(1) as f64;
        let resolution = self
            .config
            .retentions
            .iter()
            .map(|r| r.resolution)
            .min_by(|&a, &b| {
                let da = (duration / a as f64 - 1000.0).abs();
                let db = (duration / b as f64 - 1000.0).abs();
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(self.ingest_resolution());

        let ingest_resolution = self.ingest_resolution();
        let buffer_window_start =
            now - self.config.buffer_flush_size as i64 * ingest_resolution as i64;
        if stop >= buffer_window_start {
            ingest_resolution
        } else {
            resolution
        }
    }

    /// Fetches `names` over `[start, stop)`, as of `now`. `link`, if
    /// supplied, is consulted to stitch the live buffer's window onto the
    /// disk-backed result when the chosen resolution is the ingest
    /// resolution and disk coverage doesn't reach `stop`.
    pub fn fetch(
        &self,
        names: &[String],
        start: i64,
        stop: i64,
        now: i64,
        link: Option<&dyn LinkFetch>,
    ) -> Result<FetchResult, ReaderError> {
        let resolution = self.pick_resolution(start, stop, now);
        let r = resolution as i64;
        let start_aligned = start.div_euclid(r) * r;
        let stop_aligned = ceil_to(stop, r);

        if stop_aligned <= start_aligned {
            return Ok(FetchResult {
                start: stop_aligned,
                stop: stop_aligned,
                resolution,
                data: Vec::new(),
                rnames: Vec::new(),
            });
        }

        let size = ((stop_aligned - start_aligned) / r) as usize;
        let blocks = self.catalogue.blocks(resolution, false)?;
        let overlapping: Vec<BlockSlice> = blocks
            .iter()
            .filter(|b| b.end() > start_aligned && b.start < stop_aligned)
            .filter_map(|b| BlockSlice::whole(b).slice(start_aligned, stop_aligned))
            .collect();

        let mut row_index: HashMap<String, usize> = HashMap::new();
        let mut rnames: Vec<String> = Vec::new();
        let mut data: Vec<Vec<f64>> = Vec::new();

        for slice in &overlapping {
            let reader = BlockReader::open(&slice.path)?;
            let offset = ((slice.start() - start_aligned) / r) as usize;
            let lo = slice.inner_idx as usize;
            let hi = lo + slice.size as usize;
            for name in names {
                let key = make_key(name.as_bytes());
                let Some(values) = reader.get(&key)? else {
                    continue;
                };
                let row = *row_index.entry(name.clone()).or_insert_with(|| {
                    rnames.push(name.clone());
                    data.push(vec![f64::NAN; size]);
                    rnames.len() - 1
                });
                data[row][offset..offset + (hi - lo)].copy_from_slice(&values[lo..hi]);
            }
        }

        let ingest_resolution = self.ingest_resolution();
        let disk_end = overlapping.last().map(|s| s.end()).unwrap_or(start_aligned);

        if resolution == ingest_resolution && stop_aligned > disk_end {
            if let Some(link) = link {
                let keys: Vec<Vec<u8>> = names.iter().map(|n| n.as_bytes().to_vec()).collect();
                match link.fetch(&keys, now) {
                    Ok(snapshot) => {
                        stitch(&mut data, &mut rnames, &mut row_index, &snapshot, start_aligned, r, size);
                    }
                    Err(err) => {
                        warn!(%err, "link rpc fetch failed, returning disk-only result");
                    }
                }
            }
        }

        Ok(FetchResult {
            start: start_aligned,
            stop: stop_aligned,
            resolution,
            data,
            rnames,
        })
    }
}

/// Overlays non-NaN cells from a live-buffer snapshot onto the disk matrix,
/// appending rows for names seen only in the buffer.
fn stitch(
    data: &mut Vec<Vec<f64>>,
    rnames: &mut Vec<String>,
    row_index: &mut HashMap<String, usize>,
    snapshot: &FlushPayload,
    start_aligned: i64,
    r: i64,
    size: usize,
) {
    let buf_offset = (snapshot.start - start_aligned) / r;
    for (name_bytes, values) in &snapshot.rows {
        let name = String::from_utf8_lossy(name_bytes).into_owned();
        let row = *row_index.entry(name.clone()).or_insert_with(|| {
            rnames.push(name.clone());
            data.push(vec![f64::NAN; size]);
            rnames.len() - 1
        });
        for (i, v) in values.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            let col = buf_offset + i as i64;
            if col >= 0 && (col as usize) < size {
                data[row][col as usize] = *v;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{make_key as mk, write_block};
    use crate::config::Retention;
    use tempfile::tempdir;

    fn base_config() -> Config {
        let mut config = Config {
            retentions: vec![Retention { resolution: 10, retention: 1000 }],
            ..Config::default()
        };
        config.buffer_flush_size = 6;
        config
    }

    #[test]
    fn empty_range_returns_empty_result() {
        let dir = tempdir().unwrap();
        let catalogue = Catalogue::new(dir.path());
        let config = base_config();
        let reader = Reader::new(&catalogue, &config);
        let result = reader.fetch(&["m1".to_string()], 1000, 1000, 2000, None).unwrap();
        assert!(result.data.is_empty());
        assert_eq!(result.start, result.stop);
    }

    #[test]
    fn disk_only_fetch_places_cells_at_offset() {
        let dir = tempdir().unwrap();
        let res_dir = dir.path().join("10");
        std::fs::create_dir_all(&res_dir).unwrap();
        let mut rows = vec![(mk(b"m1"), b"m1".to_vec(), vec![1.0, 2.0, 3.0])];
        write_block(&res_dir, 10, 1000, 3, &mut rows).unwrap();

        let catalogue = Catalogue::new(dir.path());
        catalogue.notify_changed(10).unwrap();
        let config = base_config();
        let reader = Reader::new(&catalogue, &config);

        // now far beyond the live-buffer window so the ingest resolution
        // isn't forced and no stitch is attempted.
        let result = reader
            .fetch(&["m1".to_string()], 1000, 1030, 100_000, None)
            .unwrap();
        assert_eq!(result.resolution, 10);
        assert_eq!(result.rnames, vec!["m1".to_string()]);
        assert_eq!(result.data[0], vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn missing_name_is_not_added_to_rnames() {
        let dir = tempdir().unwrap();
        let res_dir = dir.path().join("10");
        std::fs::create_dir_all(&res_dir).unwrap();
        let mut rows = vec![(mk(b"m1"), b"m1".to_vec(), vec![1.0])];
        write_block(&res_dir, 10, 1000, 1, &mut rows).unwrap();
        let catalogue = Catalogue::new(dir.path());
        catalogue.notify_changed(10).unwrap();
        let config = base_config();
        let reader = Reader::new(&catalogue, &config);

        let result = reader
            .fetch(&["absent".to_string()], 1000, 1010, 100_000, None)
            .unwrap();
        assert!(result.rnames.is_empty());
    }

    struct FakeLink(FlushPayload);
    impl LinkFetch for FakeLink {
        fn fetch(&self, _names: &[Vec<u8>], _now: i64) -> Result<FlushPayload, LinkError> {
            Ok(FlushPayload {
                start: self.0.start,
                resolution: self.0.resolution,
                size: self.0.size,
                rows: self.0.rows.clone(),
            })
        }
    }

    #[test]
    fn stitches_live_buffer_past_disk_coverage() {
        let dir = tempdir().unwrap();
        let res_dir = dir.path().join("10");
        std::fs::create_dir_all(&res_dir).unwrap();
        let mut rows = vec![(mk(b"m1"), b"m1".to_vec(), vec![1.0, 2.0, 3.0])];
        write_block(&res_dir, 10, 1000, 3, &mut rows).unwrap();
        let catalogue = Catalogue::new(dir.path());
        catalogue.notify_changed(10).unwrap();
        let config = base_config();
        let reader = Reader::new(&catalogue, &config);

        let link = FakeLink(FlushPayload {
            start: 1030,
            resolution: 10,
            size: 2,
            rows: vec![(b"m1".to_vec(), vec![4.0, 5.0])],
        });

        // now within the buffer window (flush_size=6 * resolution=10 = 60).
        let result = reader
            .fetch(&["m1".to_string()], 1000, 1050, 1040, Some(&link))
            .unwrap();
        assert_eq!(result.data[0], vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }
}
