//! Downsample planner: groups same-resolution block slices into segments
//! aligned to a coarser target resolution.
//!
//! A block may be split across two segments (`BlockSlice::split`); the
//! remainder continues into the next segment rather than being dropped.

use std::collections::VecDeque;

use crate::block::{BlockInfo, BlockSlice};

/// One planned downsample segment: the contributing slices, and the
/// aligned `[s_start, s_stop)` window of the *target* resolution.
pub type Segment = (Vec<BlockSlice>, i64, i64);

fn norm_res(ts: i64, res: i64) -> i64 {
    ts.div_euclid(res) * res
}

/// Plans downsample segments for `blocks` (sorted by `start`, all at
/// `resolution`) into `new_resolution`-aligned windows.
///
/// `start` is rounded down to `new_resolution` before use. Segments open
/// when the gap since the previous slice exceeds `max_gap` (in
/// `new_resolution` units), and close once they reach `max_size`
/// (in source-`resolution` units). The final segment is dropped if its
/// duration is shorter than `min_size` (in `new_resolution` units).
pub fn plan(
    blocks: &[BlockInfo],
    resolution: u32,
    new_resolution: u32,
    max_gap: u32,
    min_size: u32,
    max_size: u32,
    start: i64,
) -> Vec<Segment> {
    let r = resolution as i64;
    let nr = new_resolution as i64;
    let start = norm_res(start, nr);

    let mut queue: VecDeque<BlockSlice> = blocks
        .iter()
        .filter(|b| b.end() > start)
        .map(BlockSlice::whole)
        .collect();

    let mut result: Vec<(Vec<BlockSlice>, i64)> = Vec::new();
    let mut has_segment = false;
    let mut last_end: Option<i64> = None;
    let mut s_start = start;
    let mut stop = start;
    let mut pending: Option<BlockSlice> = None;

    loop {
        let b = match pending.take().or_else(|| queue.pop_front()) {
            Some(b) => b,
            None => break,
        };

        let start_new =
            !has_segment || last_end.map_or(true, |pe| (b.start() - pe) / nr > max_gap as i64);

        if start_new {
            s_start = if b.start() <= start {
                start
            } else {
                norm_res(b.start(), nr)
            };
            stop = norm_res(s_start + max_size as i64 * r, nr);
            has_segment = true;
            last_end = None;
            result.push((Vec::new(), s_start));
        }

        let from_s_start = b.slice(s_start, i64::MAX);
        let (cur, rest) = match from_s_start {
            Some(slice) => slice.split(stop),
            None => (None, None),
        };

        if let Some(cur) = cur {
            s_start = cur.end();
            last_end = Some(cur.end());
            if let Some((seg, _)) = result.last_mut() {
                seg.push(cur);
            }
        }
        pending = rest;

        if s_start >= stop {
            has_segment = false;
            last_end = None;
        }
    }

    if let Some((last_seg, _)) = result.last() {
        if let (Some(first), Some(last)) = (last_seg.first(), last_seg.last()) {
            let ssize = (last.end() - first.start()) / nr;
            if ssize < min_size as i64 {
                result.pop();
            }
        } else {
            result.pop();
        }
    }

    result
        .into_iter()
        .map(|(segment, s_start)| {
            let last_end = segment.last().map(|s| s.end()).unwrap_or(s_start);
            let mut s_stop = norm_res(last_end, nr);
            if s_stop < last_end {
                s_stop += nr;
            }
            (segment, s_start, s_stop)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn block(start: i64, size: u32, resolution: u32) -> BlockInfo {
        BlockInfo {
            path: PathBuf::from(format!("{start}.{size}.hdb")),
            resolution,
            start,
            size,
        }
    }

    #[test]
    fn single_block_one_segment() {
        // Scenario 3: block (start=1000,size=20) at R=10, new_resolution=100.
        let blocks = vec![block(1000, 20, 10)];
        let segments = plan(&blocks, 10, 100, 30, 1, 20, 1000);
        assert_eq!(segments.len(), 1);
        let (slices, s_start, s_stop) = &segments[0];
        assert_eq!(*s_start, 1000);
        assert_eq!(*s_stop, 1200);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].size, 20);
    }

    #[test]
    fn short_trailing_segment_is_dropped() {
        let blocks = vec![block(1000, 1, 10)];
        // min_size=5 target-resolution units; 1 source cell at R=10 with
        // new_resolution=100 yields a segment far shorter than 500s.
        let segments = plan(&blocks, 10, 100, 30, 5, 20, 1000);
        assert!(segments.is_empty());
    }

    #[test]
    fn large_gap_splits_into_two_segments() {
        let blocks = vec![block(1000, 10, 10), block(100_000, 10, 10)];
        let segments = plan(&blocks, 10, 100, 5, 1, 2000, 1000);
        assert_eq!(segments.len(), 2);
    }

    #[test]
    fn block_spans_two_segments() {
        // A single large block that exceeds max_size gets split across
        // two segments; the remainder continues as `pending`.
        let blocks = vec![block(1000, 40, 10)];
        let segments = plan(&blocks, 10, 100, 30, 1, 20, 1000);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].1, 1000);
        assert_eq!(segments[1].1, 1200);
    }
}
