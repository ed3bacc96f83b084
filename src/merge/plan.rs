//! Segment-wise merge planner.
//!
//! Groups adjacent blocks into segments bounded by `max_size`/
//! `max_gap_size`, then applies a descending-split rule to the final
//! segment only, so a single oversized trailing block isn't rewritten on
//! every merge pass. See open question #1 in `DESIGN.md` for why this
//! supersedes a simpler pair-wise grouping.

use crate::block::BlockInfo;

/// Groups `blocks` (sorted by `start`, same resolution) into merge segments.
/// Every returned segment has at least two blocks; segments of length one
/// are dropped, since merging requires at least a pair.
pub fn plan(
    blocks: &[BlockInfo],
    resolution: u32,
    max_size: u32,
    max_gap_size: u32,
    ratio: f64,
) -> Vec<Vec<BlockInfo>> {
    if blocks.len() < 2 {
        return Vec::new();
    }
    let r = resolution as i64;
    let mut segments: Vec<Vec<BlockInfo>> = Vec::new();
    let mut current: Vec<BlockInfo> = vec![blocks[0].clone()];

    for block in &blocks[1..] {
        let prev = current.last().expect("current segment is never empty");
        let gap = block.start - prev.end();
        let duration_if_added = block.end() - current[0].start;
        if gap > max_gap_size as i64 * r || duration_if_added > max_size as i64 * r {
            segments.push(std::mem::take(&mut current));
            current.push(block.clone());
        } else {
            current.push(block.clone());
        }
    }
    segments.push(current);

    if let Some(last) = segments.last_mut() {
        if last.len() >= 2 {
            *last = apply_descending_split(last, ratio);
        }
    }

    segments.into_iter().filter(|s| s.len() >= 2).collect()
}

/// Applied only to the final segment: if some consecutive pair's size ratio
/// exceeds `ratio`, split there and keep everything after the drop;
/// otherwise keep only the trailing pair.
fn apply_descending_split(segment: &[BlockInfo], ratio: f64) -> Vec<BlockInfo> {
    for i in 0..segment.len() - 1 {
        let a = segment[i].size as f64;
        let b = segment[i + 1].size as f64;
        let pair_ratio = if a > b { a / b } else { b / a };
        if pair_ratio > ratio {
            return segment[i + 1..].to_vec();
        }
    }
    segment[segment.len() - 2..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn block(start: i64, size: u32) -> BlockInfo {
        BlockInfo {
            path: PathBuf::from(format!("{start}.{size}.hdb")),
            resolution: 10,
            start,
            size,
        }
    }

    #[test]
    fn adjacent_blocks_form_one_segment() {
        // A trailing isolated block keeps the three adjacent ones in a
        // non-final segment, so the descending split (which only touches
        // the last segment) never shrinks it.
        let blocks = vec![
            block(1000, 5),
            block(1050, 5),
            block(1100, 5),
            block(5000, 5),
        ];
        let segments = plan(&blocks, 10, 2000, 5, 3.0);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 3);
        assert_eq!(segments[0][0].start, 1000);
    }

    #[test]
    fn large_gap_splits_segments() {
        let blocks = vec![block(1000, 5), block(5000, 5)];
        let segments = plan(&blocks, 10, 2000, 5, 3.0);
        // Gap of 4000/10=400 resolution-units exceeds max_gap_size=5 — no
        // merge opportunity, both blocks drop as length-1 segments.
        assert!(segments.is_empty());
    }

    #[test]
    fn single_block_never_merges() {
        let blocks = vec![block(1000, 5)];
        assert!(plan(&blocks, 10, 2000, 5, 3.0).is_empty());
    }

    #[test]
    fn descending_split_keeps_trailing_pair_when_no_drop() {
        let blocks = vec![block(1000, 10), block(1100, 10), block(1200, 10)];
        let segments = plan(&blocks, 10, 2000, 5, 3.0);
        // No consecutive pair's ratio exceeds `ratio`, so the descending
        // split keeps only the trailing pair of the final segment.
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 2);
        assert_eq!(segments[0][0].start, 1100);
        assert_eq!(segments[0][1].start, 1200);
    }

    #[test]
    fn descending_split_drops_oversized_leading_block() {
        // A huge earlier block followed by small recent ones: the size
        // ratio between the big block and its neighbor exceeds `ratio`.
        let blocks = vec![block(1000, 1000), block(11000, 5), block(11050, 5)];
        let segments = plan(&blocks, 10, 1_000_000, 1000, 3.0);
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].len(), 2);
        assert_eq!(segments[0][0].start, 11000);
    }
}
