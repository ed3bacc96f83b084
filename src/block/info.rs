//! Block filename parsing and the logical slice arithmetic planners use.

use std::path::{Path, PathBuf};

/// Metadata a filename alone is enough to reconstruct: `<start>.<size>.hdb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub path: PathBuf,
    pub resolution: u32,
    pub start: i64,
    pub size: u32,
}

impl BlockInfo {
    /// Exclusive end timestamp: `start + size * resolution`.
    pub fn end(&self) -> i64 {
        self.start + self.size as i64 * self.resolution as i64
    }

    /// Builds the canonical `<start>.<size>.hdb` filename.
    pub fn filename(start: i64, size: u32) -> String {
        format!("{start}.{size}.hdb")
    }

    /// Path to this block's name sidecar (`<start>.<size>.hdbm`).
    pub fn sidecar_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push("m");
        self.path.with_file_name(name)
    }

    /// Parses a `<resolution_dir>/<start>.<size>.hdb` path into a [`BlockInfo`].
    ///
    /// Returns `None` for any filename that doesn't match the expected shape;
    /// callers are expected to skip such entries silently (catalogue scan).
    pub fn from_path(path: &Path, resolution: u32) -> Option<Self> {
        let stem = path.file_name()?.to_str()?;
        let rest = stem.strip_suffix(".hdb")?;
        let (start_s, size_s) = rest.split_once('.')?;
        let start: i64 = start_s.parse().ok()?;
        let size: u32 = size_s.parse().ok()?;
        Some(BlockInfo {
            path: path.to_path_buf(),
            resolution,
            start,
            size,
        })
    }
}

/// A logical, possibly-partial view over a block, used by planners to
/// reason about overlapping time ranges without touching the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSlice {
    pub path: PathBuf,
    pub resolution: u32,
    /// The start timestamp of the *owning* block (not of this slice).
    pub base_start: i64,
    /// Offset in cells from `base_start` to the first cell of this slice.
    pub inner_idx: u32,
    /// Number of cells this slice covers.
    pub size: u32,
}

impl BlockSlice {
    /// A slice covering an entire block.
    pub fn whole(info: &BlockInfo) -> Self {
        BlockSlice {
            path: info.path.clone(),
            resolution: info.resolution,
            base_start: info.start,
            inner_idx: 0,
            size: info.size,
        }
    }

    pub fn start(&self) -> i64 {
        self.base_start + self.inner_idx as i64 * self.resolution as i64
    }

    pub fn end(&self) -> i64 {
        self.start() + self.size as i64 * self.resolution as i64
    }

    /// Splits this slice at `ts` (resolution-aligned) into `(before, from)`.
    /// Either half is `None` if `ts` falls outside (before) or at/before the
    /// start (from) of this slice.
    pub fn split(&self, ts: i64) -> (Option<BlockSlice>, Option<BlockSlice>) {
        if ts <= self.start() {
            return (None, Some(self.clone()));
        }
        if ts >= self.end() {
            return (Some(self.clone()), None);
        }
        let cut = ((ts - self.start()) / self.resolution as i64) as u32;
        let before = BlockSlice {
            path: self.path.clone(),
            resolution: self.resolution,
            base_start: self.base_start,
            inner_idx: self.inner_idx,
            size: cut,
        };
        let from = BlockSlice {
            path: self.path.clone(),
            resolution: self.resolution,
            base_start: self.base_start,
            inner_idx: self.inner_idx + cut,
            size: self.size - cut,
        };
        (Some(before), Some(from))
    }

    /// Intersects this slice with `[lo, hi)`; `None` if the intersection is empty.
    pub fn slice(&self, lo: i64, hi: i64) -> Option<BlockSlice> {
        let start = self.start().max(lo);
        let end = self.end().min(hi);
        if start >= end {
            return None;
        }
        let inner_idx = self.inner_idx + ((start - self.start()) / self.resolution as i64) as u32;
        let size = ((end - start) / self.resolution as i64) as u32;
        Some(BlockSlice {
            path: self.path.clone(),
            resolution: self.resolution,
            base_start: self.base_start,
            inner_idx,
            size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_filename() {
        let info = BlockInfo::from_path(Path::new("/data/10/1000.500.hdb"), 10).unwrap();
        assert_eq!(info.start, 1000);
        assert_eq!(info.size, 500);
        assert_eq!(info.end(), 1000 + 500 * 10);
    }

    #[test]
    fn rejects_malformed_filename() {
        assert!(BlockInfo::from_path(Path::new("/data/10/garbage.txt"), 10).is_none());
        assert!(BlockInfo::from_path(Path::new("/data/10/1000.hdb"), 10).is_none());
    }

    #[test]
    fn sidecar_path_appends_m() {
        let info = BlockInfo {
            path: PathBuf::from("/data/10/1000.500.hdb"),
            resolution: 10,
            start: 1000,
            size: 500,
        };
        assert_eq!(info.sidecar_path(), PathBuf::from("/data/10/1000.500.hdbm"));
    }

    #[test]
    fn split_inside_slice() {
        let info = BlockInfo {
            path: PathBuf::from("x"),
            resolution: 10,
            start: 1000,
            size: 10,
        };
        let slice = BlockSlice::whole(&info);
        let (before, from) = slice.split(1050);
        let before = before.unwrap();
        let from = from.unwrap();
        assert_eq!(before.start(), 1000);
        assert_eq!(before.end(), 1050);
        assert_eq!(from.start(), 1050);
        assert_eq!(from.end(), 1100);
    }

    #[test]
    fn split_at_boundary_yields_none_half() {
        let info = BlockInfo {
            path: PathBuf::from("x"),
            resolution: 10,
            start: 1000,
            size: 10,
        };
        let slice = BlockSlice::whole(&info);
        let (before, from) = slice.split(1000);
        assert!(before.is_none());
        assert_eq!(from.unwrap().size, 10);
        let (before, from) = slice.split(1100);
        assert_eq!(before.unwrap().size, 10);
        assert!(from.is_none());
    }

    #[test]
    fn slice_intersection() {
        let info = BlockInfo {
            path: PathBuf::from("x"),
            resolution: 10,
            start: 1000,
            size: 10,
        };
        let slice = BlockSlice::whole(&info);
        let s = slice.slice(1020, 1200).unwrap();
        assert_eq!(s.start(), 1020);
        assert_eq!(s.end(), 1100);
        assert!(slice.slice(2000, 3000).is_none());
    }
}
