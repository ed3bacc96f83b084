//! Block catalogue: the per-resolution sorted list of on-disk blocks.
//!
//! A directory scan is cached and only re-run when a per-resolution
//! touch-file (`blocks.state`) has a newer mtime than the last scan —
//! writers call [`Catalogue::notify_changed`] after every rename so
//! readers pick up new or removed blocks promptly without rescanning the
//! directory on every query.

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, warn};

use crate::block::BlockInfo;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CatalogueError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

const STATE_FILE: &str = "blocks.state";

struct CachedResolution {
    blocks: Vec<BlockInfo>,
    last_seen_mtime: Option<SystemTime>,
}

/// Tracks, for every configured resolution, the sorted list of on-disk
/// blocks under `<data_dir>/<resolution>/`.
pub struct Catalogue {
    data_dir: PathBuf,
    cache: RwLock<HashMap<u32, CachedResolution>>,
    /// Serializes directory scans per resolution so concurrent callers
    /// don't race to rebuild the same cache entry.
    scan_lock: Mutex<()>,
}

impl Catalogue {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache: RwLock::new(HashMap::new()),
            scan_lock: Mutex::new(()),
        }
    }

    fn resolution_dir(&self, resolution: u32) -> PathBuf {
        self.data_dir.join(resolution.to_string())
    }

    fn state_path(&self, resolution: u32) -> PathBuf {
        self.resolution_dir(resolution).join(STATE_FILE)
    }

    fn state_mtime(&self, resolution: u32) -> Option<SystemTime> {
        fs::metadata(self.state_path(resolution))
            .ok()
            .and_then(|m| m.modified().ok())
    }

    /// Touches the resolution's state file, creating it if absent. Called
    /// by writers (flush, merge, downsample, cleanup) after a block's file
    /// rename completes.
    pub fn notify_changed(&self, resolution: u32) -> Result<(), CatalogueError> {
        let dir = self.resolution_dir(resolution);
        fs::create_dir_all(&dir)?;
        let path = self.state_path(resolution);
        let now = filetime_now();
        if path.exists() {
            File::open(&path)?.set_modified(now)?;
        } else {
            File::create(&path)?;
        }
        Ok(())
    }

    /// Returns the sorted block list for `resolution`, rescanning the
    /// directory only if the state file's mtime has advanced since the
    /// last scan, or if `force` is set.
    pub fn blocks(&self, resolution: u32, force: bool) -> Result<Vec<BlockInfo>, CatalogueError> {
        let current_mtime = self.state_mtime(resolution);
        {
            let cache = self.cache.read().expect("catalogue cache lock poisoned");
            if !force {
                if let Some(entry) = cache.get(&resolution) {
                    if entry.last_seen_mtime == current_mtime {
                        return Ok(entry.blocks.clone());
                    }
                }
            }
        }

        let _guard = self.scan_lock.lock().expect("catalogue scan lock poisoned");
        // Re-check under the scan lock: another thread may have just rescanned.
        let current_mtime = self.state_mtime(resolution);
        {
            let cache = self.cache.read().expect("catalogue cache lock poisoned");
            if !force {
                if let Some(entry) = cache.get(&resolution) {
                    if entry.last_seen_mtime == current_mtime {
                        return Ok(entry.blocks.clone());
                    }
                }
            }
        }

        let blocks = self.rescan(resolution)?;
        debug!(resolution, count = blocks.len(), "catalogue rescanned resolution directory");
        let mut cache = self.cache.write().expect("catalogue cache lock poisoned");
        cache.insert(
            resolution,
            CachedResolution {
                blocks: blocks.clone(),
                last_seen_mtime: current_mtime,
            },
        );
        Ok(blocks)
    }

    fn rescan(&self, resolution: u32) -> Result<Vec<BlockInfo>, CatalogueError> {
        let dir = self.resolution_dir(resolution);
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            return Ok(Vec::new());
        }
        let mut blocks = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("hdb") {
                continue;
            }
            match BlockInfo::from_path(&path, resolution) {
                Some(info) => blocks.push(info),
                None => warn!(path = %path.display(), "skipping unparsable block filename"),
            }
        }
        blocks.sort_by_key(|b| b.start);
        Ok(blocks)
    }
}

/// `SystemTime::now()`, kept as a tiny indirection so this is the single
/// call site if a clock source ever needs to be injected for testing.
fn filetime_now() -> SystemTime {
    SystemTime::now()
}

#[allow(dead_code)]
fn ensure_block_dirs(data_dir: &Path, resolutions: &[u32]) -> io::Result<()> {
    for res in resolutions {
        fs::create_dir_all(data_dir.join(res.to_string()))?;
    }
    Ok(())
}
