//! Retention-driven block deletion.
//!
//! Unlink errors are logged and swallowed rather than propagated — a
//! block another cleanup pass already removed, or one a concurrent
//! merge just replaced, is not a failure here.

use std::path::Path;

use thiserror::Error;
use tracing::{info, warn};

use crate::catalogue::{Catalogue, CatalogueError};
use crate::config::Retention;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CleanupError {
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),
}

fn safe_unlink(path: &Path) {
    if let Err(err) = std::fs::remove_file(path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(path = %path.display(), %err, "failed to unlink expired block");
        }
    }
}

/// Deletes every block, across all configured `retentions`, whose exclusive
/// end timestamp falls before `now - retention`. Safe to call repeatedly:
/// blocks already removed by a prior pass are silently skipped.
pub fn cleanup(catalogue: &Catalogue, retentions: &[Retention], now: i64) -> Result<usize, CleanupError> {
    let mut removed = 0usize;
    for retention in retentions {
        let cutoff = now - retention.retention as i64;
        let blocks = catalogue.blocks(retention.resolution, false)?;
        let expired: Vec<_> = blocks.into_iter().filter(|b| b.end() < cutoff).collect();
        if expired.is_empty() {
            continue;
        }
        for block in &expired {
            safe_unlink(&block.path);
            safe_unlink(&block.sidecar_path());
        }
        catalogue.notify_changed(retention.resolution)?;
        info!(
            resolution = retention.resolution,
            cutoff,
            count = expired.len(),
            "cleaned up expired blocks"
        );
        removed += expired.len();
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{make_key, write_block};
    use tempfile::tempdir;

    fn mk_block(dir: &Path, resolution: u32, start: i64, size: u32) -> crate::block::BlockInfo {
        let mut rows = vec![(make_key(b"m1"), b"m1".to_vec(), vec![1.0; size as usize])];
        write_block(dir, resolution, start, size, &mut rows).unwrap()
    }

    #[test]
    fn removes_blocks_past_retention() {
        let dir = tempdir().unwrap();
        let res_dir = dir.path().join("10");
        std::fs::create_dir_all(&res_dir).unwrap();
        let old = mk_block(&res_dir, 10, 1000, 5); // end = 1050
        let recent = mk_block(&res_dir, 10, 2000, 5); // end = 2050
        let cat = Catalogue::new(dir.path());
        cat.notify_changed(10).unwrap();

        let retentions = vec![Retention { resolution: 10, retention: 100 }];
        let removed = cleanup(&cat, &retentions, 2000).unwrap();

        assert_eq!(removed, 1);
        assert!(!old.path.exists());
        assert!(recent.path.exists());
    }

    #[test]
    fn idempotent_on_repeated_calls() {
        let dir = tempdir().unwrap();
        let res_dir = dir.path().join("10");
        std::fs::create_dir_all(&res_dir).unwrap();
        mk_block(&res_dir, 10, 1000, 5);
        let cat = Catalogue::new(dir.path());
        cat.notify_changed(10).unwrap();

        let retentions = vec![Retention { resolution: 10, retention: 100 }];
        let first = cleanup(&cat, &retentions, 2000).unwrap();
        let second = cleanup(&cat, &retentions, 2000).unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
    }

    #[test]
    fn nothing_expired_is_a_no_op() {
        let dir = tempdir().unwrap();
        let res_dir = dir.path().join("10");
        std::fs::create_dir_all(&res_dir).unwrap();
        let block = mk_block(&res_dir, 10, 1000, 5);
        let cat = Catalogue::new(dir.path());
        cat.notify_changed(10).unwrap();

        let retentions = vec![Retention { resolution: 10, retention: 100 }];
        let removed = cleanup(&cat, &retentions, 1060).unwrap();

        assert_eq!(removed, 0);
        assert!(block.path.exists());
    }
}
