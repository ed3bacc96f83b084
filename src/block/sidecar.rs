//! Name sidecar: a deflate-compressed, newline-joined list of the original
//! metric names backing a block's fixed-length digest keys.

use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SidecarError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("sidecar is not valid UTF-8")]
    NotUtf8,
}

/// Writes `names` (already sorted to match the block's key order) to `path`
/// as deflate-compressed, newline-joined UTF-8, atomically.
pub fn write_sidecar(path: &Path, names: &[Vec<u8>]) -> Result<(), SidecarError> {
    let mut joined = Vec::new();
    for (i, name) in names.iter().enumerate() {
        if i > 0 {
            joined.push(b'\n');
        }
        joined.extend_from_slice(name);
    }

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&joined)?;
    let compressed = encoder.finish()?;

    let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&compressed)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Reads and decompresses a name sidecar, returning the names in order.
pub fn read_sidecar(path: &Path) -> Result<Vec<Vec<u8>>, SidecarError> {
    let compressed = fs::read(path)?;
    let mut decoder = DeflateDecoder::new(compressed.as_slice());
    let mut joined = Vec::new();
    decoder.read_to_end(&mut joined)?;
    if joined.is_empty() {
        return Ok(Vec::new());
    }
    Ok(joined.split(|&b| b == b'\n').map(|s| s.to_vec()).collect())
}
