//! Fixed-length digest keys used inside block files.
//!
//! On-disk block keys are 16 bytes: the first 8 bytes are the metric name,
//! truncated or zero-padded, followed by the 8-byte `xxh64` hash of the
//! full name. The name itself is recovered separately from the block's
//! sidecar file (`block::sidecar`).

use xxhash_rust::xxh64::xxh64;

/// Length of a block key in bytes: 8-byte name prefix + 8-byte hash.
pub const KEY_LEN: usize = 16;

/// A 16-byte digest key: `name[:8] zero-padded || xxh64(name)`.
pub type Key = [u8; KEY_LEN];

/// Computes the digest key for `name`.
pub fn make_key(name: &[u8]) -> Key {
    let mut key = [0u8; KEY_LEN];
    let prefix_len = name.len().min(8);
    key[..prefix_len].copy_from_slice(&name[..prefix_len]);
    let hash = xxh64(name, 0);
    key[8..].copy_from_slice(&hash.to_le_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_key() {
        assert_eq!(make_key(b"metric.one"), make_key(b"metric.one"));
    }

    #[test]
    fn different_names_differ() {
        assert_ne!(make_key(b"metric.one"), make_key(b"metric.two"));
    }

    #[test]
    fn short_name_zero_padded() {
        let key = make_key(b"m1");
        assert_eq!(&key[..2], b"m1");
        assert_eq!(&key[2..8], &[0u8; 6]);
    }

    #[test]
    fn key_is_fixed_length() {
        assert_eq!(make_key(b"x").len(), KEY_LEN);
        assert_eq!(make_key(b"a.very.long.metric.name.with.many.segments").len(), KEY_LEN);
    }
}
