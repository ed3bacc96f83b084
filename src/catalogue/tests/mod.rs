use super::*;
use crate::block::{BlockWriter, make_key};
use tempfile::tempdir;

fn write_dummy_block(dir: &Path, start: i64, size: u32) {
    let filename = BlockInfo::filename(start, size);
    let mut w = BlockWriter::new(10, start, size);
    w.push(make_key(b"m1"), &vec![1.0; size as usize]).unwrap();
    w.build(&dir.join(filename)).unwrap();
}

#[test]
fn empty_directory_yields_empty_list() {
    let dir = tempdir().unwrap();
    let cat = Catalogue::new(dir.path());
    let blocks = cat.blocks(10, false).unwrap();
    assert!(blocks.is_empty());
}

#[test]
fn scan_picks_up_blocks_sorted_by_start() {
    let dir = tempdir().unwrap();
    let res_dir = dir.path().join("10");
    fs::create_dir_all(&res_dir).unwrap();
    write_dummy_block(&res_dir, 2000, 5);
    write_dummy_block(&res_dir, 1000, 5);

    let cat = Catalogue::new(dir.path());
    cat.notify_changed(10).unwrap();
    let blocks = cat.blocks(10, false).unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].start, 1000);
    assert_eq!(blocks[1].start, 2000);
}

#[test]
fn cache_is_reused_until_notified() {
    let dir = tempdir().unwrap();
    let res_dir = dir.path().join("10");
    fs::create_dir_all(&res_dir).unwrap();
    write_dummy_block(&res_dir, 1000, 5);

    let cat = Catalogue::new(dir.path());
    cat.notify_changed(10).unwrap();
    let first = cat.blocks(10, false).unwrap();
    assert_eq!(first.len(), 1);

    // New block appears on disk, but no notify yet — should not be picked up.
    write_dummy_block(&res_dir, 2000, 5);
    let cached = cat.blocks(10, false).unwrap();
    assert_eq!(cached.len(), 1);

    cat.notify_changed(10).unwrap();
    let refreshed = cat.blocks(10, false).unwrap();
    assert_eq!(refreshed.len(), 2);
}

#[test]
fn skips_unparsable_filenames() {
    let dir = tempdir().unwrap();
    let res_dir = dir.path().join("10");
    fs::create_dir_all(&res_dir).unwrap();
    write_dummy_block(&res_dir, 1000, 5);
    fs::write(res_dir.join("garbage.hdb"), b"not a block").unwrap();

    let cat = Catalogue::new(dir.path());
    cat.notify_changed(10).unwrap();
    let blocks = cat.blocks(10, false).unwrap();
    assert_eq!(blocks.len(), 1);
}
