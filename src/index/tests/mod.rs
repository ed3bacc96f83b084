use super::*;
use tempfile::tempdir;

#[test]
fn add_is_idempotent_by_name_hash() {
    let dir = tempdir().unwrap();
    let mut idx = MetricIndex::open(dir.path()).unwrap();
    idx.add(&[b"a.b.c".to_vec()]).unwrap();
    let names_after_first = idx.name_count();
    idx.add(&[b"a.b.c".to_vec()]).unwrap();
    assert_eq!(idx.name_count(), names_after_first);
}

#[test]
fn tag_query_scenario() {
    let dir = tempdir().unwrap();
    let mut idx = MetricIndex::open(dir.path()).unwrap();
    idx.add(&[
        b"boo;dc=prod".to_vec(),
        b"foo;dc=test;host=alpha".to_vec(),
    ])
    .unwrap();

    let result = idx
        .match_by_tags(&[(b"dc", TagOp::Eq, "test"), (b"host", TagOp::Eq, "alpha")])
        .unwrap();
    assert_eq!(result, vec![b"foo;dc=test;host=alpha".to_vec()]);

    let result = idx.match_by_tags(&[(b"dc", TagOp::Ne, "prod")]).unwrap();
    assert_eq!(result, vec![b"foo;dc=test;host=alpha".to_vec()]);

    let result = idx
        .match_by_tags(&[(b"name", TagOp::Match, "!bo*")])
        .unwrap();
    assert_eq!(result, vec![b"boo;dc=prod".to_vec()]);
}

#[test]
fn dotted_query_matches_exact_segment_count() {
    let dir = tempdir().unwrap();
    let mut idx = MetricIndex::open(dir.path()).unwrap();
    idx.add(&[b"a.b.c".to_vec(), b"a.b".to_vec(), b"a.x.c".to_vec()])
        .unwrap();

    let result = idx.find_metrics("a.*.c").unwrap();
    assert_eq!(result.len(), 2);
    assert!(result.contains(&b"a.b.c".to_vec()));
    assert!(result.contains(&b"a.x.c".to_vec()));
}

#[test]
fn persists_across_reopen() {
    let dir = tempdir().unwrap();
    {
        let mut idx = MetricIndex::open(dir.path()).unwrap();
        idx.add(&[b"a.b.c".to_vec()]).unwrap();
    }
    let idx = MetricIndex::open(dir.path()).unwrap();
    assert_eq!(idx.name_count(), 1);
    let result = idx.find_metrics("a.b.c").unwrap();
    assert_eq!(result, vec![b"a.b.c".to_vec()]);
}

#[test]
fn filter_existing_excludes_known_names() {
    let dir = tempdir().unwrap();
    let mut idx = MetricIndex::open(dir.path()).unwrap();
    idx.add(&[b"a.b".to_vec()]).unwrap();
    let filtered = idx.filter_existing(&[b"a.b".to_vec(), b"c.d".to_vec()]);
    assert_eq!(filtered, vec![b"c.d".to_vec()]);
}
