use super::*;

fn cfg() -> BufferConfig {
    BufferConfig {
        resolution: 10,
        flush_size: 5,
        compact_ratio: 100.0,
    }
}

#[test]
fn flush_boundary_scenario() {
    let mut buf = Buffer::new(cfg(), 100);
    buf.add(100, b"m1", 1.0);
    buf.add(110, b"m1", 2.0);
    buf.add(120, b"m1", 3.0);
    buf.add(2000, b"m1", 4.0); // future
    buf.add(50, b"m1", 5.0); // past

    let (flush, _new_names) = buf.tick(180, false);
    let payload = flush.expect("tick should flush at size >= F");
    assert_eq!(payload.start, 100);
    assert_eq!(payload.size, 5);
    assert_eq!(payload.rows.len(), 1);
    let (name, values) = &payload.rows[0];
    assert_eq!(name, b"m1");
    assert_eq!(values[0], 1.0);
    assert_eq!(values[1], 2.0);
    assert_eq!(values[2], 3.0);
    assert!(values[3].is_nan());
    assert!(values[4].is_nan());

    let counters = buf.counters();
    assert_eq!(counters.received_points, 5);
    assert_eq!(counters.past_points, 1);
    assert_eq!(counters.future_points, 1);
}

#[test]
fn trim_never_clears_the_live_flush_window() {
    // Same shape as `flush_boundary_scenario`, stated as a direct
    // invariant check: whatever `trim` clears, it must never touch
    // `[last_flush, last_flush + reservation*R)` even when the forward
    // wrap region it's meant to clear wraps back around to ring slot 0.
    let mut buf = Buffer::new(cfg(), 100);
    buf.add(100, b"m1", 1.0);
    buf.add(110, b"m1", 2.0);
    buf.add(120, b"m1", 3.0);
    let (flush, _) = buf.tick(180, false);
    let payload = flush.unwrap();
    assert_eq!(&payload.rows[0].1[..3], &[1.0, 2.0, 3.0]);
}

#[test]
fn tick_below_flush_size_returns_none() {
    let mut buf = Buffer::new(cfg(), 100);
    buf.add(100, b"m1", 1.0);
    let (flush, _) = buf.tick(105, false);
    assert!(flush.is_none());
}

#[test]
fn forced_flush_emits_partial_window() {
    let mut buf = Buffer::new(cfg(), 100);
    buf.add(100, b"m1", 42.0);
    let (flush, _) = buf.tick(115, true);
    let payload = flush.expect("forced flush always emits when now_size > 0");
    assert_eq!(payload.start, 100);
    assert!(payload.size >= 1);
}

#[test]
fn new_names_reported_once_per_tick() {
    let mut buf = Buffer::new(cfg(), 100);
    buf.add(100, b"m1", 1.0);
    buf.add(101, b"m2", 2.0);
    let (_flush, new_names) = buf.tick(102, false);
    assert_eq!(new_names.len(), 2);
    buf.add(103, b"m3", 3.0);
    let (_flush, new_names) = buf.tick(104, false);
    assert_eq!(new_names, vec![b"m3".to_vec()]);
}

#[test]
fn get_data_returns_live_window() {
    let mut buf = Buffer::new(cfg(), 100);
    buf.add(140, b"m1", 9.0);
    let payload = buf.get_data(&[b"m1".to_vec()], 150);
    assert_eq!(payload.resolution, 10);
    assert_eq!(payload.rows.len(), 1);
    assert!(payload.rows[0].1.iter().any(|v| *v == 9.0));
}

#[test]
fn get_data_for_unknown_name_is_all_nan() {
    let buf = Buffer::new(cfg(), 100);
    let payload = buf.get_data(&[b"ghost".to_vec()], 150);
    assert!(payload.rows[0].1.iter().all(|v| v.is_nan()));
}

#[test]
fn last_write_wins_per_cell() {
    let mut buf = Buffer::new(cfg(), 100);
    buf.add(100, b"m1", 1.0);
    buf.add(100, b"m1", 2.0);
    let (flush, _) = buf.tick(180, false);
    let payload = flush.unwrap();
    assert_eq!(payload.rows[0].1[0], 2.0);
}

#[test]
fn compaction_drops_empty_rows_over_many_flushes() {
    let mut config = cfg();
    config.compact_ratio = 1.5;
    let mut buf = Buffer::new(config, 0);
    buf.add(0, b"transient", 1.0);
    buf.add(0, b"steady", 1.0);
    // Flush enough cycles that "transient" (only present in the first
    // window) drops out while "steady" keeps getting refreshed.
    let mut now = 0;
    for cycle in 0..4 {
        now += 50;
        if cycle > 0 {
            buf.add(now - 5, b"steady", cycle as f64);
        }
        buf.tick(now, false);
    }
    // No panic and the buffer still answers queries for the surviving name.
    let payload = buf.get_data(&[b"steady".to_vec()], now);
    assert_eq!(payload.resolution, 10);
}
