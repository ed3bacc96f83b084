//! In-memory ingest ring.
//!
//! Storage is a dense `(metric × 2S)` row-major `f64` matrix: every cell is
//! written at both `idx` and `idx + S`, so a flush can always read a
//! contiguous `size`-length slice even when the logical window wraps past
//! the ring's far edge.

#[cfg(test)]
mod tests;

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BufferError {
    #[error("flush size {0} exceeds ring capacity {1}")]
    FlushTooLarge(i64, u32),
}

/// Parameters fixed for the lifetime of a [`Buffer`].
#[derive(Debug, Clone, Copy)]
pub struct BufferConfig {
    /// Ingest resolution, in seconds.
    pub resolution: u32,
    /// Flush size `F`, in points.
    pub flush_size: u32,
    /// Compaction trigger: rebuild when `names / non_empty_rows` exceeds this.
    pub compact_ratio: f64,
}

impl BufferConfig {
    fn future_tolerance(&self) -> u32 {
        self.flush_size / 2
    }

    fn ring_size(&self) -> u32 {
        self.flush_size * 3
    }

    /// Width of the live window served by `get_data` and protected from
    /// `trim`: `flush_size + future_tolerance`.
    fn reservation(&self) -> u32 {
        self.flush_size + self.future_tolerance()
    }
}

/// A contiguous slab of points ready to become a new on-disk block.
pub struct FlushPayload {
    pub start: i64,
    pub resolution: u32,
    pub size: u32,
    /// `(name, values)` for every metric with at least one non-NaN cell.
    pub rows: Vec<(Vec<u8>, Vec<f64>)>,
}

/// Counters bumped on every `add`, reported (and reset) once per tick as
/// internal self-metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct Counters {
    pub received_points: u64,
    pub flushed_points: u64,
    pub past_points: u64,
    pub future_points: u64,
}

impl Counters {
    /// Internal metric names this crate feeds back through its own ingest
    /// path.
    pub fn as_metrics(&self) -> Vec<(&'static str, f64)> {
        vec![
            ("hisser.received-points", self.received_points as f64),
            ("hisser.flushed-points", self.flushed_points as f64),
        ]
    }
}

pub struct Buffer {
    config: BufferConfig,
    /// Resolution-aligned anchor; ring indices are computed relative to this.
    buf_ts: i64,
    last_flush: i64,
    last_trim: i64,
    last_size: i64,
    names: Vec<Vec<u8>>,
    name_index: HashMap<Vec<u8>, usize>,
    /// Row-major, `names.len() * 2*ring_size` cells.
    data: Vec<f64>,
    counters: Counters,
    new_names_since_tick: Vec<Vec<u8>>,
}

impl Buffer {
    /// Creates an empty buffer anchored at `start` (rounded down to a
    /// resolution multiple).
    pub fn new(config: BufferConfig, start: i64) -> Self {
        let r = config.resolution as i64;
        let buf_ts = start.div_euclid(r) * r;
        Self {
            config,
            buf_ts,
            last_flush: buf_ts,
            last_trim: buf_ts,
            last_size: 0,
            names: Vec::new(),
            name_index: HashMap::new(),
            data: Vec::new(),
            counters: Counters::default(),
            new_names_since_tick: Vec::new(),
        }
    }

    fn ring_size(&self) -> i64 {
        self.config.ring_size() as i64
    }

    fn row_width(&self) -> usize {
        2 * self.config.ring_size() as usize
    }

    fn idx_for(&self, ts: i64) -> usize {
        let r = self.config.resolution as i64;
        let offset = (ts - self.buf_ts).div_euclid(r);
        offset.rem_euclid(self.ring_size()) as usize
    }

    fn get_or_create_row(&mut self, name: &[u8]) -> usize {
        if let Some(&idx) = self.name_index.get(name) {
            return idx;
        }
        let row = self.names.len();
        self.names.push(name.to_vec());
        self.name_index.insert(name.to_vec(), row);
        self.data.resize(self.data.len() + self.row_width(), f64::NAN);
        self.new_names_since_tick.push(name.to_vec());
        row
    }

    /// Records one point. Silently dropped (with a counter bump) if `ts`
    /// falls outside `[last_flush, last_flush + ring_size * resolution)`.
    pub fn add(&mut self, ts: i64, name: &[u8], value: f64) {
        let r = self.config.resolution as i64;
        let window_end = self.last_flush + self.ring_size() * r;
        self.counters.received_points += 1;
        if ts < self.last_flush {
            self.counters.past_points += 1;
            return;
        }
        if ts >= window_end {
            self.counters.future_points += 1;
            return;
        }
        let idx = self.idx_for(ts);
        let width = self.row_width();
        let row = self.get_or_create_row(name);
        let s = self.config.ring_size() as usize;
        let base = row * width;
        self.data[base + idx] = value;
        self.data[base + (idx + s) % width] = value;
    }

    /// Returns the last `flush_size + future_tolerance` cells ending at
    /// `now`, for the requested names, used by the reader to stitch the
    /// live window onto disk data.
    pub fn get_data(&self, names: &[Vec<u8>], now: i64) -> FlushPayload {
        let r = self.config.resolution as i64;
        let size = self.config.reservation() as i64;
        let start = (now.div_euclid(r) * r) - size * r;
        let idx = self.idx_for(start);
        let width = self.row_width();
        let mut rows = Vec::with_capacity(names.len());
        for name in names {
            if let Some(&row) = self.name_index.get(name) {
                let base = row * width;
                let slice = &self.data[base + idx..base + idx + size as usize];
                rows.push((name.clone(), slice.to_vec()));
            } else {
                rows.push((name.clone(), vec![f64::NAN; size as usize]));
            }
        }
        FlushPayload {
            start,
            resolution: self.config.resolution,
            size: size as u32,
            rows,
        }
    }

    /// Clears the forward wrap region that will be reused as the ring
    /// advances, `trim_size` cells ending `ring_size - reservation` slots
    /// ahead of `now` — never the live `[last_flush, last_flush +
    /// reservation*R)` window itself, which still holds cells this tick's
    /// flush is about to read.
    fn trim(&mut self, now: i64) {
        let r = self.config.resolution as i64;
        let trim_size = (now - self.last_trim).div_euclid(r);
        if trim_size < 1 {
            self.last_trim = now;
            return;
        }

        let ring_size = self.ring_size();
        if trim_size >= ring_size {
            self.data.iter_mut().for_each(|v| *v = f64::NAN);
            self.last_trim = now;
            return;
        }

        let reservation = self.config.reservation() as i64;
        let width = self.row_width();
        let s = self.idx_for(now + (ring_size - reservation - trim_size) * r);
        let live_start = self.idx_for(self.last_flush);
        let ring_size = ring_size as usize;

        for step in 0..trim_size as usize {
            let idx = (s + step) % ring_size;
            let live_offset = (idx + ring_size - live_start) % ring_size;
            if (live_offset as i64) < reservation {
                // Inside the live window this tick's flush still needs.
                continue;
            }
            let mirror = (idx + ring_size) % width;
            for row in 0..self.names.len() {
                let base = row * width;
                self.data[base + idx] = f64::NAN;
                self.data[base + mirror] = f64::NAN;
            }
        }
        self.last_trim = now;
    }

    /// Advances the ring. Returns a flush payload (if one was produced) and
    /// the list of names first observed since the previous tick.
    pub fn tick(&mut self, now: i64, force: bool) -> (Option<FlushPayload>, Vec<Vec<u8>>) {
        let r = self.config.resolution as i64;
        let f = self.config.flush_size as i64;
        let future_tolerance = self.config.future_tolerance() as i64;

        let now_size = (now - self.last_flush).div_euclid(r);
        let size = now_size - future_tolerance;

        if size != self.last_size {
            self.trim(now);
            let metrics = self.counters.as_metrics();
            debug!(?metrics, "buffer tick emitted self-metrics");
            self.last_size = size;
        }

        let new_names = std::mem::take(&mut self.new_names_since_tick);

        let flush_size = if force && now_size > 0 {
            let reservation = self.config.reservation() as i64;
            now_size.min(reservation)
        } else if size >= f {
            f
        } else {
            return (None, new_names);
        };

        let payload = self.flush(flush_size);
        (Some(payload), new_names)
    }

    fn flush(&mut self, flush_size: i64) -> FlushPayload {
        let r = self.config.resolution as i64;
        let idx = self.idx_for(self.last_flush);
        let width = self.row_width();
        let size = flush_size as usize;

        let mut rows = Vec::new();
        for (row_idx, name) in self.names.iter().enumerate() {
            let base = row_idx * width;
            let slice = &self.data[base + idx..base + idx + size];
            if slice.iter().any(|v| !v.is_nan()) {
                rows.push((name.clone(), slice.to_vec()));
            }
        }

        let start = self.last_flush;
        self.last_flush += flush_size * r;
        self.counters.flushed_points += rows.len() as u64 * flush_size as u64;

        if !self.names.is_empty() {
            let ratio = self.names.len() as f64 / rows.len().max(1) as f64;
            if ratio > self.config.compact_ratio {
                self.compact();
            }
        }

        FlushPayload {
            start,
            resolution: self.config.resolution,
            size: flush_size as u32,
            rows,
        }
    }

    /// Rebuilds the matrix, keeping only metrics with at least one non-NaN
    /// cell in the current window; triggered when indexed/non-empty ratio
    /// exceeds `compact_ratio`.
    fn compact(&mut self) {
        let width = self.row_width();
        let mut new_names = Vec::new();
        let mut new_data = Vec::new();
        for (row_idx, name) in self.names.iter().enumerate() {
            let base = row_idx * width;
            let row = &self.data[base..base + width];
            if row.iter().any(|v| !v.is_nan()) {
                new_names.push(name.clone());
                new_data.extend_from_slice(row);
            }
        }
        self.name_index = new_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        self.names = new_names;
        self.data = new_data;
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn resolution(&self) -> u32 {
        self.config.resolution
    }

    pub fn last_flush(&self) -> i64 {
        self.last_flush
    }
}
