//! The ingest server: Carbon listeners, the link RPC listener, the
//! maintenance scheduler, and shutdown coordination.
//!
//! Binds its listener sockets, runs a 3-second scheduler tick, and on
//! shutdown drains in-flight tasks before a final synchronous flush.
//! Flushing schedules a `names` and a `data` task per tick; housework
//! (merge, downsample, cleanup) is only scheduled once both have
//! finished. Blocking `std::net` listeners and
//! [`crate::task_manager::TaskManager`] threads carry the concurrency.

pub mod carbon;
pub mod link;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::{info, warn};

use crate::agg::{AggError, AggRules};
use crate::buffer::{Buffer, BufferConfig, FlushPayload};
use crate::catalogue::{Catalogue, CatalogueError};
use crate::cleanup::{self, CleanupError};
use crate::config::{Config, ConfigError};
use crate::downsample;
use crate::index::{IndexError, MetricIndex};
use crate::merge;

const SCHEDULER_TICK: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Catalogue(#[from] CatalogueError),

    #[error(transparent)]
    Agg(#[from] AggError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("at least one retention must be configured")]
    NoRetentions,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the Unix epoch")
        .as_secs() as i64
}

/// Joins every listener/scheduler thread a [`Server::run`] spawned.
pub struct ServerHandle {
    threads: Vec<thread::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn join(self) {
        for t in self.threads {
            let _ = t.join();
        }
    }
}

/// Holds the live state shared across the Carbon listeners, the link RPC
/// listener, and the maintenance scheduler.
pub struct Server {
    config: Config,
    buffer: Arc<RwLock<Buffer>>,
    catalogue: Arc<Catalogue>,
    index: Arc<Mutex<MetricIndex>>,
    task_manager: Arc<crate::task_manager::TaskManager>,
    agg_rules: Arc<AggRules>,
    shutdown: Arc<AtomicBool>,
    housework_pending: Mutex<bool>,
    skipped_lines: Arc<AtomicU64>,
}

impl Server {
    /// Validates `config`, opens the catalogue and metric index under
    /// `config.data_dir`, and starts a fresh live buffer at `now`.
    pub fn new(config: Config, now: i64) -> Result<Arc<Self>, ServerError> {
        config.validate()?;
        let ingest_resolution = config
            .retentions
            .first()
            .map(|r| r.resolution)
            .ok_or(ServerError::NoRetentions)?;

        let buffer = Buffer::new(
            BufferConfig {
                resolution: ingest_resolution,
                flush_size: config.buffer_flush_size,
                compact_ratio: config.buffer_compact_ratio,
            },
            now,
        );

        let data_dir = PathBuf::from(&config.data_dir);
        let catalogue = Arc::new(Catalogue::new(data_dir.clone()));
        let index = Arc::new(Mutex::new(MetricIndex::open(&data_dir)?));
        let agg_rules = Arc::new(AggRules::new(&config.agg_rules, &config.agg_default_method)?);

        Ok(Arc::new(Self {
            config,
            buffer: Arc::new(RwLock::new(buffer)),
            catalogue,
            index,
            task_manager: Arc::new(crate::task_manager::TaskManager::new()),
            agg_rules,
            shutdown: Arc::new(AtomicBool::new(false)),
            housework_pending: Mutex::new(false),
            skipped_lines: Arc::new(AtomicU64::new(0)),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn buffer(&self) -> Arc<RwLock<Buffer>> {
        self.buffer.clone()
    }

    pub fn catalogue(&self) -> Arc<Catalogue> {
        self.catalogue.clone()
    }

    pub fn agg_rules(&self) -> Arc<AggRules> {
        self.agg_rules.clone()
    }

    /// Starts the Carbon TCP/UDP listeners, the link RPC listener, and the
    /// scheduler tick, each on its own thread. Returns a handle to join
    /// them after [`Server::shutdown`].
    pub fn run(self: &Arc<Self>) -> Result<ServerHandle, ServerError> {
        let mut threads = Vec::new();

        threads.push(carbon::spawn_tcp_listener(
            &self.config.carbon_bind,
            self.buffer.clone(),
            self.shutdown.clone(),
            self.skipped_lines.clone(),
        )?);
        threads.push(carbon::spawn_udp_listener(
            &self.config.carbon_bind_udp,
            self.buffer.clone(),
            self.shutdown.clone(),
            self.skipped_lines.clone(),
        )?);
        threads.push(link::LinkServer::spawn(
            &self.config.link_bind,
            self.buffer.clone(),
            self.shutdown.clone(),
        )?);

        let server = self.clone();
        threads.push(thread::spawn(move || server.scheduler_loop()));

        info!(
            carbon_bind = %self.config.carbon_bind,
            carbon_bind_udp = %self.config.carbon_bind_udp,
            link_bind = %self.config.link_bind,
            "hisser server started"
        );

        Ok(ServerHandle { threads })
    }

    fn scheduler_loop(self: Arc<Self>) {
        while !self.shutdown.load(Ordering::Acquire) {
            thread::sleep(SCHEDULER_TICK);
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }
            self.tick_once(unix_now());
        }
    }

    /// One scheduler tick: emit self-metrics, tick the buffer, schedule a
    /// flush's `names`/`data` tasks, reap finished workers, and promote to
    /// `housework` once both have finished.
    fn tick_once(&self, now: i64) {
        let metrics = {
            self.buffer
                .read()
                .expect("buffer lock poisoned")
                .counters()
                .as_metrics()
        };
        {
            let mut buffer = self.buffer.write().expect("buffer lock poisoned");
            for (name, value) in metrics {
                buffer.add(now, name.as_bytes(), value);
            }
        }

        let (flush, new_names) = {
            let mut buffer = self.buffer.write().expect("buffer lock poisoned");
            buffer.tick(now, false)
        };

        if let Some(payload) = flush {
            self.schedule_flush(payload, new_names);
        }

        self.task_manager.check();
        self.maybe_schedule_housework(now);
    }

    fn schedule_flush(&self, payload: FlushPayload, new_names: Vec<Vec<u8>>) {
        let resolution = payload.resolution;
        let start = payload.start;
        let size = payload.size;
        let mut rows: Vec<_> = payload
            .rows
            .iter()
            .map(|(name, values)| (crate::block::make_key(name), name.clone(), values.clone()))
            .collect();

        let data_dir = PathBuf::from(&self.config.data_dir).join(resolution.to_string());
        let catalogue = self.catalogue.clone();
        if let Err(err) = self.task_manager.add("data", move || {
            std::fs::create_dir_all(&data_dir).map_err(|e| e.to_string())?;
            crate::block::write_block(&data_dir, resolution, start, size, &mut rows)
                .map_err(|e| e.to_string())?;
            catalogue.notify_changed(resolution).map_err(|e| e.to_string())
        }) {
            warn!(%err, "data flush task was refused, a previous flush is still running");
        }

        if !new_names.is_empty() {
            let index = self.index.clone();
            if let Err(err) = self.task_manager.add("names", move || {
                index
                    .lock()
                    .expect("metric index lock poisoned")
                    .add(&new_names)
                    .map_err(|e| e.to_string())
            }) {
                warn!(%err, "names flush task was refused, a previous flush is still running");
            }
        }

        *self.housework_pending.lock().expect("housework flag poisoned") = true;
    }

    fn maybe_schedule_housework(&self, now: i64) {
        let ready = {
            let mut pending = self.housework_pending.lock().expect("housework flag poisoned");
            if *pending
                && !self.task_manager.name_is_running("names")
                && !self.task_manager.name_is_running("data")
                && !self.task_manager.name_is_running("housework")
            {
                *pending = false;
                true
            } else {
                false
            }
        };
        if ready {
            self.schedule_housework(now);
        }
    }

    /// Runs merge, then downsample, then retention cleanup, across every
    /// configured resolution. Refused if housework from a previous tick is
    /// still running — the next tick will retry once it finishes.
    fn schedule_housework(&self, now: i64) {
        let catalogue = self.catalogue.clone();
        let retentions = self.config.retentions.clone();
        let data_dir = PathBuf::from(&self.config.data_dir);
        let agg_rules = self.agg_rules.clone();
        let merge_max_size = self.config.merge_max_size;
        let merge_max_gap_size = self.config.merge_max_gap_size;
        let merge_ratio = self.config.merge_ratio;
        let downsample_max_gap = self.config.downsample_max_gap;
        let downsample_min_size = self.config.downsample_min_size;
        let downsample_max_size = self.config.downsample_max_size;

        if let Err(err) = self.task_manager.add("housework", move || {
            for retention in &retentions {
                let dir = data_dir.join(retention.resolution.to_string());
                let blocks = catalogue.blocks(retention.resolution, false).map_err(|e| e.to_string())?;
                let segments = merge::plan_merge(
                    &blocks,
                    retention.resolution,
                    merge_max_size,
                    merge_max_gap_size,
                    merge_ratio,
                );
                for segment in &segments {
                    merge::execute(&dir, retention.resolution, segment, &catalogue)
                        .map_err(|e| e.to_string())?;
                }
            }

            for pair in retentions.windows(2) {
                let (src, dst) = (pair[0], pair[1]);
                let blocks = catalogue.blocks(src.resolution, false).map_err(|e| e.to_string())?;
                let segments = downsample::plan(
                    &blocks,
                    src.resolution,
                    dst.resolution,
                    downsample_max_gap,
                    downsample_min_size,
                    downsample_max_size,
                    0,
                );
                if segments.is_empty() {
                    continue;
                }
                let dst_dir = data_dir.join(dst.resolution.to_string());
                std::fs::create_dir_all(&dst_dir).map_err(|e| e.to_string())?;
                for (slices, s_start, s_stop) in segments {
                    downsample::execute(
                        &dst_dir,
                        dst.resolution,
                        &agg_rules,
                        &slices,
                        s_start,
                        s_stop,
                        &catalogue,
                    )
                    .map_err(|e| e.to_string())?;
                }
            }

            cleanup::cleanup(&catalogue, &retentions, now).map_err(|e| e.to_string())?;
            Ok(())
        }) {
            warn!(%err, "housework task was refused, a previous run is still in flight");
        }
    }

    /// Stops accepting new connections, waits for in-flight tasks to
    /// finish, then runs one final forced flush synchronously in-process
    /// (bypassing the task manager, since the process is about to exit).
    pub fn shutdown(&self, now: i64) {
        info!("hisser server shutting down");
        self.shutdown.store(true, Ordering::Release);
        self.task_manager.drain();

        let (flush, new_names) = {
            let mut buffer = self.buffer.write().expect("buffer lock poisoned");
            buffer.tick(now, true)
        };

        if let Some(payload) = flush {
            self.force_flush(payload, new_names);
        }
    }

    fn force_flush(&self, payload: FlushPayload, new_names: Vec<Vec<u8>>) {
        let resolution = payload.resolution;
        let dir = PathBuf::from(&self.config.data_dir).join(resolution.to_string());
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(%err, "final flush: failed to create block directory");
            return;
        }

        let mut rows: Vec<_> = payload
            .rows
            .iter()
            .map(|(name, values)| (crate::block::make_key(name), name.clone(), values.clone()))
            .collect();

        match crate::block::write_block(&dir, resolution, payload.start, payload.size, &mut rows) {
            Ok(_) => {
                if let Err(err) = self.catalogue.notify_changed(resolution) {
                    warn!(%err, "final flush: catalogue refresh failed");
                }
            }
            Err(err) => warn!(%err, "final flush: block write failed"),
        }

        if !new_names.is_empty() {
            if let Err(err) = self
                .index
                .lock()
                .expect("metric index lock poisoned")
                .add(&new_names)
            {
                warn!(%err, "final flush: index update failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Retention;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config {
            data_dir: dir.to_string_lossy().into_owned(),
            retentions: vec![Retention { resolution: 10, retention: 1000 }],
            carbon_bind: "127.0.0.1:0".to_string(),
            carbon_bind_udp: "127.0.0.1:0".to_string(),
            link_bind: "127.0.0.1:0".to_string(),
            ..Config::default()
        };
        config.buffer_flush_size = 4;
        config
    }

    #[test]
    fn tick_with_no_ingest_is_a_no_op() {
        let dir = tempdir().unwrap();
        let server = Server::new(test_config(dir.path()), 1_000_000).unwrap();
        server.tick_once(1_000_003);
        assert!(!server.task_manager.name_is_running("data"));
    }

    #[test]
    fn shutdown_flushes_pending_points_to_disk() {
        let dir = tempdir().unwrap();
        let server = Server::new(test_config(dir.path()), 1000).unwrap();
        {
            let mut buffer = server.buffer.write().unwrap();
            buffer.add(1000, b"m1", 1.0);
        }
        // one resolution tick past the buffer's start, so there is a
        // completed window for the forced flush to actually emit.
        server.shutdown(1010);

        let blocks = server.catalogue.blocks(10, true).unwrap();
        assert_eq!(blocks.len(), 1);
    }

    #[test]
    fn unix_now_is_a_plausible_unix_timestamp() {
        assert!(unix_now() > 1_700_000_000);
    }
}
