//! Thread-based worker pool running short-lived maintenance tasks so the
//! ingest loop never blocks on disk.
//!
//! One worker thread per in-flight task; completion is reported over a
//! `crossbeam` channel and reaped non-blockingly (`check`) or to
//! exhaustion (`drain`). A task name refuses a second concurrent run
//! while one by that name is already in flight.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TaskManagerError {
    #[error("task {0:?} is already running")]
    AlreadyRunning(String),
}

/// The outcome of a finished worker, as reported by [`TaskManager::check`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Ok,
    Err(String),
}

struct Completion {
    name: String,
    status: TaskStatus,
}

/// One worker per task kind at a time; `add` with a name already running
/// is refused rather than queued — callers gate on
/// [`TaskManager::name_is_running`] or only submit idempotent tasks.
pub struct TaskManager {
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    running: Mutex<HashSet<String>>,
    last_status: Mutex<HashMap<String, TaskStatus>>,
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskManager {
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            sender,
            receiver,
            running: Mutex::new(HashSet::new()),
            last_status: Mutex::new(HashMap::new()),
        }
    }

    pub fn name_is_running(&self, name: &str) -> bool {
        self.running
            .lock()
            .expect("task manager running set poisoned")
            .contains(name)
    }

    /// Spawns `task` under `name` on its own thread.
    pub fn add<F>(&self, name: impl Into<String>, task: F) -> Result<(), TaskManagerError>
    where
        F: FnOnce() -> Result<(), String> + Send + 'static,
    {
        let name = name.into();
        {
            let mut running = self.running.lock().expect("task manager running set poisoned");
            if running.contains(&name) {
                return Err(TaskManagerError::AlreadyRunning(name));
            }
            running.insert(name.clone());
        }

        let sender = self.sender.clone();
        let thread_name = name.clone();
        thread::spawn(move || {
            let status = match task() {
                Ok(()) => TaskStatus::Ok,
                Err(err) => TaskStatus::Err(err),
            };
            // The manager may already be gone (shutdown); a dropped receiver
            // just means this completion is never reaped.
            let _ = sender.send(Completion { name: thread_name, status });
        });
        debug!(task = %name, "spawned worker");
        Ok(())
    }

    /// Non-blocking reap of finished workers. Returns whether any worker is
    /// still running after the reap.
    pub fn check(&self) -> bool {
        while let Ok(completion) = self.receiver.try_recv() {
            self.reap(completion);
        }
        !self
            .running
            .lock()
            .expect("task manager running set poisoned")
            .is_empty()
    }

    /// Blocks until every currently-running worker reports completion.
    /// Called on shutdown before the final forced flush.
    pub fn drain(&self) {
        loop {
            let any_running = !self
                .running
                .lock()
                .expect("task manager running set poisoned")
                .is_empty();
            if !any_running {
                break;
            }
            if let Ok(completion) = self.receiver.recv_timeout(Duration::from_millis(100)) {
                self.reap(completion);
            }
        }
    }

    fn reap(&self, completion: Completion) {
        self.running
            .lock()
            .expect("task manager running set poisoned")
            .remove(&completion.name);
        if let TaskStatus::Err(ref err) = completion.status {
            warn!(task = %completion.name, %err, "task failed");
        }
        self.last_status
            .lock()
            .expect("task manager status map poisoned")
            .insert(completion.name, completion.status);
    }

    pub fn last_status(&self, name: &str) -> Option<TaskStatus> {
        self.last_status
            .lock()
            .expect("task manager status map poisoned")
            .get(name)
            .cloned()
    }
}
