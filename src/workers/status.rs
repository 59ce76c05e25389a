use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use time::OffsetDateTime;

/// Live counters shared by the claim loop, the event listener and the
/// status endpoint.
#[derive(Debug)]
pub struct WorkerStatus {
    worker_id: String,
    passes: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    subscribed: AtomicBool,
    last_pass_started: RwLock<Option<OffsetDateTime>>,
    last_pass_finished: RwLock<Option<OffsetDateTime>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub worker_id: String,
    pub passes: u64,
    pub completed: u64,
    pub failed: u64,
    pub subscribed: bool,
    pub last_pass_started: Option<OffsetDateTime>,
    pub last_pass_finished: Option<OffsetDateTime>,
}

impl WorkerStatus {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            passes: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            subscribed: AtomicBool::new(false),
            last_pass_started: RwLock::new(None),
            last_pass_finished: RwLock::new(None),
        }
    }

    pub fn pass_started(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut started) = self.last_pass_started.write() {
            *started = Some(OffsetDateTime::now_utc());
        }
    }

    pub fn pass_finished(&self) {
        if let Ok(mut finished) = self.last_pass_finished.write() {
            *finished = Some(OffsetDateTime::now_utc());
        }
    }

    pub fn job_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_subscribed(&self, subscribed: bool) {
        self.subscribed.store(subscribed, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            worker_id: self.worker_id.clone(),
            passes: self.passes.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            subscribed: self.subscribed.load(Ordering::Relaxed),
            last_pass_started: self.last_pass_started.read().ok().and_then(|t| *t),
            last_pass_finished: self.last_pass_finished.read().ok().and_then(|t| *t),
        }
    }
}
