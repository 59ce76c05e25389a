use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use super::status::WorkerStatus;
use super::trigger::Wake;
use crate::error::{PipelineError, StoreResult};
use crate::modules::uploads::model::{Job, JobId};
use crate::modules::uploads::recorder::ErrorRecorder;
use crate::modules::uploads::repository::JobStore;
use crate::modules::uploads::service::UploadPipeline;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl RetryPolicy {
    /// Whether a job that just failed with `error` should be parked.
    fn gives_up(&self, job: &Job, error: &PipelineError) -> bool {
        let attempts = u32::try_from(job.attempts).unwrap_or(0).saturating_add(1);
        !error.is_retryable() || attempts >= self.max_attempts
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub completed: Vec<JobId>,
    pub failed: Vec<JobId>,
}

impl PassSummary {
    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.failed.is_empty()
    }
}

/// Single consumer of wake-ups: claims this worker's jobs and drains them
/// one at a time.
pub struct ClaimLoop {
    worker_id: String,
    store: Arc<dyn JobStore>,
    pipeline: UploadPipeline,
    recorder: ErrorRecorder,
    retry: RetryPolicy,
    status: Arc<WorkerStatus>,
}

impl ClaimLoop {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        pipeline: UploadPipeline,
        recorder: ErrorRecorder,
        retry: RetryPolicy,
        status: Arc<WorkerStatus>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            pipeline,
            recorder,
            retry,
            status,
        }
    }

    pub async fn run(self, mut wakes: mpsc::Receiver<Wake>, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.worker_id, "claim loop started");
        loop {
            let reason = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                wake = wakes.recv() => match wake {
                    Some(reason) => reason,
                    None => break,
                },
            };

            match self.run_pass(&shutdown).await {
                Ok(summary) if summary.is_empty() => {}
                Ok(summary) => info!(
                    ?reason,
                    completed = summary.completed.len(),
                    failed = summary.failed.len(),
                    "claim pass finished"
                ),
                Err(e) => error!(?reason, "claim pass aborted: {}", e),
            }
        }
        info!("claim loop stopped");
    }

    /// Claims and processes until a claim+list round yields nothing new.
    ///
    /// Jobs already attempted during this pass are skipped so a job whose
    /// release did not stick cannot be retried in a tight loop.
    pub async fn run_pass(&self, shutdown: &watch::Receiver<bool>) -> StoreResult<PassSummary> {
        self.status.pass_started();
        let result = self.drain(shutdown).await;
        self.status.pass_finished();
        result
    }

    async fn drain(&self, shutdown: &watch::Receiver<bool>) -> StoreResult<PassSummary> {
        let mut summary = PassSummary::default();
        let mut attempted: HashSet<JobId> = HashSet::new();

        loop {
            self.store.claim_pending(&self.worker_id).await?;
            let jobs: Vec<Job> = self
                .store
                .list_claimed(&self.worker_id)
                .await?
                .into_iter()
                .filter(|job| !attempted.contains(&job.id))
                .collect();
            if jobs.is_empty() {
                return Ok(summary);
            }

            for job in jobs {
                if *shutdown.borrow() {
                    return Ok(summary);
                }
                attempted.insert(job.id);
                if self.process(&job).await {
                    summary.completed.push(job.id);
                } else {
                    summary.failed.push(job.id);
                }
            }
        }
    }

    async fn process(&self, job: &Job) -> bool {
        let failure = match self.pipeline.process(job).await {
            Ok(()) => {
                self.status.job_completed();
                return true;
            }
            Err(failure) => failure,
        };

        self.status.job_failed();
        error!(
            job_id = job.id,
            stage = failure.stage,
            error = failure.error.name(),
            "job failed: {}",
            failure.error
        );
        self.recorder.record(job, failure.stage, &failure.error).await;

        let released = if self.retry.gives_up(job, &failure.error) {
            warn!(job_id = job.id, attempts = job.attempts + 1, "parking job");
            self.store.park_failed(job.id).await
        } else {
            self.store.release_claim(job.id, self.retry.retry_delay).await
        };
        if let Err(e) = released {
            warn!(job_id = job.id, "could not release claim: {}", e);
        }
        false
    }
}
