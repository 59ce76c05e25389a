//! In-memory collaborators for unit tests.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::mpsc;

use crate::config::env::{EnvKey, EnvSource};
use crate::config::settings::{AppConfig, BucketConfig};
use crate::error::{PipelineError, PipelineResult, StoreError, StoreResult, SubscribeError};
use crate::infrastructure::api::client::{Completion, CompletionNotifier};
use crate::infrastructure::media::ffmpeg::{MediaTool, ProbeReport};
use crate::infrastructure::redis::client::{EventStream, EventSubscriber};
use crate::infrastructure::storage::publisher::StoragePublisher;
use crate::infrastructure::storage::s3::{ObjectStorage, PresignedPut, PutTarget};
use crate::modules::uploads::model::{ErrorRecord, Job, JobId, MediaMetadata};
use crate::modules::uploads::recorder::{ErrorRecorder, ErrorSink};
use crate::modules::uploads::repository::JobStore;
use crate::modules::uploads::service::{PipelineSettings, UploadPipeline};
use crate::workers::finalizer::{ClaimLoop, RetryPolicy};
use crate::workers::status::WorkerStatus;

pub const WORKER: &str = "up01";

pub struct MapEnv(pub HashMap<&'static str, &'static str>);

impl EnvSource for MapEnv {
    fn var(&self, key: EnvKey) -> Option<String> {
        self.0.get(key.as_str()).map(|v| v.to_string())
    }
}

/// Only the variables without defaults.
pub fn minimal_env() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("DATABASE_URL", "postgres://localhost/murmur"),
        ("REDIS_URL", "redis://localhost"),
        ("HOSTNAME_FOR_UPLOADS", WORKER),
        ("API_SERVER_URL", "https://api.example.com/graphql"),
        ("FILE_UPLOAD_AUTH_TOKEN", "secret"),
        ("PREVIEW_URL_PREFIX", "https://cdn.example.com/"),
        ("BUCKET_POST_VIDEO", "videos"),
        ("BUCKET_POST_IMAGE", "images"),
        ("BUCKET_POST_PREVIEW_IMAGE", "previews"),
        ("S3_ACCESS_KEY", "ak"),
        ("S3_SECRET_KEY", "sk"),
    ])
}

pub fn test_config() -> AppConfig {
    AppConfig::from_source(&MapEnv(minimal_env())).unwrap()
}

pub fn job(id: JobId, file_key: &str, upload_type: &str) -> Job {
    Job {
        id,
        upload_id: Some(format!("upload-{id}")),
        file_key: file_key.to_string(),
        upload_type: upload_type.to_string(),
        original_filename: None,
        content_type: if upload_type == "postVideo" { "video/mp4" } else { "image/jpeg" }.to_string(),
        size: 1024,
        preview_image_percent: None,
        upload_server: Some(WORKER.to_string()),
        claimed_by: None,
        claimed_at: None,
        completed_at: None,
        bucket: None,
        created_at: OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(id),
        attempts: 0,
    }
}

struct Row {
    job: Job,
    retry_after: Option<Instant>,
    parked: bool,
}

#[derive(Default)]
struct StoreState {
    rows: BTreeMap<JobId, Row>,
    derived: HashMap<JobId, MediaMetadata>,
    completed: Vec<(JobId, String)>,
}

/// Mirrors the conditional updates of `PgJobStore` under one lock.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<StoreState>,
    unavailable: AtomicBool,
}

impl MemoryJobStore {
    pub fn insert(&self, job: Job) {
        let row = Row {
            job,
            retry_after: None,
            parked: false,
        };
        self.state.lock().unwrap().rows.insert(row.job.id, row);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn completed(&self) -> Vec<(JobId, String)> {
        self.state.lock().unwrap().completed.clone()
    }

    pub fn derived(&self, id: JobId) -> Option<MediaMetadata> {
        self.state.lock().unwrap().derived.get(&id).cloned()
    }

    pub fn claimed_by(&self, id: JobId) -> Option<String> {
        self.state.lock().unwrap().rows.get(&id).and_then(|r| r.job.claimed_by.clone())
    }

    pub fn attempts(&self, id: JobId) -> i32 {
        self.state.lock().unwrap().rows.get(&id).map(|r| r.job.attempts).unwrap_or(0)
    }

    pub fn is_parked(&self, id: JobId) -> bool {
        self.state.lock().unwrap().rows.get(&id).is_some_and(|r| r.parked)
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("simulated outage".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn claim_pending(&self, worker_id: &str) -> StoreResult<Vec<JobId>> {
        self.check()?;
        let now = Instant::now();
        let mut state = self.state.lock().unwrap();
        let mut claimed = Vec::new();
        for row in state.rows.values_mut() {
            let eligible = row.job.upload_server.as_deref() == Some(worker_id)
                && row.job.claimed_by.is_none()
                && row.job.completed_at.is_none()
                && !row.parked
                && row.retry_after.is_none_or(|t| t <= now);
            if eligible {
                row.job.claimed_by = Some(worker_id.to_string());
                row.job.claimed_at = Some(OffsetDateTime::now_utc());
                claimed.push(row.job.id);
            }
        }
        Ok(claimed)
    }

    async fn list_claimed(&self, worker_id: &str) -> StoreResult<Vec<Job>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        let mut jobs: Vec<Job> = state
            .rows
            .values()
            .filter(|r| {
                r.job.claimed_by.as_deref() == Some(worker_id) && r.job.completed_at.is_none() && !r.parked
            })
            .map(|r| r.job.clone())
            .collect();
        jobs.sort_by_key(|j| (j.created_at, j.id));
        Ok(jobs)
    }

    async fn save_derived(&self, job_id: JobId, metadata: &MediaMetadata) -> StoreResult<MediaMetadata> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let entry = state.derived.entry(job_id).or_default();
        entry.width = entry.width.or(metadata.width);
        entry.height = entry.height.or(metadata.height);
        entry.duration_ms = entry.duration_ms.or(metadata.duration_ms);
        if entry.preview_file_key.is_none() {
            entry.preview_file_key = metadata.preview_file_key.clone();
        }
        if entry.preview_url.is_none() {
            entry.preview_url = metadata.preview_url.clone();
        }
        Ok(entry.clone())
    }

    async fn mark_completed(&self, job_id: JobId, bucket: &str) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let newly_completed = match state.rows.get_mut(&job_id) {
            Some(row) if row.job.completed_at.is_none() => {
                row.job.completed_at = Some(OffsetDateTime::now_utc());
                row.job.bucket = Some(bucket.to_string());
                true
            }
            _ => false,
        };
        if newly_completed {
            state.completed.push((job_id, bucket.to_string()));
        }
        Ok(())
    }

    async fn release_claim(&self, job_id: JobId, retry_delay: Duration) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.rows.get_mut(&job_id).filter(|r| r.job.completed_at.is_none()) {
            row.job.claimed_by = None;
            row.job.claimed_at = None;
            row.job.attempts += 1;
            row.retry_after = Some(Instant::now() + retry_delay);
        }
        Ok(())
    }

    async fn park_failed(&self, job_id: JobId) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        if let Some(row) = state.rows.get_mut(&job_id).filter(|r| r.job.completed_at.is_none()) {
            row.job.claimed_by = None;
            row.job.claimed_at = None;
            row.job.attempts += 1;
            row.parked = true;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryErrorSink {
    records: Mutex<Vec<ErrorRecord>>,
}

impl MemoryErrorSink {
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl ErrorSink for MemoryErrorSink {
    async fn insert(&self, record: &ErrorRecord) -> StoreResult<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

pub struct FailingErrorSink;

#[async_trait]
impl ErrorSink for FailingErrorSink {
    async fn insert(&self, _record: &ErrorRecord) -> StoreResult<()> {
        Err(StoreError::Unavailable("error table locked".into()))
    }
}

type UploadHook = Box<dyn Fn(&PutTarget) + Send + Sync>;

pub struct FakeStorage {
    status: AtomicU16,
    expired: bool,
    presign_fails: bool,
    uploads: Mutex<Vec<(PutTarget, PathBuf)>>,
    on_upload: Mutex<Option<UploadHook>>,
}

impl FakeStorage {
    pub fn with_status(status: u16) -> Self {
        Self {
            status: AtomicU16::new(status),
            expired: false,
            presign_fails: false,
            uploads: Mutex::default(),
            on_upload: Mutex::default(),
        }
    }

    pub fn failing_presign() -> Self {
        Self {
            presign_fails: true,
            ..Self::with_status(200)
        }
    }

    pub fn already_expired(mut self) -> Self {
        self.expired = true;
        self
    }

    /// Runs `hook` after every recorded upload.
    pub fn on_upload(&self, hook: impl Fn(&PutTarget) + Send + Sync + 'static) {
        *self.on_upload.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::SeqCst);
    }

    pub fn uploads(&self) -> Vec<(PutTarget, PathBuf)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn request_upload_credential(&self, target: &PutTarget) -> PipelineResult<PresignedPut> {
        if self.presign_fails {
            return Err(PipelineError::Presign("no credentials".into()));
        }
        let now = Instant::now();
        let expires_at = if self.expired {
            now.checked_sub(Duration::from_secs(1)).unwrap_or(now)
        } else {
            now + Duration::from_secs(600)
        };
        Ok(PresignedPut {
            url: format!("https://storage.test/{}/{}", target.bucket, target.key),
            expires_at,
        })
    }

    async fn upload(&self, _credential: &PresignedPut, target: &PutTarget, path: &Path) -> PipelineResult<u16> {
        self.uploads.lock().unwrap().push((target.clone(), path.to_path_buf()));
        if let Some(hook) = self.on_upload.lock().unwrap().as_ref() {
            hook(target);
        }
        Ok(self.status.load(Ordering::SeqCst))
    }
}

#[derive(Clone, Copy)]
enum Frame {
    Jpeg,
    Empty,
    Fails,
}

pub struct FakeMedia {
    probe: Option<ProbeReport>,
    frame: Frame,
    timestamps: Mutex<Vec<String>>,
    preexisted: Mutex<Vec<bool>>,
}

impl FakeMedia {
    pub fn image(width: i32, height: i32) -> Self {
        Self::with_probe(Some(ProbeReport {
            width,
            height,
            duration_secs: None,
        }))
    }

    pub fn video(width: i32, height: i32, duration_secs: f64) -> Self {
        Self::with_probe(Some(ProbeReport {
            width,
            height,
            duration_secs: Some(duration_secs),
        }))
    }

    pub fn failing_probe() -> Self {
        Self::with_probe(None)
    }

    fn with_probe(probe: Option<ProbeReport>) -> Self {
        Self {
            probe,
            frame: Frame::Jpeg,
            timestamps: Mutex::default(),
            preexisted: Mutex::default(),
        }
    }

    pub fn with_empty_frame(mut self) -> Self {
        self.frame = Frame::Empty;
        self
    }

    pub fn with_failing_extract(mut self) -> Self {
        self.frame = Frame::Fails;
        self
    }

    pub fn timestamps(&self) -> Vec<String> {
        self.timestamps.lock().unwrap().clone()
    }

    pub fn frame_preexisted(&self) -> Vec<bool> {
        self.preexisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaTool for FakeMedia {
    async fn probe(&self, _input: &Path) -> PipelineResult<ProbeReport> {
        self.probe
            .clone()
            .ok_or_else(|| PipelineError::Probe("ffprobe error -1094995529: Invalid data".into()))
    }

    async fn extract_frame(&self, _input: &Path, timestamp: &str, output: &Path) -> PipelineResult<()> {
        self.timestamps.lock().unwrap().push(timestamp.to_string());
        self.preexisted.lock().unwrap().push(output.exists());
        match self.frame {
            Frame::Jpeg => tokio::fs::write(output, b"\xff\xd8\xff\xe0fake").await?,
            Frame::Empty => tokio::fs::write(output, b"").await?,
            Frame::Fails => return Err(PipelineError::Extract("ffmpeg exited with 1".into())),
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    fails: bool,
    calls: Mutex<Vec<Completion>>,
}

impl FakeNotifier {
    pub fn failing() -> Self {
        Self {
            fails: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Completion> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionNotifier for FakeNotifier {
    async fn notify(&self, completion: &Completion) -> PipelineResult<bool> {
        self.calls.lock().unwrap().push(completion.clone());
        if self.fails {
            return Err(PipelineError::Notify("connection refused".into()));
        }
        Ok(true)
    }
}

/// Subscriber backed by an in-process channel; subscribes once.
pub struct FakeSubscriber {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl FakeSubscriber {
    pub fn new() -> (Self, mpsc::UnboundedSender<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                receiver: Mutex::new(Some(rx)),
            },
            tx,
        )
    }

    pub fn unreachable() -> Self {
        Self {
            receiver: Mutex::new(None),
        }
    }
}

#[async_trait]
impl EventSubscriber for FakeSubscriber {
    async fn subscribe(&self) -> Result<EventStream, SubscribeError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| SubscribeError::Connect("connection refused".into()))?;
        let stream = futures_util::stream::unfold(receiver, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        });
        Ok(stream.boxed())
    }
}

/// Scratch directories plus one of every fake, wired like production.
pub struct TestBed {
    dir: TempDir,
    pub store: Arc<MemoryJobStore>,
    pub media: Arc<FakeMedia>,
    pub storage: Arc<FakeStorage>,
    pub notifier: Arc<FakeNotifier>,
    pub errors: Arc<MemoryErrorSink>,
    pub status: Arc<WorkerStatus>,
}

impl TestBed {
    pub fn new() -> Self {
        Self::build(FakeMedia::image(640, 480), FakeStorage::with_status(200), FakeNotifier::default())
    }

    pub fn with_media(media: FakeMedia) -> Self {
        Self::build(media, FakeStorage::with_status(200), FakeNotifier::default())
    }

    pub fn with_storage(storage: FakeStorage) -> Self {
        Self::build(FakeMedia::image(640, 480), storage, FakeNotifier::default())
    }

    pub fn with_notifier(notifier: FakeNotifier) -> Self {
        Self::build(FakeMedia::image(640, 480), FakeStorage::with_status(200), notifier)
    }

    fn build(media: FakeMedia, storage: FakeStorage, notifier: FakeNotifier) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            store: Arc::default(),
            media: Arc::new(media),
            storage: Arc::new(storage),
            notifier: Arc::new(notifier),
            errors: Arc::default(),
            status: Arc::new(WorkerStatus::new(WORKER)),
        }
    }

    pub fn files_dir(&self) -> PathBuf {
        self.dir.path().join("files")
    }

    pub fn poster_dir(&self) -> PathBuf {
        self.dir.path().join("posterFrames")
    }

    /// Writes the uploaded bytes where the transport would leave them and
    /// registers the job.
    pub fn stage(&self, job: Job) -> Job {
        std::fs::create_dir_all(self.files_dir()).unwrap();
        std::fs::write(self.files_dir().join(job.local_name()), b"uploaded media").unwrap();
        self.store.insert(job.clone());
        job
    }

    pub fn settings(&self) -> PipelineSettings {
        PipelineSettings {
            preview_url_prefix: "https://cdn.example.com/".into(),
            buckets: BucketConfig {
                post_video: "videos".into(),
                post_image: "images".into(),
                post_preview_image: "previews".into(),
            },
            upload_files_dir: self.files_dir(),
            poster_frame_dir: self.poster_dir(),
        }
    }

    pub fn pipeline(&self) -> UploadPipeline {
        UploadPipeline::new(
            self.settings(),
            self.store.clone(),
            self.media.clone(),
            StoragePublisher::new(self.storage.clone()),
            self.notifier.clone(),
        )
    }

    /// Same wiring as `pipeline` but with a different media tool, for
    /// attempts that see the file differently.
    pub fn pipeline_with_media(&self, media: FakeMedia) -> UploadPipeline {
        UploadPipeline::new(
            self.settings(),
            self.store.clone(),
            Arc::new(media),
            StoragePublisher::new(self.storage.clone()),
            self.notifier.clone(),
        )
    }

    pub fn claim_loop(&self, max_attempts: u32) -> ClaimLoop {
        self.claim_loop_with_delay(max_attempts, Duration::from_secs(300))
    }

    pub fn claim_loop_with_delay(&self, max_attempts: u32, retry_delay: Duration) -> ClaimLoop {
        ClaimLoop::new(
            WORKER,
            self.store.clone(),
            self.pipeline(),
            ErrorRecorder::new(WORKER, self.errors.clone()),
            RetryPolicy {
                max_attempts,
                retry_delay,
            },
            self.status.clone(),
        )
    }
}
