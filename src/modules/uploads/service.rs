use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use super::model::{Job, MediaMetadata, UploadType};
use super::preview;
use super::repository::JobStore;
use crate::config::settings::{AppConfig, BucketConfig};
use crate::error::PipelineError;
use crate::infrastructure::api::client::{Completion, CompletionNotifier};
use crate::infrastructure::media::ffmpeg::MediaTool;
use crate::infrastructure::storage::publisher::StoragePublisher;
use crate::infrastructure::storage::s3::PutTarget;

/// A pipeline failure tagged with the stage that raised it.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: &'static str,
    pub error: PipelineError,
}

trait AtStage<T> {
    fn at(self, stage: &'static str) -> Result<T, StageFailure>;
}

impl<T, E: Into<PipelineError>> AtStage<T> for Result<T, E> {
    fn at(self, stage: &'static str) -> Result<T, StageFailure> {
        self.map_err(|e| StageFailure {
            stage,
            error: e.into(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub preview_url_prefix: String,
    pub buckets: BucketConfig,
    pub upload_files_dir: PathBuf,
    pub poster_frame_dir: PathBuf,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            preview_url_prefix: config.preview_url_prefix.clone(),
            buckets: config.buckets.clone(),
            upload_files_dir: config.media.upload_files_dir.clone(),
            poster_frame_dir: config.media.poster_frame_dir.clone(),
        }
    }
}

/// Finalizes one claimed upload: probe, transform, publish, notify.
pub struct UploadPipeline {
    settings: PipelineSettings,
    store: Arc<dyn JobStore>,
    media: Arc<dyn MediaTool>,
    publisher: StoragePublisher,
    notifier: Arc<dyn CompletionNotifier>,
}

impl UploadPipeline {
    pub fn new(
        settings: PipelineSettings,
        store: Arc<dyn JobStore>,
        media: Arc<dyn MediaTool>,
        publisher: StoragePublisher,
        notifier: Arc<dyn CompletionNotifier>,
    ) -> Self {
        Self {
            settings,
            store,
            media,
            publisher,
            notifier,
        }
    }

    pub async fn process(&self, job: &Job) -> Result<(), StageFailure> {
        let kind = job.kind().at("dispatch")?;
        let local_file = self.settings.upload_files_dir.join(job.local_name());
        if !tokio::fs::try_exists(&local_file).await.at("prepare")? {
            return Err(StageFailure {
                stage: "prepare",
                error: PipelineError::MissingArtifact(local_file.display().to_string()),
            });
        }

        let bucket = self.settings.buckets.for_type(kind).to_string();
        info!(job_id = job.id, file_key = %job.file_key, upload_type = %kind, "processing upload");

        let metadata = match kind {
            UploadType::PostVideo => self.prepare_video(job, &local_file, &bucket).await,
            UploadType::PostImage | UploadType::PostPreviewImage => {
                self.prepare_image(job, &local_file, &bucket).await
            }
        };
        let stored = self.store.save_derived(job.id, &metadata).await.at("save_derived")?;

        let target = PutTarget::new(&bucket, &job.file_key, &job.content_type)
            .with_original_filename(job.original_filename());
        self.publisher.publish(&target, &local_file).await.at("publish")?;

        self.store.mark_completed(job.id, &bucket).await.at("mark_completed")?;
        info!(job_id = job.id, bucket = %bucket, "upload finalized");

        self.notify(job, &bucket, stored).await;
        Ok(())
    }

    async fn prepare_image(&self, job: &Job, local_file: &Path, bucket: &str) -> MediaMetadata {
        let report = match self.media.probe(local_file).await {
            Ok(report) => report,
            Err(e) => {
                warn!(job_id = job.id, "probe failed, continuing without metadata: {}", e);
                return MediaMetadata::default();
            }
        };

        MediaMetadata {
            width: Some(report.width),
            height: Some(report.height),
            duration_ms: Some(0),
            preview_file_key: None,
            preview_url: Some(preview::preview_url(
                &self.settings.preview_url_prefix,
                bucket,
                &job.file_key,
            )),
        }
    }

    async fn prepare_video(&self, job: &Job, local_file: &Path, bucket: &str) -> MediaMetadata {
        let report = match self.media.probe(local_file).await {
            Ok(report) => report,
            Err(e) => {
                warn!(job_id = job.id, "probe failed, continuing without metadata: {}", e);
                return MediaMetadata::default();
            }
        };

        let mut metadata = MediaMetadata {
            width: Some(report.width),
            height: Some(report.height),
            duration_ms: Some(report.duration_ms()),
            ..MediaMetadata::default()
        };

        let timestamp = preview::poster_timestamp(report.duration_secs, job.preview_image_percent);
        match self.publish_poster_frame(job, local_file, &timestamp).await {
            Ok(Some(poster_key)) => {
                metadata.preview_url = Some(preview::preview_url(
                    &self.settings.preview_url_prefix,
                    bucket,
                    &poster_key,
                ));
                metadata.preview_file_key = Some(poster_key);
            }
            Ok(None) => warn!(job_id = job.id, "poster frame was empty, skipping preview"),
            Err(e) => warn!(job_id = job.id, timestamp = %timestamp, "poster frame skipped: {}", e),
        }
        metadata
    }

    /// Extracts a frame and uploads it. `None` when the extractor produced
    /// an empty file.
    async fn publish_poster_frame(
        &self,
        job: &Job,
        local_file: &Path,
        timestamp: &str,
    ) -> Result<Option<String>, PipelineError> {
        let dir = &self.settings.poster_frame_dir;
        tokio::fs::create_dir_all(dir).await?;
        let frame = dir.join(preview::poster_frame_file_name(&job.file_key));

        // Never reuse a frame left over from an earlier attempt.
        remove_if_present(&frame).await?;
        self.media.extract_frame(local_file, timestamp, &frame).await?;

        let size = match tokio::fs::metadata(&frame).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };
        if size == 0 {
            remove_if_present(&frame).await?;
            return Ok(None);
        }

        let key = preview::poster_frame_key(&job.file_key);
        let target = PutTarget::new(&self.settings.buckets.post_video, &key, mime::IMAGE_JPEG.as_ref());
        let published = self.publisher.publish(&target, &frame).await;
        remove_if_present(&frame).await?;
        published?;

        Ok(Some(key))
    }

    /// Reports what the store holds, which may predate this attempt.
    async fn notify(&self, job: &Job, bucket: &str, metadata: MediaMetadata) {
        let completion = Completion {
            bucket: bucket.to_string(),
            key: job.file_key.clone(),
            size: job.size,
            preview_image_file_key: metadata.preview_file_key,
            generated_preview_url: metadata.preview_url,
            duration: metadata.duration_ms.unwrap_or(0),
            width: metadata.width.unwrap_or(0),
            height: metadata.height.unwrap_or(0),
        };

        match self.notifier.notify(&completion).await {
            Ok(success) => info!(job_id = job.id, success, "completion notified"),
            Err(e) => warn!(job_id = job.id, "completion notification failed: {}", e),
        }
    }
}

async fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
