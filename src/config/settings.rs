use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::env::{self, EnvKey, EnvSource, ProcessEnv};
use crate::modules::uploads::model::UploadType;

/// Object storage refuses presigned credentials longer than this.
pub const MAX_PRESIGN_EXPIRY_SECS: u64 = 600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone, Debug)]
pub struct BucketConfig {
    pub post_video: String,
    pub post_image: String,
    pub post_preview_image: String,
}

impl BucketConfig {
    pub fn for_type(&self, upload_type: UploadType) -> &str {
        match upload_type {
            UploadType::PostVideo => &self.post_video,
            UploadType::PostImage => &self.post_image,
            UploadType::PostPreviewImage => &self.post_preview_image,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub presign_expiry: Duration,
}

#[derive(Clone, Debug)]
pub struct MediaConfig {
    pub ffprobe_bin: String,
    pub ffmpeg_bin: String,
    pub upload_files_dir: PathBuf,
    pub poster_frame_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub database_url: String,
    pub redis_url: String,
    pub worker_id: String,
    pub api_server_url: url::Url,
    pub api_auth_token: String,
    pub preview_url_prefix: String,
    pub event_channel: String,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub buckets: BucketConfig,
    pub storage: StorageConfig,
    pub media: MediaConfig,
}

fn required(source: &impl EnvSource, key: EnvKey) -> Result<String, ConfigError> {
    source.var(key).ok_or(ConfigError::Missing(key.as_str()))
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_source(&ProcessEnv)
    }

    pub fn from_source(source: &impl EnvSource) -> Result<Self, ConfigError> {
        let api_server_url = required(source, EnvKey::ApiServerUrl)?;
        let api_server_url = url::Url::parse(&api_server_url).map_err(|e| ConfigError::Invalid {
            key: EnvKey::ApiServerUrl.as_str(),
            reason: e.to_string(),
        })?;

        let presign_secs = env::get_parsed(source, EnvKey::PresignExpirySecs, MAX_PRESIGN_EXPIRY_SECS)
            .clamp(1, MAX_PRESIGN_EXPIRY_SECS);

        Ok(Self {
            server_port: env::get_parsed(source, EnvKey::ServerPort, 3000),
            database_url: required(source, EnvKey::DatabaseUrl)?,
            redis_url: required(source, EnvKey::RedisUrl)?,
            worker_id: required(source, EnvKey::WorkerHostname)?,
            api_server_url,
            api_auth_token: required(source, EnvKey::ApiAuthToken)?,
            preview_url_prefix: required(source, EnvKey::PreviewUrlPrefix)?,
            event_channel: env::get_or(source, EnvKey::EventChannel, "redis_UPLOAD_FINISHED"),
            poll_interval: Duration::from_secs(
                env::get_parsed(source, EnvKey::PollIntervalSecs, 30u64).max(1),
            ),
            max_attempts: env::get_parsed(source, EnvKey::MaxAttempts, 5u32).max(1),
            retry_delay: Duration::from_secs(env::get_parsed(source, EnvKey::RetryDelaySecs, 300)),
            buckets: BucketConfig {
                post_video: required(source, EnvKey::BucketPostVideo)?,
                post_image: required(source, EnvKey::BucketPostImage)?,
                post_preview_image: required(source, EnvKey::BucketPostPreviewImage)?,
            },
            storage: StorageConfig {
                region: env::get_or(source, EnvKey::S3Region, "us-west-2"),
                endpoint: source.var(EnvKey::S3Endpoint),
                access_key: required(source, EnvKey::S3AccessKey)?,
                secret_key: required(source, EnvKey::S3SecretKey)?,
                presign_expiry: Duration::from_secs(presign_secs),
            },
            media: MediaConfig {
                ffprobe_bin: env::get_or(source, EnvKey::FfprobeBin, "ffprobe"),
                ffmpeg_bin: env::get_or(source, EnvKey::FfmpegBin, "ffmpeg"),
                upload_files_dir: env::get_or(source, EnvKey::UploadFilesDir, "files").into(),
                poster_frame_dir: env::get_or(source, EnvKey::PosterFrameDir, "posterFrames").into(),
            },
        })
    }
}
