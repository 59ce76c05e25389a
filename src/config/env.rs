use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    RedisUrl,
    WorkerHostname,
    ApiServerUrl,
    ApiAuthToken,
    PreviewUrlPrefix,
    BucketPostVideo,
    BucketPostImage,
    BucketPostPreviewImage,
    S3Region,
    S3Endpoint,
    S3AccessKey,
    S3SecretKey,
    EventChannel,
    UploadFilesDir,
    PosterFrameDir,
    PollIntervalSecs,
    PresignExpirySecs,
    MaxAttempts,
    RetryDelaySecs,
    FfprobeBin,
    FfmpegBin,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::RedisUrl => "REDIS_URL",
            EnvKey::WorkerHostname => "HOSTNAME_FOR_UPLOADS",
            EnvKey::ApiServerUrl => "API_SERVER_URL",
            EnvKey::ApiAuthToken => "FILE_UPLOAD_AUTH_TOKEN",
            EnvKey::PreviewUrlPrefix => "PREVIEW_URL_PREFIX",
            EnvKey::BucketPostVideo => "BUCKET_POST_VIDEO",
            EnvKey::BucketPostImage => "BUCKET_POST_IMAGE",
            EnvKey::BucketPostPreviewImage => "BUCKET_POST_PREVIEW_IMAGE",
            EnvKey::S3Region => "S3_REGION",
            EnvKey::S3Endpoint => "S3_ENDPOINT",
            EnvKey::S3AccessKey => "S3_ACCESS_KEY",
            EnvKey::S3SecretKey => "S3_SECRET_KEY",
            EnvKey::EventChannel => "UPLOAD_EVENT_CHANNEL",
            EnvKey::UploadFilesDir => "UPLOAD_FILES_DIR",
            EnvKey::PosterFrameDir => "POSTER_FRAME_DIR",
            EnvKey::PollIntervalSecs => "POLL_INTERVAL_SECS",
            EnvKey::PresignExpirySecs => "PRESIGN_EXPIRY_SECS",
            EnvKey::MaxAttempts => "MAX_ATTEMPTS",
            EnvKey::RetryDelaySecs => "RETRY_DELAY_SECS",
            EnvKey::FfprobeBin => "FFPROBE_BIN",
            EnvKey::FfmpegBin => "FFMPEG_BIN",
        }
    }
}

/// Source of raw configuration values. The process environment in
/// production, a map in tests.
pub trait EnvSource {
    fn var(&self, key: EnvKey) -> Option<String>;
}

pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: EnvKey) -> Option<String> {
        env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
    }
}

pub fn get_or(source: &impl EnvSource, key: EnvKey, default: &str) -> String {
    source.var(key).unwrap_or_else(|| default.to_string())
}

pub fn get_parsed<T: FromStr>(source: &impl EnvSource, key: EnvKey, default: T) -> T {
    match source.var(key) {
        Some(val) => val.trim().parse::<T>().unwrap_or(default),
        None => default,
    }
}
