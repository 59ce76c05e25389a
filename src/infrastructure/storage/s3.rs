use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use reqwest::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::settings::StorageConfig;
use crate::error::{PipelineError, PipelineResult};

/// Object to be written through a presigned PUT.
#[derive(Debug, Clone, PartialEq)]
pub struct PutTarget {
    pub bucket: String,
    pub key: String,
    pub content_type: String,
    pub content_disposition: Option<String>,
}

impl PutTarget {
    pub fn new(bucket: &str, key: &str, content_type: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: content_type.to_string(),
            content_disposition: None,
        }
    }

    /// Sets `attachment; filename="..."` when the original name is known.
    pub fn with_original_filename(mut self, filename: Option<&str>) -> Self {
        self.content_disposition = filename.map(|name| format!("attachment; filename=\"{name}\""));
        self
    }
}

#[derive(Debug, Clone)]
pub struct PresignedPut {
    pub url: String,
    pub expires_at: Instant,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn request_upload_credential(&self, target: &PutTarget) -> PipelineResult<PresignedPut>;

    /// Streams `path` to the presigned URL and returns the HTTP status.
    async fn upload(&self, credential: &PresignedPut, target: &PutTarget, path: &Path) -> PipelineResult<u16>;
}

#[derive(Clone)]
pub struct StorageService {
    client: Client,
    http: reqwest::Client,
    presign_expiry: Duration,
}

impl StorageService {
    pub fn new(config: &StorageConfig) -> Self {
        let credentials = Credentials::new(&config.access_key, &config.secret_key, None, None, "static");

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            // Custom endpoints (MinIO) need path-style addressing.
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        let client = Client::from_conf(builder.build());

        info!(region = %config.region, "✅ Object storage client ready");

        Self {
            client,
            http: reqwest::Client::new(),
            presign_expiry: config.presign_expiry,
        }
    }
}

#[async_trait]
impl ObjectStorage for StorageService {
    async fn request_upload_credential(&self, target: &PutTarget) -> PipelineResult<PresignedPut> {
        let presign_config = PresigningConfig::expires_in(self.presign_expiry)
            .map_err(|e| PipelineError::Presign(e.to_string()))?;
        let issued_at = Instant::now();

        let presigned = self
            .client
            .put_object()
            .bucket(&target.bucket)
            .key(&target.key)
            .content_type(&target.content_type)
            .set_content_disposition(target.content_disposition.clone())
            .presigned(presign_config)
            .await
            .map_err(|e| PipelineError::Presign(e.to_string()))?;

        Ok(PresignedPut {
            url: presigned.uri().to_string(),
            expires_at: issued_at + self.presign_expiry,
        })
    }

    async fn upload(&self, credential: &PresignedPut, target: &PutTarget, path: &Path) -> PipelineResult<u16> {
        let file = tokio::fs::File::open(path).await?;
        let length = file.metadata().await?.len();

        let mut request = self
            .http
            .put(&credential.url)
            .header(CONTENT_TYPE, &target.content_type)
            .header(CONTENT_LENGTH, length);
        if let Some(disposition) = &target.content_disposition {
            request = request.header(CONTENT_DISPOSITION, disposition);
        }

        let response = request
            .body(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            .send()
            .await
            .map_err(|e| PipelineError::Transfer(e.to_string()))?;

        let status = response.status().as_u16();
        debug!(bucket = %target.bucket, key = %target.key, status, bytes = length, "storage PUT finished");
        Ok(status)
    }
}
