use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use super::s3::{ObjectStorage, PutTarget};
use crate::error::{PipelineError, PipelineResult};

/// Publishes local artifacts through short-lived upload credentials.
///
/// A transfer only counts when it returns exactly 200 before the credential
/// it was started with expires.
#[derive(Clone)]
pub struct StoragePublisher {
    storage: Arc<dyn ObjectStorage>,
}

impl StoragePublisher {
    pub fn new(storage: Arc<dyn ObjectStorage>) -> Self {
        Self { storage }
    }

    pub async fn publish(&self, target: &PutTarget, path: &Path) -> PipelineResult<()> {
        let credential = self.storage.request_upload_credential(target).await?;
        let status = self.storage.upload(&credential, target, path).await?;

        if Instant::now() > credential.expires_at {
            warn!(bucket = %target.bucket, key = %target.key, status, "upload outlived its credential");
            return Err(PipelineError::CredentialExpired);
        }
        if status != 200 {
            return Err(PipelineError::Publish { status });
        }

        info!(bucket = %target.bucket, key = %target.key, "published");
        Ok(())
    }
}
