//! Error taxonomy for the finalization worker.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Failures talking to the shared job store. Callers must not assume any
/// partial effect of the failed call.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job store unavailable: {0}")]
    Unavailable(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

/// Failures opening the upload event subscription.
#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("failed to connect to Redis: {0}")]
    Connect(String),

    #[error("failed to subscribe to {channel}: {reason}")]
    Subscribe { channel: String, reason: String },
}

/// Failures raised by a pipeline stage while finalizing one job.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("media probe failed: {0}")]
    Probe(String),

    #[error("frame extraction failed: {0}")]
    Extract(String),

    #[error("could not obtain upload credential: {0}")]
    Presign(String),

    #[error("storage upload returned status {status}")]
    Publish { status: u16 },

    #[error("storage upload failed: {0}")]
    Transfer(String),

    #[error("upload credential expired before the transfer finished")]
    CredentialExpired,

    #[error("completion notification failed: {0}")]
    Notify(String),

    #[error("unknown upload type {0:?}")]
    UnknownUploadType(String),

    #[error("uploaded file missing at {0}")]
    MissingArtifact(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PipelineError {
    /// Stable kind name, persisted with error records.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineError::Probe(_) => "ProbeFailure",
            PipelineError::Extract(_) => "ExtractFailure",
            PipelineError::Presign(_) => "PresignFailure",
            PipelineError::Publish { .. } => "PublishFailure",
            PipelineError::Transfer(_) => "PublishFailure",
            PipelineError::CredentialExpired => "CredentialExpired",
            PipelineError::Notify(_) => "NotifyFailure",
            PipelineError::UnknownUploadType(_) => "UnknownUploadType",
            PipelineError::MissingArtifact(_) => "MissingArtifact",
            PipelineError::Io(_) => "PipelineException",
            PipelineError::Store(_) => "StoreUnavailable",
        }
    }

    /// Whether another attempt in a later claim cycle could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PipelineError::UnknownUploadType(_) | PipelineError::MissingArtifact(_)
        )
    }
}
