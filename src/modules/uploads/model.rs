use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

use crate::error::PipelineError;

pub type JobId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadType {
    PostVideo,
    PostImage,
    PostPreviewImage,
}

impl UploadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadType::PostVideo => "postVideo",
            UploadType::PostImage => "postImage",
            UploadType::PostPreviewImage => "postPreviewImage",
        }
    }
}

impl fmt::Display for UploadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "postVideo" => Ok(UploadType::PostVideo),
            "postImage" => Ok(UploadType::PostImage),
            "postPreviewImage" => Ok(UploadType::PostPreviewImage),
            other => Err(PipelineError::UnknownUploadType(other.to_string())),
        }
    }
}

/// One row of `uploading_files`: an upload awaiting finalization.
#[derive(Debug, Serialize, Deserialize, FromRow, Clone)]
pub struct Job {
    pub id: JobId,
    pub upload_id: Option<String>,
    pub file_key: String,
    pub upload_type: String,
    pub original_filename: Option<String>,
    pub content_type: String,
    pub size: i64,
    pub preview_image_percent: Option<f64>,
    pub upload_server: Option<String>,
    #[sqlx(rename = "server_handling_processing")]
    pub claimed_by: Option<String>,
    #[sqlx(rename = "server_claimed_date")]
    pub claimed_at: Option<OffsetDateTime>,
    #[sqlx(rename = "completed_date")]
    pub completed_at: Option<OffsetDateTime>,
    pub bucket: Option<String>,
    #[sqlx(rename = "created_date")]
    pub created_at: OffsetDateTime,
    pub attempts: i32,
}

impl Job {
    pub fn kind(&self) -> Result<UploadType, PipelineError> {
        self.upload_type.parse()
    }

    /// Name the transport stored the finished bytes under; falls back to the
    /// file key for rows written before upload ids were recorded.
    pub fn local_name(&self) -> &str {
        self.upload_id.as_deref().unwrap_or(&self.file_key)
    }

    pub fn original_filename(&self) -> Option<&str> {
        self.original_filename
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }
}

/// Values the pipeline derives from the media and writes back once.
/// `None` means "not derived on this attempt" and never clears a stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, FromRow)]
pub struct MediaMetadata {
    pub width: Option<i32>,
    pub height: Option<i32>,
    #[sqlx(rename = "duration")]
    pub duration_ms: Option<i64>,
    pub preview_file_key: Option<String>,
    pub preview_url: Option<String>,
}

/// Append-only diagnostic row written to `server_errors`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub hostname: String,
    pub event_id: String,
    pub method: String,
    pub args: String,
    pub username: String,
    pub name: String,
    pub message: String,
    pub extensions: String,
    pub stack: String,
}
