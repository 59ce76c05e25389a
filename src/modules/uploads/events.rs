use serde::{Deserialize, Serialize};

/// Advisory payload published by the upload transport when an upload
/// finishes. Only used for logging; the job store is the source of truth.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UploadFinishedEvent {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub metadata: UploadFinishedMetadata,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UploadFinishedMetadata {
    #[serde(default, rename = "fileKey")]
    pub file_key: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub filetype: Option<String>,
}

impl UploadFinishedEvent {
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
