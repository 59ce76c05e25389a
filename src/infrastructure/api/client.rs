use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};

const FILE_UPLOAD_COMPLETED: &str = "mutation fileUploadCompleted($bucket: String!, $key: String!, $size: BigInt!, $previewImageFileKey: String, $generatedPreviewUrl: String, $duration: Int, $width: Int, $height: Int) {
  fileUploadCompleted(bucket: $bucket, key: $key, size: $size, previewImageFileKey: $previewImageFileKey, generatedPreviewUrl: $generatedPreviewUrl, duration: $duration, width: $width, height: $height) {
    success
  }
}";

/// Variables of the `fileUploadCompleted` mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub bucket: String,
    pub key: String,
    pub size: i64,
    pub preview_image_file_key: Option<String>,
    pub generated_preview_url: Option<String>,
    pub duration: i64,
    pub width: i32,
    pub height: i32,
}

#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    /// Tells the downstream API an asset is ready. Returns the reported
    /// success flag.
    async fn notify(&self, completion: &Completion) -> PipelineResult<bool>;
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    #[serde(default)]
    data: Option<CompletedData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct CompletedData {
    #[serde(rename = "fileUploadCompleted")]
    file_upload_completed: Option<SuccessFlag>,
}

#[derive(Debug, Deserialize)]
struct SuccessFlag {
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    endpoint: url::Url,
    auth_token: String,
}

impl ApiClient {
    pub fn new(endpoint: url::Url, auth_token: impl Into<String>) -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| PipelineError::Notify(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            auth_token: auth_token.into(),
        })
    }
}

#[async_trait]
impl CompletionNotifier for ApiClient {
    async fn notify(&self, completion: &Completion) -> PipelineResult<bool> {
        let body = json!({
            "operationName": "fileUploadCompleted",
            "query": FILE_UPLOAD_COMPLETED,
            "variables": completion,
        });

        let response = self
            .http
            .post(self.endpoint.clone())
            .header(AUTHORIZATION, &self.auth_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Notify(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::Notify(format!("API responded with {status}")));
        }

        let payload: GraphQlResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Notify(format!("unreadable API response: {e}")))?;

        if !payload.errors.is_empty() {
            let messages: Vec<&str> = payload.errors.iter().map(|e| e.message.as_str()).collect();
            return Err(PipelineError::Notify(messages.join("; ")));
        }

        let success = payload
            .data
            .and_then(|d| d.file_upload_completed)
            .map(|f| f.success)
            .unwrap_or(false);
        debug!(key = %completion.key, success, "fileUploadCompleted sent");
        Ok(success)
    }
}
