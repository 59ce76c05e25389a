use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::warn;

use super::model::{ErrorRecord, Job};
use crate::error::{PipelineError, StoreResult};

/// Longest `stack`/`args` value stored per record.
pub const MAX_DETAIL_CHARS: usize = 1023;

const RECORD_USERNAME: &str = "uploads";

#[async_trait]
pub trait ErrorSink: Send + Sync {
    async fn insert(&self, record: &ErrorRecord) -> StoreResult<()>;
}

#[derive(Clone)]
pub struct PgErrorSink {
    pool: PgPool,
}

impl PgErrorSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ErrorSink for PgErrorSink {
    async fn insert(&self, record: &ErrorRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO server_errors
                (hostname, event_id, method, args, username, name, message, extensions, stack)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&record.hostname)
        .bind(&record.event_id)
        .bind(&record.method)
        .bind(&record.args)
        .bind(&record.username)
        .bind(&record.name)
        .bind(&record.message)
        .bind(&record.extensions)
        .bind(&record.stack)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Diagnostic sink for pipeline failures. Never fails the caller.
#[derive(Clone)]
pub struct ErrorRecorder {
    hostname: String,
    sink: Arc<dyn ErrorSink>,
}

impl ErrorRecorder {
    pub fn new(hostname: impl Into<String>, sink: Arc<dyn ErrorSink>) -> Self {
        Self {
            hostname: hostname.into(),
            sink,
        }
    }

    pub fn build(&self, job: &Job, stage: &str, error: &PipelineError) -> ErrorRecord {
        let args = serde_json::to_string(job).unwrap_or_default();
        ErrorRecord {
            hostname: self.hostname.clone(),
            event_id: job.id.to_string(),
            method: stage.to_string(),
            args: truncate(&args, MAX_DETAIL_CHARS),
            username: RECORD_USERNAME.to_string(),
            name: error.name().to_string(),
            message: error.to_string(),
            extensions: String::new(),
            stack: truncate(&error_chain(error), MAX_DETAIL_CHARS),
        }
    }

    pub async fn record(&self, job: &Job, stage: &str, error: &PipelineError) {
        let record = self.build(job, stage, error);
        if let Err(e) = self.sink.insert(&record).await {
            warn!(job_id = job.id, stage, "failed to write error record: {}", e);
        }
    }
}

fn error_chain(error: &PipelineError) -> String {
    let mut chain = format!("{error:?}");
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str("\ncaused by: ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

fn truncate(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}
