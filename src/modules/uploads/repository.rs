use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;

use super::model::{Job, JobId, MediaMetadata};
use crate::error::StoreResult;

/// Access to the shared `uploading_files` table.
///
/// Claim and completion fields are only ever written through these calls.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Claims every unclaimed, unfinished job whose upload landed on this
    /// worker. Runs as one conditional update so two workers can never both
    /// win the same row. Returns the ids claimed by this call.
    async fn claim_pending(&self, worker_id: &str) -> StoreResult<Vec<JobId>>;

    /// Unfinished jobs claimed by `worker_id`, oldest first.
    async fn list_claimed(&self, worker_id: &str) -> StoreResult<Vec<Job>>;

    /// Persists derived media fields. Values already present are kept and
    /// the merged row is returned.
    async fn save_derived(&self, job_id: JobId, metadata: &MediaMetadata) -> StoreResult<MediaMetadata>;

    async fn mark_completed(&self, job_id: JobId, bucket: &str) -> StoreResult<()>;

    /// Gives up the claim after a failed attempt; the job becomes claimable
    /// again once `retry_delay` has passed.
    async fn release_claim(&self, job_id: JobId, retry_delay: Duration) -> StoreResult<()>;

    /// Gives up the claim for good. Parked jobs wait for manual review.
    async fn park_failed(&self, job_id: JobId) -> StoreResult<()>;
}

const JOB_COLUMNS: &str = r#"
    id, upload_id, file_key, upload_type, original_filename, content_type, size,
    preview_image_percent, upload_server, server_handling_processing,
    server_claimed_date, completed_date, bucket, created_date, attempts
"#;

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn claim_pending(&self, worker_id: &str) -> StoreResult<Vec<JobId>> {
        let ids: Vec<JobId> = sqlx::query_scalar(
            r#"
            UPDATE uploading_files
            SET server_handling_processing = $1, server_claimed_date = NOW()
            WHERE upload_server = $1
              AND server_handling_processing IS NULL
              AND completed_date IS NULL
              AND failed_date IS NULL
              AND (retry_after IS NULL OR retry_after <= NOW())
            RETURNING id
            "#,
        )
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        debug!(worker_id, claimed = ids.len(), "claim_pending");
        Ok(ids)
    }

    async fn list_claimed(&self, worker_id: &str) -> StoreResult<Vec<Job>> {
        let sql = format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM uploading_files
            WHERE server_handling_processing = $1
              AND completed_date IS NULL
              AND failed_date IS NULL
            ORDER BY created_date ASC, id ASC
            "#
        );
        let jobs = sqlx::query_as::<_, Job>(&sql)
            .bind(worker_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(jobs)
    }

    async fn save_derived(&self, job_id: JobId, metadata: &MediaMetadata) -> StoreResult<MediaMetadata> {
        let stored = sqlx::query_as::<_, MediaMetadata>(
            r#"
            UPDATE uploading_files
            SET width = COALESCE(width, $2),
                height = COALESCE(height, $3),
                duration = COALESCE(duration, $4),
                preview_file_key = COALESCE(preview_file_key, $5),
                preview_url = COALESCE(preview_url, $6)
            WHERE id = $1
            RETURNING width, height, duration, preview_file_key, preview_url
            "#,
        )
        .bind(job_id)
        .bind(metadata.width)
        .bind(metadata.height)
        .bind(metadata.duration_ms)
        .bind(metadata.preview_file_key.as_deref())
        .bind(metadata.preview_url.as_deref())
        .fetch_optional(&self.pool)
        .await?;
        Ok(stored.unwrap_or_else(|| metadata.clone()))
    }

    async fn mark_completed(&self, job_id: JobId, bucket: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE uploading_files
            SET bucket = $2, completed_date = NOW()
            WHERE id = $1 AND completed_date IS NULL
            "#,
        )
        .bind(job_id)
        .bind(bucket)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn release_claim(&self, job_id: JobId, retry_delay: Duration) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE uploading_files
            SET server_handling_processing = NULL,
                server_claimed_date = NULL,
                attempts = attempts + 1,
                retry_after = NOW() + make_interval(secs => $2)
            WHERE id = $1 AND completed_date IS NULL
            "#,
        )
        .bind(job_id)
        .bind(retry_delay.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn park_failed(&self, job_id: JobId) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE uploading_files
            SET server_handling_processing = NULL,
                server_claimed_date = NULL,
                attempts = attempts + 1,
                failed_date = NOW()
            WHERE id = $1 AND completed_date IS NULL
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
