use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::workers::status::StatusSnapshot;

#[derive(Debug, Serialize)]
pub struct WorkerStatusResponse {
    pub worker_id: String,
    pub subscribed: bool,
    pub passes: u64,
    pub completed: u64,
    pub failed: u64,
    pub poll_interval_secs: u64,
    pub last_pass_started: Option<String>,
    pub last_pass_finished: Option<String>,
}

impl WorkerStatusResponse {
    pub fn new(snapshot: StatusSnapshot, poll_interval_secs: u64) -> Self {
        Self {
            worker_id: snapshot.worker_id,
            subscribed: snapshot.subscribed,
            passes: snapshot.passes,
            completed: snapshot.completed,
            failed: snapshot.failed,
            poll_interval_secs,
            last_pass_started: snapshot.last_pass_started.and_then(rfc3339),
            last_pass_finished: snapshot.last_pass_finished.and_then(rfc3339),
        }
    }
}

fn rfc3339(at: OffsetDateTime) -> Option<String> {
    at.format(&Rfc3339).ok()
}
