use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::{JobId, JobRecord, JobStatus};

/* --------- DTOs de la API REST de jobs --------- */

/// Header con el id del principal que hace la request.
pub const OWNER_HEADER: &str = "x-owner-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResponse {
    pub job_id: JobId,
    pub job_type: String,
    pub status: JobStatus,
    pub progress: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl From<JobRecord> for JobResponse {
    fn from(job: JobRecord) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            status: job.status,
            progress: job.progress,
            message: job.message,
            created_at: job.created_at,
            updated_at: job.updated_at,
            error: job.error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAutoPilotMonitorRequest {
    pub project_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAutoPilotMonitorResponse {
    pub job_id: JobId,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
