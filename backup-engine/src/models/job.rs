use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::BackupType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// One backup attempt for one event. Opened and closed inside a single
/// pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupJob {
    pub job_id: String,
    pub path_id: String,
    pub backup_type: Option<BackupType>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub files_processed: u32,
    pub files_failed: u32,
    pub total_size: u64,
    pub status: JobStatus,
    pub error: Option<String>,
}

/// Clock for a job that has not finished yet.
#[derive(Debug, Clone)]
pub struct JobClock {
    job_id: String,
    path_id: String,
    started_at: DateTime<Utc>,
}

impl JobClock {
    pub fn start(path_id: &str) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            path_id: path_id.to_string(),
            started_at: Utc::now(),
        }
    }

    pub fn completed(self, backup_type: BackupType, total_size: u64) -> BackupJob {
        BackupJob {
            job_id: self.job_id,
            path_id: self.path_id,
            backup_type: Some(backup_type),
            started_at: self.started_at,
            finished_at: Utc::now(),
            files_processed: 1,
            files_failed: 0,
            total_size,
            status: JobStatus::Completed,
            error: None,
        }
    }

    pub fn failed(self, reason: impl Into<String>) -> BackupJob {
        BackupJob {
            job_id: self.job_id,
            path_id: self.path_id,
            backup_type: None,
            started_at: self.started_at,
            finished_at: Utc::now(),
            files_processed: 0,
            files_failed: 1,
            total_size: 0,
            status: JobStatus::Failed,
            error: Some(reason.into()),
        }
    }
}
