use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Forward-only: pending -> processing -> completed | failed.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, ToSchema)]
pub struct Job {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    /// Image file names inside the job's upload directory, in frame order.
    pub input_assets: Vec<String>,
    pub audio_asset: Option<String>,
    pub video_asset: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
    pub status: JobStatus,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: OffsetDateTime,
}

/// Row shape of the `jobs` table. Status is stored as text.
#[derive(Debug, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub input_assets: Vec<String>,
    pub audio_url: Option<String>,
    pub video_url: Option<String>,
    pub thumbnail_url: Option<String>,
    pub error_message: Option<String>,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<JobStatus>().map_err(StoreError::Corrupt)?;

        Ok(Job {
            id: row.id,
            title: row.title,
            description: row.description,
            input_assets: row.input_assets,
            audio_asset: row.audio_url,
            video_asset: row.video_url,
            thumbnail_url: row.thumbnail_url,
            error_message: row.error_message,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Submission payload accepted by `JobStore::create`.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub input_assets: Vec<String>,
}

/// Published artifact locations written on completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedArtifacts {
    pub audio_url: String,
    pub video_url: String,
    pub thumbnail_url: String,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Completed(PublishedArtifacts),
    Failed {
        error: String,
        audio_asset: Option<String>,
        video_asset: Option<String>,
    },
}

impl Outcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Outcome::Failed {
            error: error.into(),
            audio_asset: None,
            video_asset: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        match self {
            Outcome::Completed(_) => JobStatus::Completed,
            Outcome::Failed { .. } => JobStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}
