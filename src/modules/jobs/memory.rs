use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::error::{StoreError, StoreResult};
use super::model::{Job, JobFilter, JobStatus, NewJob, Outcome};
use super::repository::{DEFAULT_LIST_LIMIT, JobStore};

/// Process-local job store. Every operation runs under one lock, so `claim_next`
/// selects and flips a row without any window for a second claimer.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: NewJob) -> StoreResult<Job> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }

        let now = OffsetDateTime::now_utc();
        let record = Job {
            id: job.id,
            title: job.title,
            description: job.description,
            input_assets: job.input_assets,
            audio_asset: None,
            video_asset: None,
            thumbnail_url: None,
            error_message: None,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        jobs.insert(record.id, record.clone());

        Ok(record)
    }

    async fn claim_next(&self) -> StoreResult<Option<Job>> {
        let mut jobs = self.jobs.lock().await;

        let next = jobs
            .values_mut()
            .filter(|j| j.status == JobStatus::Pending)
            .min_by_key(|j| (j.created_at, j.id));

        Ok(next.map(|job| {
            job.status = JobStatus::Processing;
            job.updated_at = OffsetDateTime::now_utc();
            job.clone()
        }))
    }

    async fn finalize(&self, id: Uuid, outcome: Outcome) -> StoreResult<Job> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;

        let target = outcome.status();
        if !job.status.can_transition_to(target) {
            return Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: target,
            });
        }

        match outcome {
            Outcome::Completed(artifacts) => {
                job.audio_asset = Some(artifacts.audio_url);
                job.video_asset = Some(artifacts.video_url);
                job.thumbnail_url = Some(artifacts.thumbnail_url);
                job.error_message = None;
            }
            Outcome::Failed {
                error,
                audio_asset,
                video_asset,
            } => {
                job.error_message = Some(error);
                if audio_asset.is_some() {
                    job.audio_asset = audio_asset;
                }
                if video_asset.is_some() {
                    job.video_asset = video_asset;
                }
            }
        }
        job.status = target;
        job.updated_at = OffsetDateTime::now_utc();

        Ok(job.clone())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<Job>> {
        Ok(self.jobs.lock().await.get(&id).cloned())
    }

    async fn list(&self, filter: JobFilter) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.lock().await;

        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| filter.status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).max(0) as usize);

        Ok(matching)
    }

    async fn fail_stale(&self, older_than: Duration, reason: &str) -> StoreResult<Vec<Job>> {
        let mut jobs = self.jobs.lock().await;
        let now = OffsetDateTime::now_utc();
        let mut failed = Vec::new();

        for job in jobs.values_mut() {
            if job.status == JobStatus::Processing && now - job.updated_at > older_than {
                job.status = JobStatus::Failed;
                job.error_message = Some(reason.to_string());
                job.updated_at = now;
                failed.push(job.clone());
            }
        }

        Ok(failed)
    }

    async fn touch(&self, id: Uuid) -> StoreResult<bool> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.updated_at = OffsetDateTime::now_utc();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
