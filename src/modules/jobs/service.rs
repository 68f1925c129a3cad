use super::dto::{ListJobsQuery, SubmitJobRequest};
use super::error::StoreResult;
use super::model::Job;
use crate::state::AppState;
use tracing::info;
use uuid::Uuid;

pub struct JobService;

impl JobService {
    pub async fn submit(state: AppState, req: SubmitJobRequest) -> StoreResult<Job> {
        let job = state.store.create(req.into()).await?;
        info!(job_id = %job.id, assets = job.input_assets.len(), "Job submitted");
        Ok(job)
    }

    pub async fn list(state: AppState, query: ListJobsQuery) -> StoreResult<Vec<Job>> {
        state.store.list(query.into()).await
    }

    pub async fn get(state: AppState, id: Uuid) -> StoreResult<Option<Job>> {
        state.store.get(id).await
    }
}
