use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use super::model::{JobFilter, JobStatus, NewJob};

const DEFAULT_TITLE: &str = "My Reel";

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SubmitJobRequest {
    /// Caller-chosen job ID; also names the upload directory.
    pub id: Uuid,
    #[validate(length(max = 200, message = "Title must be at most 200 characters"))]
    pub title: Option<String>,
    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: String,
    /// Image file names inside the upload directory, in frame order.
    #[validate(length(max = 100, message = "At most 100 images per job"))]
    pub input_assets: Vec<String>,
}

impl From<SubmitJobRequest> for NewJob {
    fn from(req: SubmitJobRequest) -> Self {
        Self {
            id: req.id,
            title: req
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_TITLE.to_string()),
            description: req.description,
            input_assets: req.input_assets,
        }
    }
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    /// pending | processing | completed | failed
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}

impl From<ListJobsQuery> for JobFilter {
    fn from(q: ListJobsQuery) -> Self {
        Self {
            status: q.status,
            limit: q.limit.map(|l| l.clamp(1, 500)),
        }
    }
}
