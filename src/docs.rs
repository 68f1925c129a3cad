use utoipa::OpenApi;
use crate::modules::jobs::dto::SubmitJobRequest;
use crate::modules::jobs::model::{Job, JobStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::jobs::handler::submit_job,
        crate::modules::jobs::handler::list_jobs,
        crate::modules::jobs::handler::get_job,
    ),
    components(
        schemas(SubmitJobRequest, Job, JobStatus)
    ),
    tags(
        (name = "Jobs", description = "Render job submission and status")
    )
)]
pub struct ApiDoc;
