use axum::Router;
use axum::routing::get;
use crate::state::AppState;

pub mod dto;
pub mod error;
pub mod handler;
pub mod memory;
pub mod model;
pub mod repository;
pub mod service;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryJobStore;
pub use model::{Job, JobFilter, JobStatus, NewJob, Outcome, PublishedArtifacts};
pub use repository::{JobStore, PgJobStore};

pub fn router() -> axum::Router<AppState> {
    Router::new()
        .route("/", get(handler::list_jobs).post(handler::submit_job))
        .route("/{id}", get(handler::get_job))
}
