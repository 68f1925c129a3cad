pub mod jobs;
pub mod render;
