use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::assembler::{AssemblyRequest, VideoAssembler};
use super::error::PipelineError;
use super::publisher::{ArtifactPublisher, LocalArtifacts};
use super::synthesizer::{AUDIO_FILE, SpeechSynthesizer};
use crate::modules::jobs::{Job, Outcome, PublishedArtifacts};

/// A failed run plus whatever it managed to produce locally before failing.
#[derive(Debug)]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub audio: Option<PathBuf>,
    pub video: Option<PathBuf>,
}

impl PipelineFailure {
    fn new(error: PipelineError) -> Self {
        Self {
            error,
            audio: None,
            video: None,
        }
    }

    pub fn into_outcome(self) -> Outcome {
        Outcome::Failed {
            error: self.error.to_string(),
            audio_asset: self.audio.map(|p| p.display().to_string()),
            video_asset: self.video.map(|p| p.display().to_string()),
        }
    }
}

/// Validate, synthesize, assemble, publish. One instance is shared by every job task.
pub struct RenderPipeline {
    upload_root: PathBuf,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    assembler: Arc<dyn VideoAssembler>,
    publisher: Arc<dyn ArtifactPublisher>,
}

impl RenderPipeline {
    pub fn new(
        upload_root: impl Into<PathBuf>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        assembler: Arc<dyn VideoAssembler>,
        publisher: Arc<dyn ArtifactPublisher>,
    ) -> Self {
        Self {
            upload_root: upload_root.into(),
            synthesizer,
            assembler,
            publisher,
        }
    }

    pub fn job_dir(&self, job: &Job) -> PathBuf {
        self.upload_root.join(job.id.to_string())
    }

    #[instrument(skip(self, job, cancel), fields(job_id = %job.id))]
    pub async fn run(&self, job: &Job, cancel: &CancellationToken) -> Result<PublishedArtifacts, PipelineFailure> {
        let job_dir = self.job_dir(job);
        validate_inputs(job, &job_dir).await.map_err(PipelineFailure::new)?;
        debug!(images = job.input_assets.len(), "Inputs validated");

        let audio = job_dir.join(AUDIO_FILE);
        self.synthesizer
            .synthesize(&job.description, &audio, cancel)
            .await
            .map_err(|e| PipelineFailure::new(cancelled_or(cancel, e.into())))?;
        info!(synthesizer = self.synthesizer.name(), "Narration ready");

        let request = AssemblyRequest {
            job_dir: job_dir.clone(),
            images: job.input_assets.clone(),
            audio: audio.clone(),
            output: job_dir.join(format!("{}.mp4", job.id)),
        };
        let video = match self.assembler.assemble(&request, cancel).await {
            Ok(video) => video,
            Err(e) => {
                return Err(PipelineFailure {
                    error: cancelled_or(cancel, e.into()),
                    audio: Some(audio),
                    video: None,
                });
            }
        };

        let artifacts = LocalArtifacts {
            audio: audio.clone(),
            video: video.clone(),
        };
        self.publisher
            .publish(job.id, &artifacts, cancel)
            .await
            .map_err(|e| PipelineFailure {
                error: cancelled_or(cancel, e.into()),
                audio: Some(audio),
                video: Some(video),
            })
            .inspect(|published| {
                info!(mode = self.publisher.mode(), video_url = %published.video_url, "Job rendered")
            })
    }
}

fn cancelled_or(cancel: &CancellationToken, error: PipelineError) -> PipelineError {
    if cancel.is_cancelled() {
        PipelineError::Cancelled
    } else {
        error
    }
}

/// A bare file name: no separators, no `.`/`..`, nothing that can leave the job directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

async fn validate_inputs(job: &Job, job_dir: &Path) -> Result<(), PipelineError> {
    if job.description.trim().is_empty() {
        return Err(PipelineError::missing_input("description is empty"));
    }
    if job.input_assets.is_empty() {
        return Err(PipelineError::missing_input("no input images"));
    }

    match tokio::fs::metadata(job_dir).await {
        Ok(meta) if meta.is_dir() => {}
        _ => {
            return Err(PipelineError::missing_input(format!(
                "upload directory {} not found",
                job_dir.display()
            )));
        }
    }

    for name in &job.input_assets {
        if !is_plain_file_name(name) {
            return Err(PipelineError::missing_input(format!("invalid image name {name:?}")));
        }
        let is_file = tokio::fs::metadata(job_dir.join(name))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(PipelineError::missing_input(format!("image {name} not found")));
        }
    }

    Ok(())
}
