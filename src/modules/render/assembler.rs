use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::error::EncodeError;
use super::ffmpeg::{FfmpegCommand, FfmpegRunner};

pub const MANIFEST_FILE: &str = "input.txt";
pub const FRAME_WIDTH: u32 = 1080;
pub const FRAME_HEIGHT: u32 = 1920;
pub const FRAME_RATE: u32 = 30;

#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    /// Job scratch directory; image names are resolved against it.
    pub job_dir: PathBuf,
    /// Image file names in frame order.
    pub images: Vec<String>,
    pub audio: PathBuf,
    pub output: PathBuf,
}

#[async_trait]
pub trait VideoAssembler: Send + Sync {
    /// Produce the video at `request.output` and return its path.
    async fn assemble(
        &self,
        request: &AssemblyRequest,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, EncodeError>;
}

/// Scale to fit the portrait frame keeping aspect ratio, then pad with black to fill it.
pub fn frame_filter() -> String {
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black",
        w = FRAME_WIDTH,
        h = FRAME_HEIGHT
    )
}

/// Concat-demuxer frame list: one `file` / `duration` pair per image, in order.
pub fn render_manifest(images: &[String], frame_duration_secs: f64) -> String {
    let duration = format_duration(frame_duration_secs);
    let mut manifest = String::new();
    for image in images {
        let _ = writeln!(manifest, "file '{}'", image.replace('\'', r"'\''"));
        let _ = writeln!(manifest, "duration {}", duration);
    }
    manifest
}

fn format_duration(secs: f64) -> String {
    if secs.fract() == 0.0 {
        format!("{}", secs as u64)
    } else {
        format!("{:.3}", secs)
    }
}

pub struct FfmpegAssembler {
    runner: FfmpegRunner,
    frame_duration_secs: f64,
}

impl FfmpegAssembler {
    pub fn new(runner: FfmpegRunner, frame_duration_secs: f64) -> Self {
        Self {
            runner,
            frame_duration_secs,
        }
    }

    pub async fn write_manifest(&self, job_dir: &Path, images: &[String]) -> Result<PathBuf, EncodeError> {
        let path = job_dir.join(MANIFEST_FILE);
        tokio::fs::write(&path, render_manifest(images, self.frame_duration_secs)).await?;
        Ok(path)
    }

    /// The image list loops forever and `-shortest` clips it to the narration,
    /// so the video always ends with the audio.
    pub fn command(manifest: &Path, audio: &Path, output: &Path) -> FfmpegCommand {
        FfmpegCommand::new(output)
            .input_with(["-f", "concat", "-safe", "0", "-stream_loop", "-1"], manifest)
            .input(audio)
            .video_filter(frame_filter())
            .video_codec("libx264")
            .output_arg("-tune")
            .output_arg("stillimage")
            .audio_codec("aac")
            .output_arg("-b:a")
            .output_arg("192k")
            .output_arg("-shortest")
            .output_arg("-r")
            .output_arg(FRAME_RATE.to_string())
            .output_arg("-pix_fmt")
            .output_arg("yuv420p")
    }
}

#[async_trait]
impl VideoAssembler for FfmpegAssembler {
    #[instrument(skip(self, request, cancel), fields(images = request.images.len()))]
    async fn assemble(
        &self,
        request: &AssemblyRequest,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, EncodeError> {
        let manifest = self.write_manifest(&request.job_dir, &request.images).await?;
        let cmd = Self::command(&manifest, &request.audio, &request.output);

        self.runner.run(&cmd, cancel).await?;

        info!(output = %request.output.display(), "Video assembled");
        Ok(request.output.clone())
    }
}
