pub mod assembler;
pub mod error;
pub mod ffmpeg;
pub mod pipeline;
pub mod publisher;
pub mod synthesizer;

pub use assembler::{AssemblyRequest, FfmpegAssembler, VideoAssembler};
pub use error::{EncodeError, PipelineError, PublishError, SynthesisError};
pub use ffmpeg::FfmpegRunner;
pub use pipeline::{PipelineFailure, RenderPipeline};
pub use publisher::{ArtifactPublisher, LocalArtifacts, LocalPublisher, S3Publisher};
pub use synthesizer::{ElevenLabsSynthesizer, SilentSynthesizer, SpeechSynthesizer};
