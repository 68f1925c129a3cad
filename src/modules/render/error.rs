use std::time::Duration;
use thiserror::Error;

use crate::common::retry::Retryable;
use crate::infrastructure::storage::s3::StorageError;

/// Longest stderr tail kept on an encoder failure.
pub const STDERR_EXCERPT_BYTES: usize = 2048;

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Speech service request failed: {0}")]
    Transport(String),

    #[error("Speech service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Speech service returned no audio")]
    EmptyAudio,

    #[error("Local audio render failed: {0}")]
    Render(String),

    #[error("Speech synthesis cancelled")]
    Cancelled,

    #[error("Failed to write audio: {0}")]
    Io(#[from] std::io::Error),
}

impl Retryable for SynthesisError {
    fn is_retryable(&self) -> bool {
        match self {
            SynthesisError::Transport(_) => true,
            SynthesisError::Upstream { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("Encoder binary not found: {0}")]
    EncoderNotFound(String),

    #[error("Encoder exited with status {exit_code:?}: {stderr}")]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Encoder timed out after {0} seconds")]
    Timeout(u64),

    #[error("Encoding cancelled")]
    Cancelled,

    #[error("Encoder IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EncodeError {
    pub fn failed(exit_code: Option<i32>, stderr: &[u8]) -> Self {
        EncodeError::Failed {
            exit_code,
            stderr: stderr_excerpt(stderr, STDERR_EXCERPT_BYTES),
        }
    }
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: StorageError,
    },

    #[error("Publishing did not finish within {0:?}")]
    Timeout(Duration),

    #[error("Publishing cancelled")]
    Cancelled,

    #[error("Publish IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PublishError {
    pub fn upload(key: impl Into<String>, source: StorageError) -> Self {
        match source {
            StorageError::Cancelled => PublishError::Cancelled,
            source => PublishError::Upload {
                key: key.into(),
                source,
            },
        }
    }
}

impl Retryable for PublishError {
    fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Upload { source, .. } if source.is_transient())
    }
}

/// A failure of one job's pipeline; becomes the job's `error_message`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Audio synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    #[error("Video assembly failed: {0}")]
    Encode(#[from] EncodeError),

    #[error("Publishing failed: {0}")]
    Publish(#[from] PublishError),

    #[error("Job cancelled before completion")]
    Cancelled,

    #[error("Scratch directory error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn missing_input(message: impl Into<String>) -> Self {
        PipelineError::MissingInput(message.into())
    }

    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::MissingInput(_) => "validate",
            PipelineError::Synthesis(_) => "synthesize",
            PipelineError::Encode(_) => "assemble",
            PipelineError::Publish(_) => "publish",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Io(_) => "scratch",
        }
    }
}

/// Last `max_bytes` of `raw`, lossily decoded and cut on a char boundary.
pub fn stderr_excerpt(raw: &[u8], max_bytes: usize) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_end();
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
