use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::error::{EncodeError, SynthesisError};
use super::ffmpeg::{FfmpegCommand, FfmpegRunner};
use crate::common::retry::{with_retry, RetryConfig};
use crate::config::settings::SpeechSettings;

pub const AUDIO_FILE: &str = "audio.mp3";

const MAX_ERROR_BODY: usize = 500;

/// Turns narration text into an audio file at `output`.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SynthesisError>;

    fn name(&self) -> &str;
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

/// ElevenLabs text-to-speech client.
pub struct ElevenLabsSynthesizer {
    client: reqwest::Client,
    settings: SpeechSettings,
    retry: RetryConfig,
}

impl ElevenLabsSynthesizer {
    pub fn new(settings: SpeechSettings) -> Result<Self, SynthesisError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| SynthesisError::Transport(format!("Failed to create HTTP client: {e}")))?;
        let retry = RetryConfig::default().with_max_retries(settings.max_retries);

        Ok(Self {
            client,
            settings,
            retry,
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1/text-to-speech/{}",
            self.settings.base_url.trim_end_matches('/'),
            self.settings.voice_id
        )
    }

    async fn request(&self, text: &str) -> Result<Bytes, SynthesisError> {
        let body = SpeechRequest {
            text,
            model_id: &self.settings.model_id,
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
            },
        };

        let response = self
            .client
            .post(self.endpoint())
            .header("xi-api-key", &self.settings.api_key)
            .header("accept", "audio/mpeg")
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let mut message = response.text().await.unwrap_or_default();
            if message.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !message.is_char_boundary(cut) {
                    cut -= 1;
                }
                message.truncate(cut);
            }
            return Err(SynthesisError::Upstream {
                status: status.as_u16(),
                message,
            });
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SynthesisError::Transport(e.to_string()))?;
        if audio.is_empty() {
            return Err(SynthesisError::EmptyAudio);
        }

        Ok(audio)
    }
}

#[async_trait]
impl SpeechSynthesizer for ElevenLabsSynthesizer {
    #[instrument(skip(self, text, cancel), fields(chars = text.len()))]
    async fn synthesize(
        &self,
        text: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SynthesisError> {
        let audio = tokio::select! {
            res = with_retry(&self.retry, "speech_synthesis", move || self.request(text)) => res?,
            _ = cancel.cancelled() => return Err(SynthesisError::Cancelled),
        };

        tokio::fs::write(output, &audio).await?;
        info!(bytes = audio.len(), output = %output.display(), "Narration synthesized");
        Ok(())
    }

    fn name(&self) -> &str {
        "elevenlabs"
    }
}

/// Silent narration rendered locally, sized to roughly how long the text takes to read.
pub struct SilentSynthesizer {
    runner: FfmpegRunner,
}

impl SilentSynthesizer {
    const WORDS_PER_SECOND: f64 = 2.5;

    pub fn new(runner: FfmpegRunner) -> Self {
        Self { runner }
    }

    pub fn narration_secs(text: &str) -> f64 {
        let words = text.split_whitespace().count() as f64;
        (words / Self::WORDS_PER_SECOND).max(1.0)
    }

    pub fn command(text: &str, output: &Path) -> FfmpegCommand {
        let input_args = vec![
            "-f".to_string(),
            "lavfi".to_string(),
            "-t".to_string(),
            format!("{:.2}", Self::narration_secs(text)),
        ];

        FfmpegCommand::new(output)
            .input_with(input_args, "anullsrc=r=44100:cl=mono")
            .audio_codec("libmp3lame")
            .output_arg("-q:a")
            .output_arg("9")
    }
}

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn synthesize(
        &self,
        text: &str,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), SynthesisError> {
        self.runner
            .run(&Self::command(text, output), cancel)
            .await
            .map_err(|e| match e {
                EncodeError::Cancelled => SynthesisError::Cancelled,
                other => SynthesisError::Render(other.to_string()),
            })
    }

    fn name(&self) -> &str {
        "silent"
    }
}
