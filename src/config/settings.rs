use crate::common::retry::RetryConfig;
use crate::config::env::{self, EnvKey};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} is not a valid URL: {reason}")]
    InvalidUrl { key: &'static str, reason: String },

    #[error("Remote storage is partially configured, missing: {0}")]
    IncompleteStorage(String),

    #[error(
        "STALE_JOB_AFTER_SECS ({stale_secs}s) must exceed the longest a job can run ({max_runtime_secs}s)"
    )]
    StaleWindowTooShort { stale_secs: u64, max_runtime_secs: u64 },
}

const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const SPEECH_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub max_concurrent_jobs: usize,
    pub stale_job_after: Duration,
}

#[derive(Clone, Debug)]
pub struct EncoderSettings {
    pub ffmpeg_path: String,
    pub timeout: Duration,
    pub frame_duration_secs: f64,
}

#[derive(Clone, Debug)]
pub struct SpeechSettings {
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub base_url: String,
    pub max_retries: u32,
    /// Per attempt.
    pub request_timeout: Duration,
}

/// S3/MinIO credentials. Their presence selects remote publishing at startup.
#[derive(Clone, Debug)]
pub struct S3Settings {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
    pub public_url: String,
    /// Upper bound on publishing one job's artifacts.
    pub upload_timeout: Duration,
}

impl S3Settings {
    /// All four credentials or none; anything in between is a startup error.
    pub fn from_parts(
        endpoint: Option<String>,
        bucket: Option<String>,
        access_key: Option<String>,
        secret_key: Option<String>,
        region: String,
        public_url: Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let named = [
            (EnvKey::MinioUrl.as_str(), &endpoint),
            (EnvKey::MinioBucket.as_str(), &bucket),
            (EnvKey::MinioAccessKey.as_str(), &access_key),
            (EnvKey::MinioSecretKey.as_str(), &secret_key),
        ];
        let missing: Vec<&str> = named
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| *k)
            .collect();

        if missing.len() == named.len() {
            return Ok(None);
        }
        if !missing.is_empty() {
            return Err(ConfigError::IncompleteStorage(missing.join(", ")));
        }

        let (Some(endpoint), Some(bucket), Some(access_key), Some(secret_key)) =
            (endpoint, bucket, access_key, secret_key)
        else {
            return Ok(None);
        };

        let endpoint = endpoint.trim_end_matches('/').to_string();
        validate_url(EnvKey::MinioUrl.as_str(), &endpoint)?;

        let public_url = match public_url {
            Some(url) => {
                validate_url(EnvKey::MinioPublicUrl.as_str(), &url)?;
                url.trim_end_matches('/').to_string()
            }
            None => format!("{}/{}", endpoint, bucket),
        };

        Ok(Some(Self {
            endpoint,
            bucket,
            access_key,
            secret_key,
            region,
            public_url,
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }))
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    /// Without a database URL the process keeps jobs in memory.
    pub database_url: Option<String>,
    pub public_base_url: String,
    pub upload_root: PathBuf,
    pub static_root: PathBuf,
    pub worker: WorkerSettings,
    pub encoder: EncoderSettings,
    pub speech: Option<SpeechSettings>,
    pub storage: Option<S3Settings>,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let public_base_url = env::get_or(EnvKey::PublicBaseUrl, "http://localhost:3000")
            .trim_end_matches('/')
            .to_string();
        validate_url(EnvKey::PublicBaseUrl.as_str(), &public_base_url)?;

        let speech = env::get_opt(EnvKey::ElevenLabsApiKey).map(|api_key| SpeechSettings {
            api_key,
            voice_id: env::get_or(EnvKey::ElevenLabsVoiceId, "21m00Tcm4TlvDq8ikWAM"),
            model_id: env::get_or(EnvKey::ElevenLabsModelId, "eleven_multilingual_v2"),
            base_url: env::get_or(EnvKey::ElevenLabsBaseUrl, "https://api.elevenlabs.io"),
            max_retries: env::get_parsed(EnvKey::SynthesisMaxRetries, 2),
            request_timeout: SPEECH_REQUEST_TIMEOUT,
        });

        let mut storage = S3Settings::from_parts(
            env::get_opt(EnvKey::MinioUrl),
            env::get_opt(EnvKey::MinioBucket),
            env::get_opt(EnvKey::MinioAccessKey),
            env::get_opt(EnvKey::MinioSecretKey),
            env::get_or(EnvKey::MinioRegion, "us-east-1"),
            env::get_opt(EnvKey::MinioPublicUrl),
        )?;
        if let Some(s3) = storage.as_mut() {
            s3.upload_timeout = Duration::from_secs(env::get_parsed(
                EnvKey::PublishTimeoutSecs,
                DEFAULT_UPLOAD_TIMEOUT.as_secs(),
            ));
        }

        let config = Self {
            server_port: env::get_parsed(EnvKey::ServerPort, 3000),
            database_url: env::get_opt(EnvKey::DatabaseUrl),
            public_base_url,
            upload_root: PathBuf::from(env::get_or(EnvKey::UploadRoot, "user_uploads")),
            static_root: PathBuf::from(env::get_or(EnvKey::StaticRoot, "static")),
            worker: WorkerSettings {
                poll_interval: Duration::from_secs(env::get_parsed(EnvKey::PollIntervalSecs, 10)),
                error_backoff: Duration::from_secs(env::get_parsed(EnvKey::ErrorBackoffSecs, 30)),
                max_concurrent_jobs: env::get_parsed(EnvKey::MaxConcurrentJobs, 2usize).max(1),
                stale_job_after: Duration::from_secs(env::get_parsed(
                    EnvKey::StaleJobAfterSecs,
                    3600,
                )),
            },
            encoder: EncoderSettings {
                ffmpeg_path: env::get_or(EnvKey::FfmpegPath, "ffmpeg"),
                timeout: Duration::from_secs(env::get_parsed(EnvKey::EncodeTimeoutSecs, 600)),
                frame_duration_secs: env::get_parsed(EnvKey::FrameDurationSecs, 1.0f64).max(0.04),
            },
            speech,
            storage,
        };
        config.validate()?;

        Ok(config)
    }

    /// Worst case from claim to finalize: synthesis with every retry, one encode,
    /// then the publish deadline.
    pub fn max_job_runtime(&self) -> Duration {
        let synthesis = match &self.speech {
            Some(speech) => {
                let attempts = speech.request_timeout.saturating_mul(speech.max_retries.saturating_add(1));
                let waits = RetryConfig::default()
                    .max_delay
                    .saturating_mul(speech.max_retries);
                attempts + waits
            }
            // Silent narration is an ffmpeg run under the same timeout.
            None => self.encoder.timeout,
        };
        let publish = self
            .storage
            .as_ref()
            .map_or(Duration::ZERO, |s3| s3.upload_timeout);

        synthesis + self.encoder.timeout + publish
    }

    /// The stale sweep must never catch a job that is still within its runtime budget.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max_runtime = self.max_job_runtime();
        if self.worker.stale_job_after <= max_runtime {
            return Err(ConfigError::StaleWindowTooShort {
                stale_secs: self.worker.stale_job_after.as_secs(),
                max_runtime_secs: max_runtime.as_secs(),
            });
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn for_tests(root: &str) -> Self {
        let root = PathBuf::from(root);
        Self {
            server_port: 0,
            database_url: None,
            public_base_url: "http://localhost:3000".to_string(),
            upload_root: root.join("user_uploads"),
            static_root: root.join("static"),
            worker: WorkerSettings {
                poll_interval: Duration::from_millis(10),
                error_backoff: Duration::from_millis(10),
                max_concurrent_jobs: 2,
                stale_job_after: Duration::from_secs(3600),
            },
            encoder: EncoderSettings {
                ffmpeg_path: "ffmpeg".to_string(),
                timeout: Duration::from_secs(5),
                frame_duration_secs: 1.0,
            },
            speech: None,
            storage: None,
        }
    }
}

fn validate_url(key: &'static str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value).map(|_| ()).map_err(|e| ConfigError::InvalidUrl {
        key,
        reason: e.to_string(),
    })
}
