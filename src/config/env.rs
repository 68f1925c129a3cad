use std::env;
use std::str::FromStr;

pub enum EnvKey {
    ServerPort,
    DatabaseUrl,
    PublicBaseUrl,
    UploadRoot,
    StaticRoot,
    PollIntervalSecs,
    ErrorBackoffSecs,
    MaxConcurrentJobs,
    StaleJobAfterSecs,
    FfmpegPath,
    EncodeTimeoutSecs,
    PublishTimeoutSecs,
    FrameDurationSecs,
    ElevenLabsApiKey,
    ElevenLabsVoiceId,
    ElevenLabsModelId,
    ElevenLabsBaseUrl,
    SynthesisMaxRetries,
    MinioUrl,
    MinioBucket,
    MinioAccessKey,
    MinioSecretKey,
    MinioRegion,
    MinioPublicUrl,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::DatabaseUrl => "DATABASE_URL",
            EnvKey::PublicBaseUrl => "PUBLIC_BASE_URL",
            EnvKey::UploadRoot => "UPLOAD_ROOT",
            EnvKey::StaticRoot => "STATIC_ROOT",
            EnvKey::PollIntervalSecs => "POLL_INTERVAL_SECS",
            EnvKey::ErrorBackoffSecs => "ERROR_BACKOFF_SECS",
            EnvKey::MaxConcurrentJobs => "MAX_CONCURRENT_JOBS",
            EnvKey::StaleJobAfterSecs => "STALE_JOB_AFTER_SECS",
            EnvKey::FfmpegPath => "FFMPEG_PATH",
            EnvKey::EncodeTimeoutSecs => "ENCODE_TIMEOUT_SECS",
            EnvKey::PublishTimeoutSecs => "PUBLISH_TIMEOUT_SECS",
            EnvKey::FrameDurationSecs => "FRAME_DURATION_SECS",
            EnvKey::ElevenLabsApiKey => "ELEVENLABS_API_KEY",
            EnvKey::ElevenLabsVoiceId => "ELEVENLABS_VOICE_ID",
            EnvKey::ElevenLabsModelId => "ELEVENLABS_MODEL_ID",
            EnvKey::ElevenLabsBaseUrl => "ELEVENLABS_BASE_URL",
            EnvKey::SynthesisMaxRetries => "SYNTHESIS_MAX_RETRIES",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET_VIDEOS",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::MinioRegion => "MINIO_REGION",
            EnvKey::MinioPublicUrl => "MINIO_PUBLIC_URL",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

/// Set and non-blank, otherwise `None`.
pub fn get_opt(key: EnvKey) -> Option<String> {
    env::var(key.as_str()).ok().filter(|v| !v.trim().is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    env::var(key.as_str()).unwrap_or_else(|_| default.to_string())
}

pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> T {
    match get(key) {
        Ok(val) => val.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}
