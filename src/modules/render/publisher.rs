use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::error::PublishError;
use crate::common::retry::{RetryConfig, with_retry};
use crate::infrastructure::storage::s3::StorageService;
use crate::modules::jobs::PublishedArtifacts;

/// Artifacts a finished render left on disk.
#[derive(Debug, Clone)]
pub struct LocalArtifacts {
    pub audio: PathBuf,
    pub video: PathBuf,
}

#[async_trait]
pub trait ArtifactPublisher: Send + Sync {
    /// Publishing the same job twice overwrites the same locations and returns the same URLs.
    async fn publish(
        &self,
        job_id: Uuid,
        artifacts: &LocalArtifacts,
        cancel: &CancellationToken,
    ) -> Result<PublishedArtifacts, PublishError>;

    fn mode(&self) -> &str;
}

/// `.../video.mp4` becomes `.../video.jpg`; a URL without an extension gets one appended.
pub fn thumbnail_url_for(video_url: &str) -> String {
    let name_start = video_url.rfind('/').map(|i| i + 1).unwrap_or(0);
    match video_url[name_start..].rfind('.') {
        Some(dot) => format!("{}.jpg", &video_url[..name_start + dot]),
        None => format!("{video_url}.jpg"),
    }
}

fn content_type(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

pub fn video_key(job_id: Uuid) -> String {
    format!("reels/{job_id}/video.mp4")
}

pub fn audio_key(job_id: Uuid) -> String {
    format!("reels/{job_id}/audio.mp3")
}

pub struct S3Publisher {
    storage: StorageService,
    retry: RetryConfig,
    timeout: Duration,
}

impl S3Publisher {
    /// `timeout` bounds one whole `publish` call, retries included.
    pub fn new(storage: StorageService, timeout: Duration) -> Self {
        Self {
            storage,
            retry: RetryConfig::default(),
            timeout,
        }
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn upload(&self, key: &str, path: &Path, cancel: &CancellationToken) -> Result<String, PublishError> {
        let content_type = content_type(path);
        let storage = &self.storage;
        let content_type = content_type.as_str();

        with_retry(&self.retry, "artifact_upload", move || async move {
            storage
                .put_file(key, path, content_type, cancel)
                .await
                .map_err(|e| PublishError::upload(key, e))
        })
        .await?;

        Ok(self.storage.public_url(key))
    }

    async fn upload_all(
        &self,
        job_id: Uuid,
        artifacts: &LocalArtifacts,
        cancel: &CancellationToken,
    ) -> Result<PublishedArtifacts, PublishError> {
        let video_url = self.upload(&video_key(job_id), &artifacts.video, cancel).await?;
        let audio_url = self.upload(&audio_key(job_id), &artifacts.audio, cancel).await?;

        Ok(PublishedArtifacts {
            thumbnail_url: thumbnail_url_for(&video_url),
            audio_url,
            video_url,
        })
    }
}

#[async_trait]
impl ArtifactPublisher for S3Publisher {
    #[instrument(skip(self, artifacts, cancel))]
    async fn publish(
        &self,
        job_id: Uuid,
        artifacts: &LocalArtifacts,
        cancel: &CancellationToken,
    ) -> Result<PublishedArtifacts, PublishError> {
        // The deadline cancels through the uploads rather than dropping them,
        // so open multipart uploads still get aborted.
        let deadline = cancel.child_token();
        let timer = {
            let deadline = deadline.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                deadline.cancel();
            })
        };

        let result = self.upload_all(job_id, artifacts, &deadline).await;
        timer.abort();

        match result {
            Ok(published) => {
                info!(video_url = %published.video_url, "Artifacts uploaded");
                Ok(published)
            }
            Err(PublishError::Cancelled) if !cancel.is_cancelled() => {
                warn!(timeout = ?self.timeout, "Publishing timed out");
                Err(PublishError::Timeout(self.timeout))
            }
            Err(e) => Err(e),
        }
    }

    fn mode(&self) -> &str {
        "s3"
    }
}

/// Copies artifacts under the static root served next to the API.
pub struct LocalPublisher {
    static_root: PathBuf,
    public_base_url: String,
}

impl LocalPublisher {
    pub fn new(static_root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            static_root: static_root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn place(&self, source: &Path, folder: &str, file_name: &str) -> Result<String, PublishError> {
        let dir = self.static_root.join(folder);
        tokio::fs::create_dir_all(&dir).await?;
        tokio::fs::copy(source, dir.join(file_name)).await?;

        Ok(format!("{}/static/{}/{}", self.public_base_url, folder, file_name))
    }
}

#[async_trait]
impl ArtifactPublisher for LocalPublisher {
    #[instrument(skip(self, artifacts, cancel))]
    async fn publish(
        &self,
        job_id: Uuid,
        artifacts: &LocalArtifacts,
        cancel: &CancellationToken,
    ) -> Result<PublishedArtifacts, PublishError> {
        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        let video_url = self.place(&artifacts.video, "reels", &format!("{job_id}.mp4")).await?;
        let audio_url = self.place(&artifacts.audio, "audio", &format!("{job_id}.mp3")).await?;

        info!(%video_url, "Artifacts copied to static root");
        Ok(PublishedArtifacts {
            thumbnail_url: thumbnail_url_for(&video_url),
            audio_url,
            video_url,
        })
    }

    fn mode(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::settings::S3Settings;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn artifacts(dir: &Path) -> LocalArtifacts {
        let audio = dir.join("audio.mp3");
        let video = dir.join("render.mp4");
        std::fs::write(&audio, b"mp3").unwrap();
        std::fs::write(&video, b"mp4").unwrap();
        LocalArtifacts { audio, video }
    }

    #[test]
    fn test_thumbnail_replaces_the_extension() {
        assert_eq!(
            thumbnail_url_for("https://cdn.example.com/reels/1/video.mp4"),
            "https://cdn.example.com/reels/1/video.jpg"
        );
        assert_eq!(thumbnail_url_for("/static/reels/abc.mp4"), "/static/reels/abc.jpg");
        assert_eq!(thumbnail_url_for("http://host.v1/reels/clip"), "http://host.v1/reels/clip.jpg");
    }

    #[test]
    fn test_keys_are_deterministic_per_job() {
        let id = Uuid::new_v4();
        assert_eq!(video_key(id), format!("reels/{id}/video.mp4"));
        assert_eq!(audio_key(id), format!("reels/{id}/audio.mp3"));
        assert_eq!(video_key(id), video_key(id));
    }

    #[tokio::test]
    async fn test_local_publish_is_idempotent() {
        let work = tempfile::tempdir().unwrap();
        let static_root = tempfile::tempdir().unwrap();
        let local = artifacts(work.path());
        let publisher = LocalPublisher::new(static_root.path(), "http://localhost:3000/");
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();

        let first = publisher.publish(id, &local, &cancel).await.unwrap();
        std::fs::write(&local.video, b"mp4-v2").unwrap();
        let second = publisher.publish(id, &local, &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.video_url, format!("http://localhost:3000/static/reels/{id}.mp4"));
        assert_eq!(first.audio_url, format!("http://localhost:3000/static/audio/{id}.mp3"));
        assert_eq!(first.thumbnail_url, format!("http://localhost:3000/static/reels/{id}.jpg"));

        let reels: Vec<_> = std::fs::read_dir(static_root.path().join("reels")).unwrap().collect();
        assert_eq!(reels.len(), 1);
        let published = std::fs::read(static_root.path().join("reels").join(format!("{id}.mp4"))).unwrap();
        assert_eq!(published, b"mp4-v2");
    }

    #[tokio::test]
    async fn test_local_publish_honours_cancellation() {
        let work = tempfile::tempdir().unwrap();
        let publisher = LocalPublisher::new(work.path().join("static"), "");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = publisher
            .publish(Uuid::new_v4(), &artifacts(work.path()), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, PublishError::Cancelled));
    }

    fn publisher_at(endpoint: &str, timeout: Duration, max_retries: u32) -> S3Publisher {
        let settings = S3Settings {
            endpoint: endpoint.to_string(),
            bucket: "videos".into(),
            access_key: "key".into(),
            secret_key: "secret".into(),
            region: "us-east-1".into(),
            public_url: "https://cdn.example.com/videos".into(),
            upload_timeout: timeout,
        };
        S3Publisher::new(StorageService::new(&settings), settings.upload_timeout).with_retry_config(RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn test_s3_republish_overwrites_the_same_keys() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("PUT"))
            .and(path(format!("/videos/reels/{id}/video.mp4")))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("/videos/reels/{id}/audio.mp3")))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let publisher = publisher_at(&server.uri(), Duration::from_secs(30), 0);

        let work = tempfile::tempdir().unwrap();
        let local = artifacts(work.path());
        let cancel = CancellationToken::new();

        let first = publisher.publish(id, &local, &cancel).await.unwrap();
        let second = publisher.publish(id, &local, &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.video_url, format!("https://cdn.example.com/videos/reels/{id}/video.mp4"));
        assert_eq!(first.thumbnail_url, format!("https://cdn.example.com/videos/reels/{id}/video.jpg"));
    }

    #[tokio::test]
    async fn test_s3_publish_gives_up_at_the_deadline() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let publisher = publisher_at(&server.uri(), Duration::from_millis(200), 2);
        let work = tempfile::tempdir().unwrap();

        let started = std::time::Instant::now();
        let err = publisher
            .publish(Uuid::new_v4(), &artifacts(work.path()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Timeout(t) if t == Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_s3_rejected_upload_is_not_retried() {
        let server = MockServer::start().await;
        let id = Uuid::new_v4();
        Mock::given(method("PUT"))
            .and(path(format!("/videos/reels/{id}/video.mp4")))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<Error><Code>AccessDenied</Code><Message>denied</Message></Error>",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let publisher = publisher_at(&server.uri(), Duration::from_secs(30), 3);
        let work = tempfile::tempdir().unwrap();

        let err = publisher
            .publish(id, &artifacts(work.path()), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, PublishError::Upload { .. }));
    }
}
