use aws_sdk_s3::config::Builder;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::{Client, config::BehaviorVersion, config::Credentials, config::Region};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::common::upload::{MIN_PART_SIZE, stream_file_to_s3};
use crate::config::settings::S3Settings;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("S3 request failed{}: {message}", status_suffix(.status))]
    Request {
        status: Option<u16>,
        transient: bool,
        message: String,
    },

    #[error("S3 response missing {0}")]
    MissingField(&'static str),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Failed to read artifact: {0}")]
    Io(#[from] std::io::Error),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" with HTTP {s}")).unwrap_or_default()
}

impl StorageError {
    /// Connection failures, timeouts, throttling and 5xx are worth another attempt;
    /// any other HTTP answer (403, 404, ...) will not change on retry.
    fn from_sdk<E>(err: SdkError<E, HttpResponse>) -> Self
    where
        E: std::error::Error + 'static,
    {
        let status = err.raw_response().map(|r| r.status().as_u16());
        let transient = match &err {
            SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => true,
            SdkError::ResponseError(_) | SdkError::ServiceError(_) => {
                status.is_some_and(|s| s == 408 || s == 429 || s >= 500)
            }
            _ => false,
        };

        StorageError::Request {
            status,
            transient,
            message: DisplayErrorContext(&err).to_string(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Request { transient: true, .. })
    }
}

#[derive(Clone)]
pub struct StorageService {
    pub client: Client,
    pub bucket: String,
    public_url: String,
}

impl StorageService {
    pub fn new(settings: &S3Settings) -> Self {
        let credentials = Credentials::new(
            &settings.access_key,
            &settings.secret_key,
            None,
            None,
            "static",
        );

        let config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()))
            .endpoint_url(&settings.endpoint)
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(Duration::from_secs(5))
                    .operation_attempt_timeout(Duration::from_secs(120))
                    .build(),
            )
            .build();

        let client = Client::from_conf(config);

        info!(endpoint = %settings.endpoint, bucket = %settings.bucket, "✅ S3 storage configured");

        Self {
            client,
            bucket: settings.bucket.clone(),
            public_url: settings.public_url.clone(),
        }
    }

    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_url, key)
    }

    /// Upload a local file under `key`, replacing any existing object.
    ///
    /// Cancelling stops the transfer; a multipart upload in flight is aborted first.
    pub async fn put_file(
        &self,
        key: &str,
        path: &Path,
        content_type: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        if cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        let size = tokio::fs::metadata(path).await?.len();

        if size as usize > MIN_PART_SIZE {
            debug!(key, size, "Uploading with multipart");
            stream_file_to_s3(self, path, key.to_string(), content_type, cancel).await?;
            return Ok(());
        }

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| std::io::Error::other(e.to_string()))?;

        let request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send();

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(StorageError::Cancelled),
            sent = request => {
                sent.map_err(StorageError::from_sdk)?;
            }
        }

        debug!(key, size, "Uploaded object");
        Ok(())
    }

    pub async fn create_multipart_upload(&self, key: &str, content_type: &str) -> Result<String, StorageError> {
        let result = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(StorageError::from_sdk)?;

        result.upload_id.ok_or(StorageError::MissingField("upload_id"))
    }

    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: bytes::Bytes,
    ) -> Result<aws_sdk_s3::types::CompletedPart, StorageError> {
        let result = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(StorageError::from_sdk)?;

        let e_tag = result.e_tag.ok_or(StorageError::MissingField("e_tag"))?;

        Ok(aws_sdk_s3::types::CompletedPart::builder()
            .e_tag(e_tag)
            .part_number(part_number)
            .build())
    }

    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<aws_sdk_s3::types::CompletedPart>,
    ) -> Result<(), StorageError> {
        let completed_multipart_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_multipart_upload)
            .send()
            .await
            .map_err(StorageError::from_sdk)?;

        Ok(())
    }

    pub async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(StorageError::from_sdk)?;

        Ok(())
    }
}
