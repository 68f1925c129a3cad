use crate::infrastructure::storage::s3::{StorageError, StorageService};
use bytes::Bytes;
use futures_util::StreamExt;
use std::path::Path;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

// Minimum part size for S3 is 5MB. We use 6MB to be safe.
pub const MIN_PART_SIZE: usize = 6 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 256 * 1024;

/// One open multipart upload. Every path that gives up on it must call `abort`,
/// or the bucket keeps the uploaded parts around.
pub struct MultipartUploader<'a> {
    storage: &'a StorageService,
    key: String,
    upload_id: String,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    part_number: i32,
    buffer: Vec<u8>,
}

impl<'a> MultipartUploader<'a> {
    pub async fn new(storage: &'a StorageService, key: String, content_type: &str) -> Result<Self, StorageError> {
        let upload_id = storage.create_multipart_upload(&key, content_type).await?;

        Ok(Self {
            storage,
            key,
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            buffer: Vec::with_capacity(MIN_PART_SIZE),
        })
    }

    pub async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(&chunk);

        if self.buffer.len() >= MIN_PART_SIZE {
            self.flush_part().await?;
        }

        Ok(())
    }

    async fn flush_part(&mut self) -> Result<(), StorageError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let body = Bytes::from(std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(MIN_PART_SIZE),
        ));

        let part = self
            .storage
            .upload_part(&self.key, &self.upload_id, self.part_number, body)
            .await?;

        self.parts.push(part);
        self.part_number += 1;

        Ok(())
    }

    /// Upload the tail and complete. On failure the upload is aborted before returning.
    pub async fn finish(&mut self) -> Result<(), StorageError> {
        let result = self.complete().await;
        if let Err(e) = &result {
            error!(key = %self.key, "Completing multipart upload failed: {e}");
            self.abort().await;
        }
        result
    }

    async fn complete(&mut self) -> Result<(), StorageError> {
        self.flush_part().await?;

        let parts = std::mem::take(&mut self.parts);
        self.storage
            .complete_multipart_upload(&self.key, &self.upload_id, parts)
            .await
    }

    pub async fn abort(&self) {
        if let Err(e) = self
            .storage
            .abort_multipart_upload(&self.key, &self.upload_id)
            .await
        {
            warn!(key = %self.key, upload_id = %self.upload_id, "Failed to abort multipart upload: {e}");
        }
    }
}

async fn write_all(uploader: &mut MultipartUploader<'_>, stream: &mut ReaderStream<File>) -> Result<(), StorageError> {
    while let Some(chunk) = stream.next().await {
        uploader.write_chunk(chunk?).await?;
    }
    Ok(())
}

/// Stream a local file into `key` part by part. Any error or cancellation aborts the upload.
pub async fn stream_file_to_s3(
    storage: &StorageService,
    path: &Path,
    key: String,
    content_type: &str,
    cancel: &CancellationToken,
) -> Result<(), StorageError> {
    let file = File::open(path).await?;
    let mut stream = ReaderStream::with_capacity(file, READ_CHUNK_SIZE);

    let mut uploader = MultipartUploader::new(storage, key, content_type).await?;

    let streamed = tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        res = write_all(&mut uploader, &mut stream) => res,
    };
    if let Err(e) = streamed {
        error!("Upload of {} failed: {}", path.display(), e);
        uploader.abort().await;
        return Err(e);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            uploader.abort().await;
            Err(StorageError::Cancelled)
        }
        res = uploader.finish() => res,
    }
}
