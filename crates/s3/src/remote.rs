//! S3 implementation of the remote store traits.
//!
//! Uploads below one part size go through `PutObject`; larger files use a
//! multipart upload with one part per [`ChunkReader`] chunk, so the
//! resulting ETag is the multipart fingerprint at the configured part
//! size. A failed multipart upload is aborted. Downloads stream into a
//! partial file that is renamed into place once complete.

use std::fmt::Debug;
use std::path::Path;

use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use stowage_sync::{
    BoxFuture, HeadResult, RemoteMetadataGateway, RemoteObjectMetadata, SyncError,
    TransferExecutor, UploadMetadata, partial_path,
};
use stowage_transfer::{
    Chunk, ChunkReader, DEFAULT_PART_SIZE, HashAlgorithm, ProgressCallback, ProgressTracker,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::S3Config;

/// Remote store backed by an S3 bucket.
#[derive(Clone)]
pub struct S3Remote {
    client: Client,
    bucket: String,
    part_size: u64,
    algorithm: HashAlgorithm,
}

impl Debug for S3Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Remote")
            .field("bucket", &self.bucket)
            .field("part_size", &self.part_size)
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl S3Remote {
    /// Builds a client from the ambient AWS configuration plus `config`.
    pub async fn connect(config: &S3Config) -> Result<Self, SyncError> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;
        Self::new(&sdk_config, config)
    }

    /// Builds a client from an already loaded SDK configuration.
    pub fn new(sdk_config: &aws_config::SdkConfig, config: &S3Config) -> Result<Self, SyncError> {
        if config.bucket.is_empty() {
            return Err(SyncError::Config("s3 bucket must not be empty".into()));
        }
        if sdk_config.region().is_none() {
            return Err(SyncError::Config(
                "no AWS region configured (set s3.region or AWS_REGION)".into(),
            ));
        }

        // Inherit HTTP client, credentials and retry settings, then apply overrides.
        let mut builder = aws_sdk_s3::config::Builder::from(sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self::from_client(
            Client::from_conf(builder.build()),
            config.bucket.clone(),
        ))
    }

    /// Wraps a pre-built client.
    pub fn from_client(client: Client, bucket: String) -> Self {
        Self {
            client,
            bucket,
            part_size: DEFAULT_PART_SIZE,
            algorithm: HashAlgorithm::Md5,
        }
    }

    /// Part size for multipart uploads.
    pub fn with_part_size(mut self, part_size: u64) -> Self {
        self.part_size = part_size;
        self
    }

    /// Algorithm whose stored-hash attribute is read back on `head`.
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Lists every key under `prefix`, following continuation tokens.
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, SyncError> {
        let mut keys = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix);
            if let Some(token) = continuation_token.take() {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| map_sdk_error(e, prefix))?;

            keys.extend(
                response
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .filter(|key| !key.ends_with('/'))
                    .map(str::to_string),
            );

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        debug!(bucket = %self.bucket, prefix, keys = keys.len(), "listed keys");
        Ok(keys)
    }

    async fn put_single(
        &self,
        local_path: &Path,
        key: &str,
        metadata: &UploadMetadata,
        tracker: &ProgressTracker,
    ) -> Result<u64, SyncError> {
        let data = tokio::fs::read(local_path).await?;
        let size = data.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .metadata(metadata.attribute_name(), &metadata.stored_hash)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        tracker.advance(size);
        Ok(size)
    }

    async fn put_multipart(
        &self,
        local_path: &Path,
        key: &str,
        metadata: &UploadMetadata,
        tracker: &ProgressTracker,
    ) -> Result<u64, SyncError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .metadata(metadata.attribute_name(), &metadata.stored_hash)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| SyncError::Transport(format!("no upload id returned for {key}")))?
            .to_string();

        match self.upload_parts(local_path, key, &upload_id, tracker).await {
            Ok(sent) => Ok(sent),
            Err(e) => {
                warn!(key, upload_id = %upload_id, error = %e, "aborting multipart upload");
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(key, error = ?abort_err, "failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        local_path: &Path,
        key: &str,
        upload_id: &str,
        tracker: &ProgressTracker,
    ) -> Result<u64, SyncError> {
        let mut reader = ChunkReader::new(local_path, self.part_size)?;
        let mut parts = Vec::new();
        let mut sent = 0u64;

        loop {
            let (returned, next) = next_chunk(reader).await?;
            reader = returned;
            let Some(chunk) = next else { break };

            let part_number = i32::try_from(parts.len() + 1)
                .map_err(|_| SyncError::Transport(format!("too many parts for {key}")))?;
            let size = chunk.size() as u64;
            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.data))
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(response.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            sent += size;
            tracker.advance(size);
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;
        Ok(sent)
    }

    async fn fetch_into(
        &self,
        key: &str,
        partial: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<u64, SyncError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, key))?;

        let total = response
            .content_length()
            .and_then(|len| u64::try_from(len).ok())
            .unwrap_or(0);
        let tracker = ProgressTracker::new(key, total, progress, None);

        let mut body = response.body;
        let mut file = tokio::fs::File::create(partial).await?;
        let mut received = 0u64;
        while let Some(bytes) = body.next().await {
            let bytes = bytes.map_err(|e| {
                SyncError::Transport(format!("reading body of {key}: {e}"))
            })?;
            file.write_all(&bytes).await?;
            received += bytes.len() as u64;
            tracker.advance(bytes.len() as u64);
        }
        file.flush().await?;
        file.sync_all().await?;
        tracker.finish();
        Ok(received)
    }
}

/// Reads the next chunk on the blocking pool.
async fn next_chunk(
    mut reader: ChunkReader,
) -> Result<(ChunkReader, Option<Chunk>), SyncError> {
    let (reader, next) = tokio::task::spawn_blocking(move || {
        let next = reader.next();
        (reader, next)
    })
    .await?;
    Ok((reader, next.transpose()?))
}

impl RemoteMetadataGateway for S3Remote {
    fn head<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<HeadResult, SyncError>> {
        Box::pin(async move {
            let response = match self
                .client
                .head_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
            {
                Ok(response) => response,
                Err(SdkError::ServiceError(service_err))
                    if service_err.raw().status().as_u16() == 404 =>
                {
                    return Ok(HeadResult::NotFound);
                }
                Err(e) => return Err(map_sdk_error(e, key)),
            };

            let stored_hash = response
                .metadata()
                .and_then(|m| m.get(self.algorithm.name()))
                .map(String::as_str);
            Ok(HeadResult::Found(object_metadata(
                key,
                response.content_length(),
                response.e_tag(),
                stored_hash,
            )))
        })
    }
}

impl TransferExecutor for S3Remote {
    fn upload<'a>(
        &'a self,
        local_path: &'a Path,
        key: &'a str,
        metadata: &'a UploadMetadata,
        progress: Option<ProgressCallback>,
    ) -> BoxFuture<'a, Result<u64, SyncError>> {
        Box::pin(async move {
            let size = tokio::fs::metadata(local_path).await?.len();
            let tracker = ProgressTracker::new(key, size, progress, None);

            let sent = if size <= self.part_size {
                self.put_single(local_path, key, metadata, &tracker).await?
            } else {
                self.put_multipart(local_path, key, metadata, &tracker)
                    .await?
            };
            tracker.finish();
            debug!(bucket = %self.bucket, key, bytes = sent, "uploaded");
            Ok(sent)
        })
    }

    fn download<'a>(
        &'a self,
        key: &'a str,
        local_path: &'a Path,
        progress: Option<ProgressCallback>,
    ) -> BoxFuture<'a, Result<u64, SyncError>> {
        Box::pin(async move {
            let partial = partial_path(local_path);
            match self.fetch_into(key, &partial, progress).await {
                Ok(received) => {
                    tokio::fs::rename(&partial, local_path).await?;
                    debug!(bucket = %self.bucket, key, bytes = received, "downloaded");
                    Ok(received)
                }
                Err(e) => {
                    let _ = tokio::fs::remove_file(&partial).await;
                    Err(e)
                }
            }
        })
    }
}

/// Builds remote metadata from `HeadObject` fields.
fn object_metadata(
    key: &str,
    content_length: Option<i64>,
    e_tag: Option<&str>,
    stored_hash: Option<&str>,
) -> RemoteObjectMetadata {
    RemoteObjectMetadata {
        key: key.to_string(),
        size: content_length
            .and_then(|len| u64::try_from(len).ok())
            .unwrap_or(0),
        stored_hash: stored_hash.map(str::to_string),
        composite_fingerprint: e_tag.map(|tag| tag.trim_matches('"').to_string()),
    }
}

/// Maps an SDK error to a sync error by HTTP status.
fn map_sdk_error<E: Debug>(err: SdkError<E>, key: &str) -> SyncError {
    match &err {
        SdkError::ServiceError(service_err) => {
            classify_status(service_err.raw().status().as_u16(), key, &format!("{err:?}"))
        }
        SdkError::TimeoutError(_) => SyncError::Transport(format!("S3 timeout for {key}")),
        SdkError::DispatchFailure(_) => {
            SyncError::Transport(format!("S3 connection error for {key}: {err:?}"))
        }
        _ => SyncError::Transport(format!("S3 error for {key}: {err:?}")),
    }
}

fn classify_status(status: u16, key: &str, detail: &str) -> SyncError {
    match status {
        401 | 403 => SyncError::Auth(format!("access denied for {key} (HTTP {status})")),
        _ => SyncError::Transport(format!("S3 error for {key} (HTTP {status}): {detail}")),
    }
}
