//! S3-compatible object store client.

use std::io::SeekFrom;
use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use futures::stream::{self, StreamExt, TryStreamExt};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Files above this size are uploaded in parts of this size.
pub const MULTIPART_PART_SIZE: u64 = 8 * 1024 * 1024;

/// Parts of one multipart upload in flight at once.
pub const MULTIPART_CONCURRENCY: usize = 4;

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct S3Config {
    /// Custom S3 API endpoint (MinIO, R2, ...); AWS when unset
    pub endpoint_url: Option<String>,
    /// Access key ID
    pub access_key_id: String,
    /// Secret access key
    pub secret_access_key: String,
    /// Bucket name
    pub bucket_name: String,
    /// Region
    pub region: String,
    /// Multipart part size in bytes
    pub part_size: u64,
}

impl S3Config {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("S3_ENDPOINT_URL").ok().filter(|s| !s.is_empty()),
            access_key_id: std::env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("S3_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("S3_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("S3_BUCKET")
                .map_err(|_| StorageError::config_error("S3_BUCKET not set"))?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            part_size: MULTIPART_PART_SIZE,
        })
    }
}

/// S3-compatible storage client.
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
    part_size: u64,
}

impl S3ObjectStore {
    /// Create a new client from configuration.
    pub fn new(config: S3Config) -> StorageResult<Self> {
        if config.part_size < 5 * 1024 * 1024 {
            return Err(StorageError::config_error(
                "multipart part size must be at least 5 MiB",
            ));
        }

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "reelhls",
        );

        let mut builder = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region))
            .credentials_provider(credentials);

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket_name,
            part_size: config.part_size,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Self::new(S3Config::from_env()?)
    }

    /// Bucket this client writes to.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(format!("S3 connectivity check failed: {}", DisplayErrorContext(&e))))?;
        Ok(())
    }

    async fn put_single(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(key, e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(key, DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    async fn put_multipart(&self, path: &Path, key: &str, content_type: &str, size: u64) -> StorageResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(key, DisplayErrorContext(&e).to_string()))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::upload_failed(key, "no upload id returned"))?
            .to_string();

        match self.upload_parts(path, key, &upload_id, size).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                    .send()
                    .await
                    .map_err(|e| StorageError::upload_failed(key, DisplayErrorContext(&e).to_string()))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(
                        key,
                        "Failed to abort multipart upload {}: {}",
                        upload_id,
                        DisplayErrorContext(&abort_err)
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(&self, path: &Path, key: &str, upload_id: &str, size: u64) -> StorageResult<Vec<CompletedPart>> {
        let part_size = self.part_size;
        let part_count = size.div_ceil(part_size);

        let mut parts: Vec<CompletedPart> = stream::iter(0..part_count)
            .map(|index| async move {
                let offset = index * part_size;
                let len = part_size.min(size - offset);
                let body = read_part(path, offset, len).await?;
                // Part numbers start at 1.
                let part_number = (index + 1) as i32;

                let uploaded = self
                    .client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(key)
                    .upload_id(upload_id)
                    .part_number(part_number)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|e| {
                        StorageError::upload_failed(
                            key,
                            format!("part {}: {}", part_number, DisplayErrorContext(&e)),
                        )
                    })?;

                let e_tag = uploaded
                    .e_tag()
                    .ok_or_else(|| StorageError::upload_failed(key, format!("part {} has no ETag", part_number)))?;

                Ok::<_, StorageError>(
                    CompletedPart::builder()
                        .e_tag(e_tag)
                        .part_number(part_number)
                        .build(),
                )
            })
            .buffer_unordered(MULTIPART_CONCURRENCY)
            .try_collect()
            .await?;

        parts.sort_by_key(|p| p.part_number());
        debug!(key, parts = parts.len(), "Uploaded all parts");
        Ok(parts)
    }
}

async fn read_part(path: &Path, offset: u64, len: u64) -> StorageResult<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(buf)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_file(&self, path: &Path, key: &str, content_type: &str) -> StorageResult<()> {
        let size = tokio::fs::metadata(path).await?.len();
        debug!("Uploading {} ({} bytes) to {}", path.display(), size, key);

        if size > self.part_size {
            self.put_multipart(path, key, content_type, size).await?;
        } else {
            self.put_single(path, key, content_type).await?;
        }

        info!("Uploaded {} to {}", path.display(), key);
        Ok(())
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        debug!("Deleting {}", key);

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }
}
