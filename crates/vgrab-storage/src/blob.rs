//! S3-compatible blob uploads.

use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart, ObjectCannedAcl};
use aws_sdk_s3::Client;
use aws_types::SdkConfig;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};
use vgrab_models::BlobReference;

use crate::error::{StorageError, StorageResult};

/// Multipart part size for streamed uploads (S3 minimum is 5 MiB).
const PART_SIZE: usize = 8 * 1024 * 1024;

/// Who may read an uploaded object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    /// Bucket policy decides
    #[default]
    Private,
    /// Canned `public-read` ACL
    PublicRead,
}

impl Visibility {
    fn canned_acl(self) -> Option<ObjectCannedAcl> {
        match self {
            Self::Private => None,
            Self::PublicRead => Some(ObjectCannedAcl::PublicRead),
        }
    }
}

/// Configuration for the blob store.
#[derive(Debug, Clone)]
pub struct BlobStoreConfig {
    /// Bucket name
    pub bucket_name: String,
    /// Region
    pub region: String,
    /// Static credentials; the default AWS provider chain is used when absent
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Endpoint of an S3-compatible store (path-style addressing)
    pub endpoint_url: Option<String>,
    /// Base URL objects are served from
    pub public_url: String,
    /// Prepended to every object key
    pub key_prefix: String,
    /// Visibility applied to uploads
    pub visibility: Visibility,
}

impl BlobStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let bucket_name = std::env::var("AWS_BUCKET_NAME")
            .map_err(|_| StorageError::config_error("AWS_BUCKET_NAME not set"))?;
        let region = std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        let endpoint_url = std::env::var("STORAGE_ENDPOINT_URL").ok();

        let public_url = std::env::var("STORAGE_PUBLIC_URL").unwrap_or_else(|_| {
            default_public_url(&bucket_name, &region, endpoint_url.as_deref())
        });

        let visibility = match std::env::var("STORAGE_PUBLIC_READ").as_deref() {
            Ok("1") | Ok("true") | Ok("yes") => Visibility::PublicRead,
            _ => Visibility::Private,
        };

        Ok(Self {
            bucket_name,
            region,
            access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
            endpoint_url,
            public_url,
            key_prefix: std::env::var("STORAGE_KEY_PREFIX").unwrap_or_default(),
            visibility,
        })
    }
}

/// Public base URL when none is configured.
fn default_public_url(bucket: &str, region: &str, endpoint_url: Option<&str>) -> String {
    match endpoint_url {
        Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), bucket),
        None => format!("https://{}.s3.{}.amazonaws.com", bucket, region),
    }
}

/// Object key for one upload.
///
/// Format: `{prefix}{content_key}_{timestamp}.{ext}`
pub fn blob_key(prefix: &str, content_key: &str, timestamp: i64, ext: &str) -> String {
    format!("{}{}_{}.{}", prefix, content_key, timestamp, ext)
}

/// Result of a streamed upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedStream {
    pub reference: BlobReference,
    /// Bytes read from the stream; zero means an empty object was stored
    pub size_bytes: u64,
}

/// Remote object storage seam used by the pipeline.
///
/// Implementations never retry internally; the caller owns the retry policy.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a local file.
    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
        visibility: Visibility,
    ) -> StorageResult<BlobReference>;

    /// Upload everything readable from `reader`.
    async fn upload_stream(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        key: &str,
        content_type: &str,
        visibility: Visibility,
    ) -> StorageResult<UploadedStream>;

    /// Delete an object.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Reference for a key under the public base URL.
    fn reference(&self, key: &str) -> BlobReference;
}

/// [`BlobStore`] for AWS S3 and S3-compatible services.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    public_url: String,
}

impl S3BlobStore {
    /// Create a new client from configuration.
    pub async fn new(config: &BlobStoreConfig) -> StorageResult<Self> {
        let mut builder = match (&config.access_key_id, &config.secret_access_key) {
            (Some(access_key_id), Some(secret_access_key)) => {
                let credentials =
                    Credentials::new(access_key_id, secret_access_key, None, None, "vgrab");
                Builder::new()
                    .behavior_version(BehaviorVersion::latest())
                    .credentials_provider(credentials)
            }
            (None, None) => {
                let sdk_config: SdkConfig = aws_config::defaults(BehaviorVersion::latest())
                    .load()
                    .await;
                Builder::from(&sdk_config)
            }
            _ => {
                return Err(StorageError::config_error(
                    "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set together",
                ))
            }
        };

        builder = builder.region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket_name.clone(),
            public_url: config.public_url.clone(),
        })
    }

    /// Create from environment variables.
    pub async fn from_env() -> StorageResult<Self> {
        let config = BlobStoreConfig::from_env()?;
        Self::new(&config).await
    }

    async fn put_bytes(
        &self,
        data: Vec<u8>,
        key: &str,
        content_type: &str,
        visibility: Visibility,
    ) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(data))
            .content_type(content_type)
            .set_acl(visibility.canned_acl())
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;
        Ok(())
    }

    /// Upload the remaining parts of a multipart upload whose first part
    /// is already buffered.
    async fn upload_parts(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        key: &str,
        upload_id: &str,
        mut buffer: Vec<u8>,
        mut filled: usize,
    ) -> StorageResult<(Vec<CompletedPart>, u64)> {
        let mut parts = Vec::new();
        let mut part_number = 1i32;
        let mut total_size = 0u64;

        while filled > 0 {
            total_size += filled as u64;

            let result = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer[..filled].to_vec()))
                .send()
                .await
                .map_err(|e| {
                    error!(
                        error = %e,
                        key = %key,
                        part_number = part_number,
                        "Failed to upload part"
                    );
                    StorageError::upload_failed(e.to_string())
                })?;

            let etag = result.e_tag().ok_or_else(|| {
                StorageError::upload_failed(format!("No ETag returned for part {}", part_number))
            })?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(etag)
                    .build(),
            );
            part_number += 1;

            if filled < buffer.len() {
                break;
            }
            filled = read_part(reader, &mut buffer).await?;
        }

        Ok((parts, total_size))
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(key = %key, error = %e, "Failed to abort multipart upload");
        }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        content_type: &str,
        visibility: Visibility,
    ) -> StorageResult<BlobReference> {
        debug!("Uploading {} to {}", path.display(), key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .set_acl(visibility.canned_acl())
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        info!("Uploaded {} to {}", path.display(), key);
        Ok(self.reference(key))
    }

    async fn upload_stream(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        key: &str,
        content_type: &str,
        visibility: Visibility,
    ) -> StorageResult<UploadedStream> {
        let start = Instant::now();
        let mut buffer = vec![0u8; PART_SIZE];
        let filled = read_part(reader, &mut buffer).await?;

        // Small objects go up in one request
        if filled < PART_SIZE {
            buffer.truncate(filled);
            self.put_bytes(buffer, key, content_type, visibility).await?;
            info!(key = %key, size_bytes = filled, "Stream upload complete");
            return Ok(UploadedStream {
                reference: self.reference(key),
                size_bytes: filled as u64,
            });
        }

        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_acl(visibility.canned_acl())
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::upload_failed("No upload ID returned"))?
            .to_string();

        let (parts, total_size) = match self
            .upload_parts(reader, key, &upload_id, buffer, filled)
            .await
        {
            Ok(done) => done,
            Err(e) => {
                self.abort_upload(key, &upload_id).await;
                return Err(e);
            }
        };
        let part_count = parts.len();

        let completed = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await;

        if let Err(e) = completed {
            self.abort_upload(key, &upload_id).await;
            return Err(StorageError::upload_failed(e.to_string()));
        }

        info!(
            key = %key,
            size_bytes = total_size,
            parts = part_count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Multipart stream upload complete"
        );
        Ok(UploadedStream {
            reference: self.reference(key),
            size_bytes: total_size,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        info!("Deleted {}", key);
        Ok(())
    }

    fn reference(&self, key: &str) -> BlobReference {
        BlobReference::new(&self.public_url, key)
    }
}

/// Fill `buffer` from `reader`; returns the byte count, short only at EOF.
async fn read_part(
    reader: &mut (dyn AsyncRead + Send + Unpin),
    buffer: &mut [u8],
) -> StorageResult<usize> {
    let mut filled = 0;
    while filled < buffer.len() {
        let n = reader
            .read(&mut buffer[filled..])
            .await
            .map_err(|e| StorageError::upload_failed(format!("Failed to read from stream: {}", e)))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
