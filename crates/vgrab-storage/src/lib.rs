//! Object storage and result cache.
//!
//! This crate provides:
//! - File and stream upload to S3-compatible object storage
//! - Blob key generation and public references
//! - The local JSON cache of completed pipeline runs

pub mod blob;
pub mod cache;
pub mod error;

pub use blob::{blob_key, BlobStore, BlobStoreConfig, S3BlobStore, UploadedStream, Visibility};
pub use cache::{CacheStore, FsCacheStore};
pub use error::{StorageError, StorageResult};
