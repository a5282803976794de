//! Cache entries and blob references.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::ContentKey;

/// Identifier of an uploaded object plus its retrievable URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobReference {
    /// Object key in the bucket
    pub key: String,
    /// Public URL (`{endpoint}/{key}`)
    pub url: String,
}

impl BlobReference {
    /// Join an endpoint and object key with exactly one slash.
    pub fn new(endpoint: &str, key: impl Into<String>) -> Self {
        let key = key.into();
        let url = format!(
            "{}/{}",
            endpoint.trim_end_matches('/'),
            key.trim_start_matches('/')
        );
        Self { key, url }
    }
}

/// Persisted record of a completed pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: ContentKey,
    pub media: BlobReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<BlobReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(
        key: ContentKey,
        media: BlobReference,
        cover: Option<BlobReference>,
        title: Option<String>,
    ) -> Self {
        Self {
            key,
            media,
            cover,
            title,
            created_at: Utc::now(),
        }
    }
}
