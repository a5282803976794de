//! Content key derivation from source URLs.
//!
//! A content key names a cache slot and prefixes every temporary file and
//! blob produced for a source, so it must be stable across requests and safe
//! to use as a filename component.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Maximum key length (a hex SHA-256 digest is exactly this long).
const MAX_KEY_LEN: usize = 64;

/// YouTube path prefixes that are followed by the video ID.
const YOUTUBE_ID_PATH_PREFIXES: [&str; 4] = ["embed", "shorts", "v", "live"];

/// Errors that can occur while interpreting a source URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceUrlError {
    #[error("source URL is empty")]
    Empty,

    #[error("source URL is not a valid URL: {0}")]
    Malformed(String),

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid content key: {0}")]
    InvalidKey(String),
}

/// Stable identifier derived from a source URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentKey(String);

impl ContentKey {
    /// Wrap an already-derived key, validating its character set.
    pub fn new(key: impl Into<String>) -> Result<Self, SourceUrlError> {
        let key = key.into();
        if is_valid_key(&key) {
            Ok(Self(key))
        } else {
            Err(SourceUrlError::InvalidKey(key))
        }
    }

    /// Derive the key for a source URL.
    ///
    /// Uses the `v` query parameter when present, then the ID segment of
    /// short/embed/shorts YouTube URLs, and finally a SHA-256 digest of the
    /// URL so that unrecognised sources still get their own slot.
    pub fn from_source_url(source_url: &str) -> Result<Self, SourceUrlError> {
        let trimmed = source_url.trim();
        if trimmed.is_empty() {
            return Err(SourceUrlError::Empty);
        }

        let url = Url::parse(trimmed).map_err(|e| SourceUrlError::Malformed(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(SourceUrlError::UnsupportedScheme(other.to_string())),
        }

        if let Some(id) = extract_identifier(&url) {
            return Ok(Self(id));
        }

        let digest = Sha256::digest(trimmed.as_bytes());
        Ok(Self(format!("{:x}", digest)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ContentKey {
    type Error = SourceUrlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ContentKey> for String {
    fn from(key: ContentKey) -> Self {
        key.0
    }
}

/// Pull a video identifier out of a parsed URL, if one is recognisable.
fn extract_identifier(url: &Url) -> Option<String> {
    if let Some((_, v)) = url.query_pairs().find(|(name, _)| name == "v") {
        if is_valid_key(&v) {
            return Some(v.into_owned());
        }
    }

    let host = url.host_str()?.to_ascii_lowercase();
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

    if host == "youtu.be" || host.ends_with(".youtu.be") {
        return segments.next().filter(|s| is_valid_key(s)).map(str::to_string);
    }

    if host == "youtube.com" || host.ends_with(".youtube.com") {
        let first = segments.next()?;
        if YOUTUBE_ID_PATH_PREFIXES.contains(&first) {
            return segments.next().filter(|s| is_valid_key(s)).map(str::to_string);
        }
    }

    None
}

/// Check if a string is usable as a key: `[A-Za-z0-9_-]{1,64}`.
fn is_valid_key(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_KEY_LEN
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
