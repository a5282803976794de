//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use vgrab_media::MediaToolsConfig;
use vgrab_models::Capabilities;
use vgrab_storage::{BlobStoreConfig, Visibility};

/// Pipeline configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent of the per-run temporary directories
    pub work_dir: PathBuf,
    /// Directory holding one JSON cache document per content key
    pub cache_dir: PathBuf,
    /// Downloader cookie jar
    pub cookies_path: PathBuf,
    /// Attempts of the miss path, including the first
    pub max_attempts: u32,
    /// Delay before the first retry (doubles per retry)
    pub retry_base_delay: Duration,
    /// Upper bound on the retry delay
    pub retry_max_delay: Duration,
    /// Optional steps
    pub capabilities: Capabilities,
    /// External tool locations
    pub tools: MediaToolsConfig,
    /// Prepended to every blob key
    pub key_prefix: String,
    /// Visibility applied to uploads
    pub visibility: Visibility,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let tmp = std::env::temp_dir();
        Self {
            work_dir: tmp.join("vgrab"),
            cache_dir: tmp.join("vgrab-cache"),
            cookies_path: PathBuf::from("/cookies.txt"),
            max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
            capabilities: Capabilities::default(),
            tools: MediaToolsConfig::default(),
            key_prefix: String::new(),
            visibility: Visibility::Private,
        }
    }
}

impl PipelineConfig {
    /// Config with explicit directories and cookie jar, defaults elsewhere.
    pub fn new(
        work_dir: impl Into<PathBuf>,
        cache_dir: impl Into<PathBuf>,
        cookies_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            work_dir: work_dir.into(),
            cache_dir: cache_dir.into(),
            cookies_path: cookies_path.into(),
            ..Default::default()
        }
    }

    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let caps = defaults.capabilities;

        Self {
            work_dir: env_path("VGRAB_WORK_DIR").unwrap_or(defaults.work_dir),
            cache_dir: env_path("VGRAB_CACHE_DIR").unwrap_or(defaults.cache_dir),
            cookies_path: env_path("VGRAB_COOKIES_PATH").unwrap_or(defaults.cookies_path),
            max_attempts: env_parse("VGRAB_MAX_ATTEMPTS")
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.max_attempts),
            retry_base_delay: env_parse("VGRAB_RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: env_parse("VGRAB_RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_max_delay),
            capabilities: Capabilities {
                merge_streams: env_flag("VGRAB_MERGE_STREAMS").unwrap_or(caps.merge_streams),
                with_title: env_flag("VGRAB_WITH_TITLE").unwrap_or(caps.with_title),
                title_fetch_required: env_flag("VGRAB_TITLE_REQUIRED")
                    .unwrap_or(caps.title_fetch_required),
                with_thumbnail: env_flag("VGRAB_WITH_THUMBNAIL").unwrap_or(caps.with_thumbnail),
                with_trim: env_flag("VGRAB_WITH_TRIM").unwrap_or(caps.with_trim),
                with_screenshot: env_flag("VGRAB_WITH_SCREENSHOT")
                    .unwrap_or(caps.with_screenshot),
                streaming_upload: env_flag("VGRAB_STREAMING_UPLOAD")
                    .unwrap_or(caps.streaming_upload),
            },
            tools: MediaToolsConfig::from_env(),
            key_prefix: defaults.key_prefix,
            visibility: defaults.visibility,
        }
    }

    /// Take key prefix and visibility from the blob store settings.
    pub fn with_storage_policy(mut self, storage: &BlobStoreConfig) -> Self {
        self.key_prefix = storage.key_prefix.clone();
        self.visibility = storage.visibility;
        self
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

fn env_flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().and_then(|s| parse_flag(&s))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.cookies_path, PathBuf::from("/cookies.txt"));
        assert!(config.capabilities.merge_streams);
        assert!(!config.capabilities.title_fetch_required);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" 0 "), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn test_storage_policy() {
        let storage = BlobStoreConfig {
            bucket_name: "media".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: None,
            secret_access_key: None,
            endpoint_url: None,
            public_url: "https://blobs.example".to_string(),
            key_prefix: "videos/".to_string(),
            visibility: Visibility::PublicRead,
        };
        let config = PipelineConfig::new("/w", "/c", "/k").with_storage_policy(&storage);
        assert_eq!(config.key_prefix, "videos/");
        assert_eq!(config.visibility, Visibility::PublicRead);
    }
}
