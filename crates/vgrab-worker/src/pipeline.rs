//! Pipeline orchestrator.
//!
//! `CheckCache -> Fetching -> Combining -> (Trimming) -> (Screenshotting)
//! -> Uploading -> Caching -> Done`, with `Failed` reachable from any
//! non-terminal stage. A cache hit goes straight to `Done`. On a miss the
//! whole path from `Fetching` is retried as one unit; every attempt works
//! in its own run directory which is removed when the attempt ends.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use vgrab_media::{
    ensure_output, prepare_cookie_jar, validate_cookie_jar, FfmpegCombiner, MediaCombiner,
    MediaFetcher, StreamPaths, YtDlpFetcher,
};
use vgrab_models::{
    BlobReference, CacheEntry, ContentKey, PipelineRequest, PipelineResponse, TrimWindow,
};
use vgrab_storage::{
    blob_key, BlobStore, BlobStoreConfig, CacheStore, FsCacheStore, S3BlobStore,
};

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::key_lock::KeyLocks;
use crate::logging::PipelineLogger;
use crate::metrics;
use crate::retry::{retry_async, RetryConfig, RetryResult};
use crate::temp_assets::TempAssets;

const VIDEO_CONTENT_TYPE: &str = "video/mp4";
const IMAGE_CONTENT_TYPE: &str = "image/jpeg";

/// Pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    CheckCache,
    Fetching,
    Combining,
    Trimming,
    Screenshotting,
    Uploading,
    Caching,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckCache => "check_cache",
            Self::Fetching => "fetching",
            Self::Combining => "combining",
            Self::Trimming => "trimming",
            Self::Screenshotting => "screenshotting",
            Self::Uploading => "uploading",
            Self::Caching => "caching",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one request's run, fixed across retries.
///
/// The timestamp names the blobs, so every attempt uploads to the same keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId {
    pub timestamp_ms: i64,
    pub suffix: String,
}

impl RunId {
    pub fn generate() -> Self {
        let mut suffix = Uuid::new_v4().simple().to_string();
        suffix.truncate(8);
        Self {
            timestamp_ms: Utc::now().timestamp_millis(),
            suffix,
        }
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.timestamp_ms, self.suffix)
    }
}

/// Everything an attempt needs to know about its request.
struct RunContext {
    source_url: String,
    key: ContentKey,
    window: Option<TrimWindow>,
    run_id: RunId,
    run_dir: PathBuf,
    logger: PipelineLogger,
}

/// Temporary file names inside a run directory.
struct RunFiles {
    video: PathBuf,
    audio: PathBuf,
    merged: PathBuf,
    trimmed: PathBuf,
    cover: PathBuf,
    thumbnail: PathBuf,
}

impl RunFiles {
    fn register(assets: &mut TempAssets, key: &ContentKey) -> Self {
        Self {
            video: assets.register(format!("{}_video.mp4", key)),
            audio: assets.register(format!("{}_audio.m4a", key)),
            merged: assets.register(format!("{}_merged.mp4", key)),
            trimmed: assets.register(format!("{}_trimmed.mp4", key)),
            cover: assets.register(format!("{}_cover.jpg", key)),
            thumbnail: assets.register(format!("{}_thumbnail.jpg", key)),
        }
    }
}

/// Private copies of the cookie jar, one per concurrent yt-dlp process.
///
/// yt-dlp rewrites its jar on exit, so processes must never share one.
struct RunCookies {
    video: PathBuf,
    audio: PathBuf,
    title: PathBuf,
    thumbnail: PathBuf,
}

impl RunCookies {
    async fn prepare(source: &Path, assets: &mut TempAssets) -> PipelineResult<Self> {
        Ok(Self {
            video: prepare_jar(source, assets, "video").await?,
            audio: prepare_jar(source, assets, "audio").await?,
            title: prepare_jar(source, assets, "title").await?,
            thumbnail: prepare_jar(source, assets, "thumbnail").await?,
        })
    }
}

async fn prepare_jar(
    source: &Path,
    assets: &mut TempAssets,
    purpose: &str,
) -> PipelineResult<PathBuf> {
    let jar = prepare_cookie_jar(source, assets.root(), purpose).await?;
    Ok(assets.register(jar))
}

/// Download-transcode-cache pipeline.
pub struct Pipeline {
    config: PipelineConfig,
    fetcher: Arc<dyn MediaFetcher>,
    combiner: Arc<dyn MediaCombiner>,
    blobs: Arc<dyn BlobStore>,
    cache: Arc<dyn CacheStore>,
    locks: KeyLocks,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        fetcher: Arc<dyn MediaFetcher>,
        combiner: Arc<dyn MediaCombiner>,
        blobs: Arc<dyn BlobStore>,
        cache: Arc<dyn CacheStore>,
    ) -> Self {
        Self {
            config,
            fetcher,
            combiner,
            blobs,
            cache,
            locks: KeyLocks::new(),
        }
    }

    /// Wire the yt-dlp, FFmpeg, S3 and filesystem implementations.
    pub async fn from_config(
        config: PipelineConfig,
        storage: &BlobStoreConfig,
    ) -> PipelineResult<Self> {
        let config = config.with_storage_policy(storage);
        let fetcher = Arc::new(YtDlpFetcher::new(&config.tools));
        let combiner = Arc::new(FfmpegCombiner::new(&config.tools));
        let blobs = Arc::new(S3BlobStore::new(storage).await?);
        let cache = Arc::new(FsCacheStore::new(&config.cache_dir));

        Ok(Self::new(config, fetcher, combiner, blobs, cache))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn CacheStore> {
        &self.cache
    }

    /// Run one request to completion.
    pub async fn process(&self, request: &PipelineRequest) -> PipelineResult<PipelineResponse> {
        let started = Instant::now();
        let result = self.run(request).await;
        self.record_outcome(&result, started);
        result
    }

    /// Run one request, aborting when `cancel_rx` turns `true`.
    ///
    /// Cancellation drops the in-flight attempt: its subprocesses are killed
    /// and its temporary files removed.
    pub async fn process_with_cancel(
        &self,
        request: &PipelineRequest,
        cancel_rx: watch::Receiver<bool>,
    ) -> PipelineResult<PipelineResponse> {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancelled(cancel_rx) => {
                info!(url = %request.source_url, "Run cancelled");
                Err(PipelineError::Cancelled)
            }
            result = self.run(request) => result,
        };
        self.record_outcome(&result, started);
        result
    }

    fn record_outcome(&self, result: &PipelineResult<PipelineResponse>, started: Instant) {
        match result {
            Ok(_) => metrics::record_completed(started.elapsed().as_secs_f64()),
            Err(e) => metrics::record_failed(e.kind()),
        }
    }

    async fn run(&self, request: &PipelineRequest) -> PipelineResult<PipelineResponse> {
        let key = ContentKey::from_source_url(&request.source_url)?;
        let window = request.trim_window()?;
        if window.is_some() && !self.config.capabilities.with_trim {
            return Err(PipelineError::precondition("trimming is disabled"));
        }

        debug!(key = %key, stage = PipelineStage::CheckCache.as_str(), "Checking cache");
        if let Some(entry) = self.cache.lookup(&key).await? {
            metrics::record_cache_hit();
            info!(key = %key, "Cache hit");
            return Ok(cached_response(&entry, window.as_ref()));
        }
        metrics::record_cache_miss();

        validate_cookie_jar(&self.config.cookies_path).await?;

        let _guard = self.locks.acquire(&key).await;
        // A concurrent run for the same key may have finished while we waited
        if let Some(entry) = self.cache.lookup(&key).await? {
            info!(key = %key, "Cache filled by concurrent run");
            return Ok(cached_response(&entry, window.as_ref()));
        }

        let run_id = RunId::generate();
        let run_dir = self
            .config
            .work_dir
            .join(format!("{}_{}", key, run_id));
        let logger = PipelineLogger::new(&key, &run_id.to_string());
        let span = logger.create_span();
        let ctx = RunContext {
            source_url: request.source_url.clone(),
            key,
            window,
            run_id,
            run_dir,
            logger,
        };

        let entry = self.run_with_retries(&ctx).instrument(span).await?;
        Ok(PipelineResponse::from(&entry))
    }

    async fn run_with_retries(&self, ctx: &RunContext) -> PipelineResult<CacheEntry> {
        ctx.logger.log_start(&ctx.source_url);

        let retry = RetryConfig::new("pipeline")
            .with_max_attempts(self.config.max_attempts)
            .with_base_delay(self.config.retry_base_delay)
            .with_max_delay(self.config.retry_max_delay);

        let result = retry_async(
            &retry,
            move |attempt| self.run_attempt(ctx, attempt),
            PipelineError::is_retryable,
        )
        .await;

        match result {
            RetryResult::Success(entry) => {
                ctx.logger.log_stage(PipelineStage::Done, 0);
                ctx.logger.log_completion(&entry.media.url);
                Ok(entry)
            }
            RetryResult::Failed { error, attempts } => {
                ctx.logger.log_stage(PipelineStage::Failed, attempts);
                ctx.logger.log_error(&format!(
                    "{} after {} attempt(s): {}",
                    error.kind(),
                    attempts,
                    error
                ));
                Err(error)
            }
        }
    }

    /// One attempt of the miss path; temporary files never outlive it.
    async fn run_attempt(&self, ctx: &RunContext, attempt: u32) -> PipelineResult<CacheEntry> {
        metrics::record_attempt(attempt);

        let mut assets = TempAssets::create(&ctx.run_dir).await.map_err(|e| {
            PipelineError::precondition(format!(
                "cannot create run directory {}: {}",
                ctx.run_dir.display(),
                e
            ))
        })?;

        let result = self.miss_path(ctx, &mut assets, attempt).await;
        assets.cleanup().await;
        result
    }

    async fn miss_path(
        &self,
        ctx: &RunContext,
        assets: &mut TempAssets,
        attempt: u32,
    ) -> PipelineResult<CacheEntry> {
        let caps = self.config.capabilities;
        let cookies = RunCookies::prepare(&self.config.cookies_path, assets).await?;
        let files = RunFiles::register(assets, &ctx.key);

        if caps.streams_directly(ctx.window.is_some()) {
            return self.stream_path(ctx, &files, &cookies, attempt).await;
        }

        // Fetching
        ctx.logger.log_stage(PipelineStage::Fetching, attempt);
        let stage_start = Instant::now();
        let media = async {
            if caps.merge_streams {
                let dest = StreamPaths {
                    video: files.video.clone(),
                    audio: files.audio.clone(),
                };
                let jars = StreamPaths {
                    video: cookies.video.clone(),
                    audio: cookies.audio.clone(),
                };
                self.fetcher
                    .fetch_streams(&ctx.source_url, &dest, &jars)
                    .await?;
                ensure_output(&files.video).await?;
                ensure_output(&files.audio).await?;
            } else {
                self.fetcher
                    .fetch_combined(&ctx.source_url, &files.merged, &cookies.video)
                    .await?;
                ensure_output(&files.merged).await?;
            }
            Ok::<_, PipelineError>(())
        };
        let want_thumbnail = caps.with_thumbnail && !caps.with_screenshot;
        let (media, title, thumbnail) = tokio::join!(
            media,
            self.fetch_title(ctx, &cookies.title),
            self.fetch_thumbnail(ctx, want_thumbnail, &files.thumbnail, &cookies.thumbnail),
        );
        media?;
        let title = title?;
        metrics::record_stage_duration(
            PipelineStage::Fetching.as_str(),
            stage_start.elapsed().as_secs_f64(),
        );

        // The window is checked against the source before any transcoding
        let source = if caps.merge_streams {
            &files.video
        } else {
            &files.merged
        };
        let mut duration = None;
        if let Some(window) = &ctx.window {
            let probed = self.combiner.probe_duration(source).await?;
            window.validate_against(probed)?;
            duration = Some(probed);
        }

        if caps.merge_streams {
            ctx.logger.log_stage(PipelineStage::Combining, attempt);
            let stage_start = Instant::now();
            self.combiner
                .merge(&files.video, &files.audio, &files.merged)
                .await?;
            ensure_output(&files.merged).await?;
            metrics::record_stage_duration(
                PipelineStage::Combining.as_str(),
                stage_start.elapsed().as_secs_f64(),
            );
        }

        let media = match &ctx.window {
            Some(window) => {
                ctx.logger.log_stage(PipelineStage::Trimming, attempt);
                self.combiner
                    .trim(&files.merged, &files.trimmed, window)
                    .await?;
                ensure_output(&files.trimmed).await?;
                &files.trimmed
            }
            None => &files.merged,
        };

        let cover = if caps.with_screenshot {
            ctx.logger.log_stage(PipelineStage::Screenshotting, attempt);
            // Window midpoint is absolute, so capture from the untrimmed file
            let at = match &ctx.window {
                Some(window) => window.midpoint(),
                None => match duration {
                    Some(d) => d / 2.0,
                    None => self.combiner.probe_duration(&files.merged).await? / 2.0,
                },
            };
            self.combiner
                .screenshot(&files.merged, &files.cover, at)
                .await?;
            ensure_output(&files.cover).await?;
            Some(files.cover.as_path())
        } else {
            thumbnail.as_deref()
        };

        ctx.logger.log_stage(PipelineStage::Uploading, attempt);
        let stage_start = Instant::now();
        let media_ref = self.upload(ctx, media, "mp4", VIDEO_CONTENT_TYPE).await?;
        let cover_ref = match cover {
            Some(path) => Some(self.upload(ctx, path, "jpg", IMAGE_CONTENT_TYPE).await?),
            None => None,
        };
        metrics::record_stage_duration(
            PipelineStage::Uploading.as_str(),
            stage_start.elapsed().as_secs_f64(),
        );

        self.write_cache(ctx, media_ref, cover_ref, title, attempt)
            .await
    }

    /// Pipe the downloader's stdout straight into storage.
    async fn stream_path(
        &self,
        ctx: &RunContext,
        files: &RunFiles,
        cookies: &RunCookies,
        attempt: u32,
    ) -> PipelineResult<CacheEntry> {
        let caps = self.config.capabilities;
        ctx.logger.log_stage(PipelineStage::Fetching, attempt);
        ctx.logger.log_stage(PipelineStage::Uploading, attempt);
        let stage_start = Instant::now();

        let (media_ref, title, thumbnail) = tokio::join!(
            self.upload_from_stream(ctx, &cookies.video),
            self.fetch_title(ctx, &cookies.title),
            self.fetch_thumbnail(ctx, caps.with_thumbnail, &files.thumbnail, &cookies.thumbnail),
        );
        let media_ref = media_ref?;
        let title = title?;

        let cover_ref = match thumbnail {
            Some(path) => Some(self.upload(ctx, &path, "jpg", IMAGE_CONTENT_TYPE).await?),
            None => None,
        };
        metrics::record_stage_duration(
            PipelineStage::Uploading.as_str(),
            stage_start.elapsed().as_secs_f64(),
        );

        self.write_cache(ctx, media_ref, cover_ref, title, attempt)
            .await
    }

    /// Upload the downloader's stdout; the stored object is deleted unless
    /// the downloader exits cleanly after writing at least one byte.
    async fn upload_from_stream(
        &self,
        ctx: &RunContext,
        cookies: &Path,
    ) -> PipelineResult<BlobReference> {
        let key = self.blob_key(ctx, "mp4");
        let mut stream = self.fetcher.open_stream(&ctx.source_url, cookies).await?;

        // The process timeout covers the whole transfer, not only the exit
        let deadline = stream.deadline();
        let bounded = deadline
            .bound(self.blobs.upload_stream(
                stream.reader(),
                &key,
                VIDEO_CONTENT_TYPE,
                self.config.visibility,
            ))
            .await;
        let uploaded = match bounded {
            Ok(uploaded) => uploaded,
            Err(timeout) => {
                // Dropping the stream kills the downloader
                drop(stream);
                self.delete_partial(ctx, &key).await;
                return Err(PipelineError::from(timeout));
            }
        };
        let finished = stream.finish().await;

        match (uploaded, finished) {
            (Ok(uploaded), Ok(())) if uploaded.size_bytes == 0 => {
                self.delete_partial(ctx, &key).await;
                Err(PipelineError::OutputMissing(format!(
                    "downloader produced no bytes for {}",
                    ctx.source_url
                )))
            }
            (Ok(uploaded), Ok(())) => Ok(uploaded.reference),
            (Ok(_), Err(e)) => {
                // The stored object is truncated
                self.delete_partial(ctx, &key).await;
                Err(PipelineError::from(e))
            }
            (Err(e), _) => Err(PipelineError::from(e)),
        }
    }

    async fn delete_partial(&self, ctx: &RunContext, key: &str) {
        if let Err(e) = self.blobs.delete(key).await {
            ctx.logger
                .log_warning(&format!("Failed to delete partial blob {}: {}", key, e));
        }
    }

    async fn write_cache(
        &self,
        ctx: &RunContext,
        media: BlobReference,
        cover: Option<BlobReference>,
        title: Option<String>,
        attempt: u32,
    ) -> PipelineResult<CacheEntry> {
        ctx.logger.log_stage(PipelineStage::Caching, attempt);
        let entry = CacheEntry::new(ctx.key.clone(), media, cover, title);
        self.cache.store(&entry).await?;
        Ok(entry)
    }

    /// Title lookup; optional unless `title_fetch_required`.
    async fn fetch_title(&self, ctx: &RunContext, cookies: &Path) -> PipelineResult<Option<String>> {
        let caps = self.config.capabilities;
        if !caps.with_title {
            return Ok(None);
        }

        match self.fetcher.fetch_title(&ctx.source_url, cookies).await {
            Ok(title) => Ok(Some(title)),
            Err(e) if caps.title_fetch_required => Err(e.into()),
            Err(e) => {
                ctx.logger
                    .log_warning(&format!("Title unavailable, continuing without: {}", e));
                Ok(None)
            }
        }
    }

    /// Source thumbnail as a fallback cover; failures only cost the cover.
    async fn fetch_thumbnail(
        &self,
        ctx: &RunContext,
        wanted: bool,
        output: &Path,
        cookies: &Path,
    ) -> Option<PathBuf> {
        if !wanted {
            return None;
        }

        let fetched = match self
            .fetcher
            .fetch_thumbnail(&ctx.source_url, output, cookies)
            .await
        {
            Ok(()) => ensure_output(output).await.map(|_| ()),
            Err(e) => Err(e),
        };

        match fetched {
            Ok(()) => Some(output.to_path_buf()),
            Err(e) => {
                ctx.logger
                    .log_warning(&format!("Thumbnail unavailable, continuing without: {}", e));
                None
            }
        }
    }

    fn blob_key(&self, ctx: &RunContext, ext: &str) -> String {
        blob_key(
            &self.config.key_prefix,
            ctx.key.as_str(),
            ctx.run_id.timestamp_ms,
            ext,
        )
    }

    async fn upload(
        &self,
        ctx: &RunContext,
        path: &Path,
        ext: &str,
        content_type: &str,
    ) -> PipelineResult<BlobReference> {
        let key = self.blob_key(ctx, ext);
        let reference = self
            .blobs
            .upload_file(path, &key, content_type, self.config.visibility)
            .await?;
        Ok(reference)
    }
}

/// Response for a cached entry. Cached media is always the full source, so
/// a trim window on a hit is not applied.
fn cached_response(entry: &CacheEntry, window: Option<&TrimWindow>) -> PipelineResponse {
    if let Some(window) = window {
        warn!(
            key = %entry.key,
            start = window.start(),
            end = window.end(),
            "Returning cached full-length media; trim window not applied"
        );
    }
    PipelineResponse::from(entry)
}

/// Resolve once the flag turns `true`; never if the sender is gone first.
async fn cancelled(mut cancel_rx: watch::Receiver<bool>) {
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(PipelineStage::CheckCache.to_string(), "check_cache");
        assert_eq!(PipelineStage::Screenshotting.as_str(), "screenshotting");
        assert!(PipelineStage::Done.is_terminal());
        assert!(PipelineStage::Failed.is_terminal());
        assert!(!PipelineStage::Uploading.is_terminal());
    }

    #[test]
    fn test_run_id_format() {
        let id = RunId::generate();
        assert_eq!(id.suffix.len(), 8);
        assert!(id.to_string().starts_with(&id.timestamp_ms.to_string()));
    }
}
