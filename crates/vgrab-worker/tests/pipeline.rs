//! Pipeline behaviour against in-process fakes of the tools and storage.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio::sync::watch;

use vgrab_media::{
    CommandSpec, MediaCombiner, MediaError, MediaFetcher, MediaResult, MediaStream,
    ProcessRunner, StreamPaths,
};
use vgrab_models::{BlobReference, Capabilities, ContentKey, PipelineRequest, TrimWindow};
use vgrab_storage::{
    BlobStore, CacheStore, FsCacheStore, StorageError, StorageResult, UploadedStream, Visibility,
};
use vgrab_worker::{Pipeline, PipelineConfig};

const SOURCE_URL: &str = "https://example.com/watch?v=abc123";
const PUBLIC_URL: &str = "https://blobs.example";
const COOKIES: &str = "# Netscape HTTP Cookie File\n.example.com\tTRUE\t/\tFALSE\t0\tsid\tabc\n";

/// What `open_stream` hands back.
#[derive(Debug, Clone, Copy, Default)]
enum StreamSource {
    #[default]
    Bytes,
    Empty,
    /// Never yields a byte and never reaches EOF
    Stalled,
    /// A real process that writes a few bytes then exits non-zero
    FailingProcess,
}

/// Reader that stays pending forever.
struct StalledReader;

impl AsyncRead for StalledReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Poll::Pending
    }
}

#[derive(Default)]
struct FakeFetcher {
    streams: AtomicUsize,
    combined: AtomicUsize,
    titles: AtomicUsize,
    thumbnails: AtomicUsize,
    opened: AtomicUsize,
    title_fails: bool,
    delay: Option<Duration>,
    stream_source: StreamSource,
    jars: Mutex<Vec<PathBuf>>,
}

impl FakeFetcher {
    fn streaming(stream_source: StreamSource) -> Self {
        Self {
            stream_source,
            ..Default::default()
        }
    }

    fn use_jar(&self, cookies: &Path) {
        assert!(cookies.exists(), "cookie jar must exist: {}", cookies.display());
        self.jars.lock().unwrap().push(cookies.to_path_buf());
    }

    fn jars(&self) -> Vec<PathBuf> {
        self.jars.lock().unwrap().clone()
    }

    fn total_calls(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
            + self.combined.load(Ordering::SeqCst)
            + self.titles.load(Ordering::SeqCst)
            + self.thumbnails.load(Ordering::SeqCst)
            + self.opened.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch_streams(
        &self,
        _source_url: &str,
        dest: &StreamPaths,
        cookies: &StreamPaths,
    ) -> MediaResult<()> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        self.use_jar(&cookies.video);
        self.use_jar(&cookies.audio);
        self.pause().await;
        tokio::fs::write(&dest.video, b"video").await?;
        tokio::fs::write(&dest.audio, b"audio").await?;
        Ok(())
    }

    async fn fetch_combined(
        &self,
        _source_url: &str,
        output: &Path,
        cookies: &Path,
    ) -> MediaResult<()> {
        self.combined.fetch_add(1, Ordering::SeqCst);
        self.use_jar(cookies);
        self.pause().await;
        tokio::fs::write(output, b"combined").await?;
        Ok(())
    }

    async fn fetch_title(&self, _source_url: &str, cookies: &Path) -> MediaResult<String> {
        self.titles.fetch_add(1, Ordering::SeqCst);
        self.use_jar(cookies);
        if self.title_fails {
            return Err(MediaError::process_failed("yt-dlp", "title lookup failed", Some(1), None));
        }
        Ok("Fake Title".to_string())
    }

    async fn fetch_thumbnail(
        &self,
        _source_url: &str,
        output: &Path,
        cookies: &Path,
    ) -> MediaResult<()> {
        self.thumbnails.fetch_add(1, Ordering::SeqCst);
        self.use_jar(cookies);
        tokio::fs::write(output, b"thumbnail").await?;
        Ok(())
    }

    async fn open_stream(&self, _source_url: &str, cookies: &Path) -> MediaResult<MediaStream> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.use_jar(cookies);
        match self.stream_source {
            StreamSource::Bytes => Ok(MediaStream::from_reader(std::io::Cursor::new(
                b"streamed bytes".to_vec(),
            ))),
            StreamSource::Empty => Ok(MediaStream::from_reader(std::io::Cursor::new(Vec::new()))),
            StreamSource::Stalled => {
                Ok(MediaStream::from_reader(StalledReader).with_timeout(Duration::from_millis(100)))
            }
            StreamSource::FailingProcess => ProcessRunner::new()
                .spawn_stdout(&CommandSpec::new("sh").args(["-c", "printf partial; exit 3"])),
        }
    }
}

struct FakeCombiner {
    duration: f64,
    merge_failures: AtomicUsize,
    merges: AtomicUsize,
    trims: AtomicUsize,
    screenshots: Mutex<Vec<f64>>,
}

impl FakeCombiner {
    fn new(duration: f64) -> Self {
        Self {
            duration,
            merge_failures: AtomicUsize::new(0),
            merges: AtomicUsize::new(0),
            trims: AtomicUsize::new(0),
            screenshots: Mutex::new(Vec::new()),
        }
    }

    /// Fail the next `times` merges.
    fn with_merge_failures(self, times: usize) -> Self {
        self.merge_failures.store(times, Ordering::SeqCst);
        self
    }

    fn screenshot_times(&self) -> Vec<f64> {
        self.screenshots.lock().unwrap().clone()
    }

    fn total_calls(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
            + self.trims.load(Ordering::SeqCst)
            + self.screenshot_times().len()
    }
}

#[async_trait]
impl MediaCombiner for FakeCombiner {
    async fn merge(&self, _video: &Path, _audio: &Path, output: &Path) -> MediaResult<()> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .merge_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(MediaError::process_failed("ffmpeg", "merge failed", Some(1), None));
        }
        tokio::fs::write(output, b"merged").await?;
        Ok(())
    }

    async fn trim(&self, _input: &Path, output: &Path, _window: &TrimWindow) -> MediaResult<()> {
        self.trims.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, b"trimmed").await?;
        Ok(())
    }

    async fn screenshot(&self, _input: &Path, output: &Path, timestamp: f64) -> MediaResult<()> {
        self.screenshots.lock().unwrap().push(timestamp);
        tokio::fs::write(output, b"jpeg").await?;
        Ok(())
    }

    async fn probe_duration(&self, _input: &Path) -> MediaResult<f64> {
        Ok(self.duration)
    }
}

#[derive(Default)]
struct FakeBlobs {
    failures_left: AtomicUsize,
    attempted_keys: Mutex<Vec<String>>,
    streamed: Mutex<Vec<u8>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeBlobs {
    fn failing(times: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(times),
            ..Default::default()
        }
    }

    fn keys(&self) -> Vec<String> {
        self.attempted_keys.lock().unwrap().clone()
    }

    fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn attempt(&self, key: &str) -> StorageResult<BlobReference> {
        self.attempted_keys.lock().unwrap().push(key.to_string());
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StorageError::upload_failed("connection reset"));
        }
        Ok(self.reference(key))
    }
}

#[async_trait]
impl BlobStore for FakeBlobs {
    async fn upload_file(
        &self,
        path: &Path,
        key: &str,
        _content_type: &str,
        _visibility: Visibility,
    ) -> StorageResult<BlobReference> {
        assert!(path.exists(), "uploaded file must exist: {}", path.display());
        self.attempt(key)
    }

    async fn upload_stream(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        key: &str,
        _content_type: &str,
        _visibility: Visibility,
    ) -> StorageResult<UploadedStream> {
        let mut body = Vec::new();
        reader.read_to_end(&mut body).await?;
        self.streamed.lock().unwrap().extend_from_slice(&body);
        Ok(UploadedStream {
            reference: self.attempt(key)?,
            size_bytes: body.len() as u64,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.deleted.lock().unwrap().push(key.to_string());
        Ok(())
    }

    fn reference(&self, key: &str) -> BlobReference {
        BlobReference::new(PUBLIC_URL, key)
    }
}

struct Harness {
    dir: TempDir,
    fetcher: Arc<FakeFetcher>,
    combiner: Arc<FakeCombiner>,
    blobs: Arc<FakeBlobs>,
    pipeline: Arc<Pipeline>,
}

impl Harness {
    fn work_dir(&self) -> PathBuf {
        self.dir.path().join("work")
    }

    fn cache(&self) -> FsCacheStore {
        FsCacheStore::new(self.dir.path().join("cache"))
    }

    /// Number of entries left in the work directory.
    fn leftovers(&self) -> usize {
        match std::fs::read_dir(self.work_dir()) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }
}

struct Setup {
    fetcher: FakeFetcher,
    combiner: FakeCombiner,
    blobs: FakeBlobs,
    capabilities: Capabilities,
    with_cookies: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            fetcher: FakeFetcher::default(),
            combiner: FakeCombiner::new(120.0),
            blobs: FakeBlobs::default(),
            capabilities: Capabilities::default(),
            with_cookies: true,
        }
    }
}

impl Setup {
    fn build(self) -> Harness {
        let dir = TempDir::new().unwrap();
        let cookies = dir.path().join("cookies.txt");
        if self.with_cookies {
            std::fs::write(&cookies, COOKIES).unwrap();
        }

        let mut config = PipelineConfig::new(
            dir.path().join("work"),
            dir.path().join("cache"),
            &cookies,
        );
        config.retry_base_delay = Duration::from_millis(1);
        config.retry_max_delay = Duration::from_millis(1);
        config.capabilities = self.capabilities;

        let fetcher = Arc::new(self.fetcher);
        let combiner = Arc::new(self.combiner);
        let blobs = Arc::new(self.blobs);
        let cache = Arc::new(FsCacheStore::new(dir.path().join("cache")));
        let pipeline = Pipeline::new(
            config,
            fetcher.clone(),
            combiner.clone(),
            blobs.clone(),
            cache,
        );

        Harness {
            dir,
            fetcher,
            combiner,
            blobs,
            pipeline: Arc::new(pipeline),
        }
    }
}

#[tokio::test]
async fn test_miss_path_uploads_and_caches() {
    let h = Setup::default().build();

    let response = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap();

    assert!(response
        .media_reference
        .starts_with("https://blobs.example/abc123_"));
    assert!(response.media_reference.ends_with(".mp4"));
    assert_eq!(response.title.as_deref(), Some("Fake Title"));
    let cover = response.cover_reference.clone().unwrap();
    assert!(cover.starts_with("https://blobs.example/abc123_"));
    assert!(cover.ends_with(".jpg"));

    // Untrimmed media: screenshot at half the probed duration
    assert_eq!(h.combiner.screenshot_times(), vec![60.0]);
    assert_eq!(h.combiner.merges.load(Ordering::SeqCst), 1);
    assert_eq!(h.combiner.trims.load(Ordering::SeqCst), 0);

    let key = ContentKey::new("abc123").unwrap();
    let entry = h.cache().lookup(&key).await.unwrap().unwrap();
    assert_eq!(entry.key, key);
    assert_eq!(entry.media.url, response.media_reference);
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn test_cache_hit_short_circuits() {
    let h = Setup::default().build();
    let request = PipelineRequest::new(SOURCE_URL);

    let first = h.pipeline.process(&request).await.unwrap();
    let fetches = h.fetcher.total_calls();
    let combines = h.combiner.total_calls();
    let uploads = h.blobs.keys().len();

    let second = h.pipeline.process(&request).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.fetcher.total_calls(), fetches);
    assert_eq!(h.combiner.total_calls(), combines);
    assert_eq!(h.blobs.keys().len(), uploads);
}

#[tokio::test]
async fn test_cache_hit_needs_no_cookie_jar() {
    let h = Setup::default().build();
    let request = PipelineRequest::new(SOURCE_URL);
    h.pipeline.process(&request).await.unwrap();

    std::fs::remove_file(&h.pipeline.config().cookies_path).unwrap();
    assert!(h.pipeline.process(&request).await.is_ok());
}

#[tokio::test]
async fn test_trim_window_screenshot_at_midpoint() {
    let h = Setup::default().build();
    let request = PipelineRequest::new(SOURCE_URL).with_trim(10.0, 40.0);

    let response = h.pipeline.process(&request).await.unwrap();

    assert_eq!(h.combiner.trims.load(Ordering::SeqCst), 1);
    assert_eq!(h.combiner.screenshot_times(), vec![25.0]);
    assert!(response.cover_reference.is_some());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn test_empty_window_rejected_before_fetch() {
    let h = Setup::default().build();
    let request = PipelineRequest::new(SOURCE_URL).with_trim(40.0, 10.0);

    let err = h.pipeline.process(&request).await.unwrap_err();

    assert_eq!(err.kind(), "invalid_window");
    assert_eq!(h.fetcher.total_calls(), 0);
    assert_eq!(h.combiner.total_calls(), 0);
}

#[tokio::test]
async fn test_window_beyond_duration_rejected_before_transcoding() {
    let h = Setup::default().build();
    let request = PipelineRequest::new(SOURCE_URL).with_trim(10.0, 130.0);

    let err = h.pipeline.process(&request).await.unwrap_err();

    assert_eq!(err.kind(), "invalid_window");
    assert_eq!(h.combiner.total_calls(), 0);
    // Not retried
    assert_eq!(h.fetcher.streams.load(Ordering::SeqCst), 1);
    assert!(h.blobs.keys().is_empty());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn test_trim_rejected_when_disabled() {
    let h = Setup {
        capabilities: Capabilities {
            with_trim: false,
            ..Default::default()
        },
        ..Default::default()
    }
    .build();
    let request = PipelineRequest::new(SOURCE_URL).with_trim(10.0, 40.0);

    let err = h.pipeline.process(&request).await.unwrap_err();
    assert_eq!(err.kind(), "precondition");
    assert_eq!(h.fetcher.total_calls(), 0);
}

#[tokio::test]
async fn test_missing_cookie_jar_is_precondition() {
    let h = Setup {
        with_cookies: false,
        ..Default::default()
    }
    .build();

    let err = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "precondition");
    assert_eq!(h.fetcher.total_calls(), 0);
}

#[tokio::test]
async fn test_retry_reuses_blob_keys() {
    let h = Setup {
        blobs: FakeBlobs::failing(1),
        ..Default::default()
    }
    .build();

    let response = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap();

    let keys = h.blobs.keys();
    // failed media upload, media upload, cover upload
    assert_eq!(keys.len(), 3);
    assert_eq!(keys[0], keys[1]);
    assert!(response.media_reference.ends_with(&keys[1]));
    assert_eq!(h.fetcher.streams.load(Ordering::SeqCst), 2);
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn test_exhausted_retries_clean_up() {
    let h = Setup {
        combiner: FakeCombiner::new(120.0).with_merge_failures(usize::MAX),
        ..Default::default()
    }
    .build();

    let err = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "process");
    assert_eq!(h.combiner.merges.load(Ordering::SeqCst), 3);
    assert!(h.blobs.keys().is_empty());
    assert_eq!(h.leftovers(), 0);

    let key = ContentKey::new("abc123").unwrap();
    assert!(h.cache().lookup(&key).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_requests_share_one_run() {
    let h = Setup {
        fetcher: FakeFetcher {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        },
        ..Default::default()
    }
    .build();
    let request = PipelineRequest::new(SOURCE_URL);

    let (a, b) = tokio::join!(h.pipeline.process(&request), h.pipeline.process(&request));

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(h.fetcher.streams.load(Ordering::SeqCst), 1);
    assert_eq!(h.combiner.merges.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_cancellation_removes_temp_files() {
    let h = Setup {
        fetcher: FakeFetcher {
            delay: Some(Duration::from_secs(30)),
            ..Default::default()
        },
        ..Default::default()
    }
    .build();

    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = tx.send(true);
    });

    let err = h
        .pipeline
        .process_with_cancel(&PipelineRequest::new(SOURCE_URL), rx)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "cancelled");
    assert_eq!(h.fetcher.streams.load(Ordering::SeqCst), 1);
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn test_title_failure_is_tolerated() {
    let h = Setup {
        fetcher: FakeFetcher {
            title_fails: true,
            ..Default::default()
        },
        ..Default::default()
    }
    .build();

    let response = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap();

    assert!(response.title.is_none());
    assert_eq!(h.fetcher.streams.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_required_title_failure_fails_run() {
    let h = Setup {
        fetcher: FakeFetcher {
            title_fails: true,
            ..Default::default()
        },
        capabilities: Capabilities {
            title_fetch_required: true,
            ..Default::default()
        },
        ..Default::default()
    }
    .build();

    let err = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "process");
    assert!(h.blobs.keys().is_empty());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn test_combined_stream_with_thumbnail_cover() {
    let h = Setup {
        capabilities: Capabilities {
            merge_streams: false,
            with_screenshot: false,
            with_thumbnail: true,
            ..Default::default()
        },
        ..Default::default()
    }
    .build();

    let response = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap();

    assert_eq!(h.fetcher.combined.load(Ordering::SeqCst), 1);
    assert_eq!(h.fetcher.streams.load(Ordering::SeqCst), 0);
    assert_eq!(h.fetcher.thumbnails.load(Ordering::SeqCst), 1);
    assert_eq!(h.combiner.total_calls(), 0);
    assert!(response.cover_reference.unwrap().ends_with(".jpg"));
}

#[tokio::test]
async fn test_streaming_upload_skips_local_media() {
    let h = Setup {
        capabilities: Capabilities {
            streaming_upload: true,
            with_screenshot: false,
            ..Default::default()
        },
        ..Default::default()
    }
    .build();

    let response = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap();

    assert_eq!(h.fetcher.opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.fetcher.streams.load(Ordering::SeqCst), 0);
    assert_eq!(h.combiner.total_calls(), 0);
    assert_eq!(h.blobs.streamed.lock().unwrap().as_slice(), b"streamed bytes");
    assert!(h.blobs.deleted.lock().unwrap().is_empty());
    assert!(response.media_reference.ends_with(".mp4"));
    assert!(response.cover_reference.is_none());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn test_transient_merge_failure_is_retried() {
    let h = Setup {
        combiner: FakeCombiner::new(120.0).with_merge_failures(1),
        ..Default::default()
    }
    .build();

    let response = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap();

    // The whole miss path ran again, downloads included
    assert_eq!(h.combiner.merges.load(Ordering::SeqCst), 2);
    assert_eq!(h.fetcher.streams.load(Ordering::SeqCst), 2);

    let keys = h.blobs.keys();
    assert_eq!(keys.len(), 2);
    assert_eq!(response.media_reference, format!("{}/{}", PUBLIC_URL, keys[0]));
    assert_eq!(
        keys[0].trim_end_matches(".mp4"),
        keys[1].trim_end_matches(".jpg")
    );

    let key = ContentKey::new("abc123").unwrap();
    let entry = h.cache().lookup(&key).await.unwrap().unwrap();
    assert_eq!(entry.media.url, response.media_reference);
    assert_eq!(h.leftovers(), 0);
}

fn streaming_setup(stream_source: StreamSource) -> Harness {
    Setup {
        fetcher: FakeFetcher::streaming(stream_source),
        capabilities: Capabilities {
            streaming_upload: true,
            with_screenshot: false,
            ..Default::default()
        },
        ..Default::default()
    }
    .build()
}

#[tokio::test]
async fn test_empty_stream_is_output_missing() {
    let h = streaming_setup(StreamSource::Empty);

    let err = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "output_missing");
    assert!(err.is_retryable());
    assert_eq!(h.fetcher.opened.load(Ordering::SeqCst), 3);
    // Every empty object that was stored is removed again
    assert_eq!(h.blobs.deleted(), h.blobs.keys());
    assert_eq!(h.blobs.deleted().len(), 3);

    let key = ContentKey::new("abc123").unwrap();
    assert!(h.cache().lookup(&key).await.unwrap().is_none());
    assert_eq!(h.leftovers(), 0);
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_downloader_deletes_partial_blob() {
    let h = streaming_setup(StreamSource::FailingProcess);

    let err = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "process");
    assert_eq!(h.fetcher.opened.load(Ordering::SeqCst), 3);
    assert!(h.blobs.streamed.lock().unwrap().starts_with(b"partial"));

    let keys = h.blobs.keys();
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|k| *k == keys[0]));
    assert_eq!(h.blobs.deleted(), keys);

    let key = ContentKey::new("abc123").unwrap();
    assert!(h.cache().lookup(&key).await.unwrap().is_none());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn test_stalled_stream_times_out() {
    let h = streaming_setup(StreamSource::Stalled);

    let started = std::time::Instant::now();
    let err = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "process");
    assert!(matches!(
        err,
        vgrab_worker::PipelineError::Process { timeout: true, .. }
    ));
    assert_eq!(h.fetcher.opened.load(Ordering::SeqCst), 3);
    assert!(started.elapsed() < Duration::from_secs(10));

    let key = ContentKey::new("abc123").unwrap();
    assert!(h.cache().lookup(&key).await.unwrap().is_none());
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn test_each_download_gets_its_own_cookie_jar() {
    let h = Setup::default().build();

    h.pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap();

    // video, audio and title run concurrently
    let jars = h.fetcher.jars();
    assert_eq!(jars.len(), 3);
    let distinct: HashSet<_> = jars.iter().collect();
    assert_eq!(distinct.len(), 3);
    assert!(jars.iter().all(|jar| jar.starts_with(h.work_dir())));
    assert_eq!(h.leftovers(), 0);
}

#[tokio::test]
async fn test_windowed_request_after_full_run_returns_cached_media() {
    let h = Setup::default().build();

    let full = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL))
        .await
        .unwrap();
    let windowed = h
        .pipeline
        .process(&PipelineRequest::new(SOURCE_URL).with_trim(10.0, 40.0))
        .await
        .unwrap();

    assert_eq!(full, windowed);
    assert_eq!(h.combiner.trims.load(Ordering::SeqCst), 0);
    assert_eq!(h.combiner.screenshot_times(), vec![60.0]);
}
