//! Scoped temporary files for one pipeline attempt.
//!
//! Every file an attempt creates is registered before the tool that writes
//! it runs. [`TempAssets::cleanup`] runs after each attempt whatever the
//! outcome; if the attempt's future is dropped instead (cancellation), the
//! `Drop` impl removes whatever is left synchronously.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Registry of a run directory and the files created inside it.
#[derive(Debug)]
pub struct TempAssets {
    root: PathBuf,
    paths: Vec<PathBuf>,
    released: bool,
}

impl TempAssets {
    /// Create the run directory and an empty registry for it.
    pub async fn create(root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            paths: Vec::new(),
            released: false,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Register a path (relative names resolve inside the run directory).
    pub fn register(&mut self, path: impl AsRef<Path>) -> PathBuf {
        let path = self.root.join(path);
        if !self.paths.contains(&path) {
            self.paths.push(path.clone());
        }
        path
    }

    /// Delete every registered file and the run directory.
    ///
    /// Errors are logged and never returned. Returns the number of
    /// registered files that existed and were removed.
    pub async fn cleanup(&mut self) -> usize {
        let mut removed = 0;

        for path in &self.paths {
            match tokio::fs::remove_file(path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove temp file"),
            }
        }

        // Tools leave partial files (.part, .ytdl) that were never registered
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.root.display(), error = %e, "Failed to remove run directory"),
        }

        self.released = true;
        debug!(path = %self.root.display(), removed = removed, "Temp assets released");
        removed
    }
}

impl Drop for TempAssets {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove temp file");
                }
            }
        }
        if let Err(e) = std::fs::remove_dir_all(&self.root) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.root.display(), error = %e, "Failed to remove run directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cleanup_removes_files_and_dir() {
        let work = TempDir::new().unwrap();
        let mut assets = TempAssets::create(work.path().join("abc123_1_x")).await.unwrap();

        let video = assets.register("abc123_video.mp4");
        tokio::fs::write(&video, b"v").await.unwrap();
        assets.register("abc123_audio.m4a"); // never created
        tokio::fs::write(assets.root().join("abc123_video.mp4.part"), b"p")
            .await
            .unwrap();

        assert_eq!(assets.cleanup().await, 1);
        assert!(!assets.root().exists());
        assert_eq!(std::fs::read_dir(work.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_drop_fallback() {
        let work = TempDir::new().unwrap();
        let root = work.path().join("run");
        {
            let mut assets = TempAssets::create(&root).await.unwrap();
            let cover = assets.register("cover.jpg");
            tokio::fs::write(&cover, b"jpg").await.unwrap();
        }
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_register_is_deduplicated() {
        let work = TempDir::new().unwrap();
        let mut assets = TempAssets::create(work.path().join("run")).await.unwrap();
        let a = assets.register("x.mp4");
        let b = assets.register("x.mp4");
        assert_eq!(a, b);
        assert_eq!(assets.paths.len(), 1);
        assets.cleanup().await;
    }
}
