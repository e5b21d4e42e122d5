//! Scoped staging files for downloaded story media.

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{domain::MediaKind, Result};

static STAGE_COUNTER: AtomicUsize = AtomicUsize::new(1);

/// A temporary local file owned by one in-flight relay.
///
/// Call [`StagedAsset::release`] when done. If the asset is dropped without
/// being released (early return, panic, cancelled future) the file is removed
/// synchronously in `Drop`.
#[derive(Debug)]
pub struct StagedAsset {
    path: PathBuf,
    released: bool,
}

impl StagedAsset {
    /// Reserve a unique path in `dir` and create an empty file there.
    pub async fn create(dir: &Path, kind: MediaKind) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;

        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let n = STAGE_COUNTER.fetch_add(1, Ordering::SeqCst);
        let pid = std::process::id();
        let path = dir.join(format!("story_{ts}_{pid}_{n}.{}", kind.extension()));

        tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        Ok(Self {
            path,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the staged file.
    pub async fn release(mut self) {
        self.released = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staged file");
            }
        }
    }
}

impl Drop for StagedAsset {
    fn drop(&mut self) {
        if !self.released {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
