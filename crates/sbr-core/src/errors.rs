use std::path::PathBuf;

/// Core error type shared by every storybridge crate.
///
/// Adapter crates map their vendor errors into this type so the orchestrator
/// can turn any per-cycle failure into a logged outcome.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("auth error: {0}")]
    Auth(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("download error: {0}")]
    Download(String),

    #[error("upload error: {0}")]
    Upload(String),

    #[error("storage error: {path}: {reason}")]
    Storage { path: PathBuf, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    pub fn storage(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Storage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Everything but configuration problems can succeed on a later cycle.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
