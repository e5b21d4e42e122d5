//! Persisted source-account session.
//!
//! Stored as one JSON object, rewritten wholesale on every change.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{errors::Error, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSession {
    pub user_id: String,
    pub access_token: String,
    pub refreshed_at: DateTime<Utc>,
}

impl SourceSession {
    pub fn new(user_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            access_token: access_token.into(),
            refreshed_at: Utc::now(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.refreshed_at
    }
}

#[derive(Clone, Debug)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no session has been saved yet.
    pub fn load(&self) -> Result<Option<SourceSession>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let txt = std::fs::read_to_string(&self.path).map_err(|e| Error::storage(&self.path, e))?;
        if txt.trim().is_empty() {
            return Ok(None);
        }
        let data = serde_json::from_str(&txt).map_err(|e| Error::storage(&self.path, e))?;
        Ok(Some(data))
    }

    pub fn save(&self, session: &SourceSession) -> Result<()> {
        let txt = serde_json::to_string(session)?;
        std::fs::write(&self.path, txt).map_err(|e| Error::storage(&self.path, e))?;
        Ok(())
    }
}
