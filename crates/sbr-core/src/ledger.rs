//! Durable dedup ledger.
//!
//! The ledger is an ordered set of story ids that have already been reposted.
//! `JsonFileLedger` keeps it in memory and writes the whole set through to a
//! flat JSON array on every successful commit.

use std::{
    collections::{HashSet, VecDeque},
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{domain::StoryId, errors::Error, Result};

#[async_trait]
pub trait DedupLedger: Send + Sync {
    /// True iff `id` was previously committed.
    async fn has(&self, id: &StoryId) -> bool;

    /// Idempotently record `id`. The new state is persisted before this
    /// returns `Ok`; on failure the in-memory state is left unchanged.
    async fn commit(&self, id: &StoryId) -> Result<()>;

    /// Re-read the backing store, replacing in-memory state.
    async fn reload(&self) -> Result<usize>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug, Default, Clone)]
struct LedgerState {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl LedgerState {
    fn from_ids(ids: Vec<String>, max_entries: Option<usize>) -> Self {
        let mut st = Self::default();
        for id in ids {
            if st.seen.insert(id.clone()) {
                st.order.push_back(id);
            }
        }
        st.evict(max_entries);
        st
    }

    fn evict(&mut self, max_entries: Option<usize>) {
        let Some(max) = max_entries else {
            return;
        };
        while self.order.len() > max {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
    }

    fn with(&self, id: &str, max_entries: Option<usize>) -> Self {
        let mut next = self.clone();
        next.seen.insert(id.to_string());
        next.order.push_back(id.to_string());
        next.evict(max_entries);
        next
    }
}

/// Ledger persisted as a JSON array of ids.
pub struct JsonFileLedger {
    path: PathBuf,
    max_entries: Option<usize>,
    state: Mutex<LedgerState>,
}

impl JsonFileLedger {
    /// Open the ledger at `path`. A missing or blank file is an empty ledger.
    ///
    /// `max_entries` caps the ledger; the oldest ids are evicted first.
    pub async fn load(path: impl Into<PathBuf>, max_entries: Option<usize>) -> Result<Self> {
        let path = path.into();
        let ids = read_ids(&path).await?;
        let state = LedgerState::from_ids(ids, max_entries);
        tracing::info!(
            path = %path.display(),
            entries = state.order.len(),
            "dedup ledger loaded"
        );
        Ok(Self {
            path,
            max_entries,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of committed ids, oldest first.
    pub async fn ids(&self) -> Vec<String> {
        self.state.lock().await.order.iter().cloned().collect()
    }
}

#[async_trait]
impl DedupLedger for JsonFileLedger {
    async fn has(&self, id: &StoryId) -> bool {
        self.state.lock().await.seen.contains(id.as_str())
    }

    async fn commit(&self, id: &StoryId) -> Result<()> {
        // Held across the write so commits persist in order.
        let mut st = self.state.lock().await;
        if st.seen.contains(id.as_str()) {
            return Ok(());
        }

        let next = st.with(id.as_str(), self.max_entries);
        let ids: Vec<&String> = next.order.iter().collect();
        write_ids(&self.path, &ids).await?;

        *st = next;
        Ok(())
    }

    async fn reload(&self) -> Result<usize> {
        // Lock first so a concurrent commit cannot land between read and swap.
        let mut st = self.state.lock().await;
        let ids = read_ids(&self.path).await?;
        *st = LedgerState::from_ids(ids, self.max_entries);
        Ok(st.order.len())
    }

    async fn len(&self) -> usize {
        self.state.lock().await.order.len()
    }
}

async fn read_ids(path: &Path) -> Result<Vec<String>> {
    let txt = match tokio::fs::read_to_string(path).await {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::storage(path, e)),
    };
    if txt.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&txt).map_err(|e| Error::storage(path, e))
}

async fn write_ids(path: &Path, ids: &[&String]) -> Result<()> {
    let txt = serde_json::to_string(ids).map_err(|e| Error::storage(path, e))?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, txt)
        .await
        .map_err(|e| Error::storage(path, e))?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(Error::storage(path, e));
    }
    Ok(())
}
