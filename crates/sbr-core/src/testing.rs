//! Shared fakes for unit tests.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    domain::{MediaKind, PublishReceipt, StoryId, StoryRef},
    errors::Error,
    ledger::DedupLedger,
    ports::StoryPublisher,
    relay::Relay,
    Result,
};

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[derive(Clone, Debug)]
pub struct SentMedia {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub kind: MediaKind,
}

#[derive(Default)]
pub struct FakePublisher {
    pub deny: AtomicBool,
    pub fail_capability: AtomicBool,
    pub fail_upload: AtomicBool,
    pub can_send_calls: AtomicUsize,
    sent: Mutex<Vec<SentMedia>>,
}

impl FakePublisher {
    pub fn sent(&self) -> Vec<SentMedia> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl StoryPublisher for FakePublisher {
    fn name(&self) -> &str {
        "fake"
    }

    async fn can_send(&self) -> Result<bool> {
        self.can_send_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_capability.load(Ordering::SeqCst) {
            return Err(Error::Auth("bot is not a member of the chat".to_string()));
        }
        Ok(!self.deny.load(Ordering::SeqCst))
    }

    async fn send_media(&self, path: &Path, kind: MediaKind) -> Result<PublishReceipt> {
        if self.fail_upload.load(Ordering::SeqCst) {
            return Err(Error::External("telegram error: file too big".to_string()));
        }
        let bytes = std::fs::read(path)?;
        let mut sent = self.sent.lock().unwrap();
        sent.push(SentMedia {
            path: path.to_path_buf(),
            bytes,
            kind,
        });
        Ok(PublishReceipt {
            message_id: sent.len().to_string(),
        })
    }
}

/// Relay double that records which stories it was asked to move.
#[derive(Default)]
pub struct FakeRelay {
    pub fail: AtomicBool,
    calls: Mutex<Vec<StoryId>>,
}

impl FakeRelay {
    pub fn calls(&self) -> Vec<StoryId> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Relay for FakeRelay {
    async fn relay(&self, story: &StoryRef) -> Result<PublishReceipt> {
        let n = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(story.id.clone());
            calls.len()
        };
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Download(format!("{} returned 404", story.source_url)));
        }
        Ok(PublishReceipt {
            message_id: n.to_string(),
        })
    }
}

/// Ledger whose writes always fail.
#[derive(Default)]
pub struct FailingLedger {
    pub commit_calls: AtomicUsize,
}

#[async_trait]
impl DedupLedger for FailingLedger {
    async fn has(&self, _id: &StoryId) -> bool {
        false
    }

    async fn commit(&self, _id: &StoryId) -> Result<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::storage("/ro/ledger.json", "read-only file system"))
    }

    async fn reload(&self) -> Result<usize> {
        Ok(0)
    }

    async fn len(&self) -> usize {
        0
    }
}
