//! Media relay: download a story into a staged file, upload it, clean up.

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::{
    domain::{PublishReceipt, StoryRef},
    errors::Error,
    ports::StoryPublisher,
    staging::StagedAsset,
    Result,
};

/// Moves one story from its source URL to the destination.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn relay(&self, story: &StoryRef) -> Result<PublishReceipt>;
}

/// Shared HTTP client with the configured per-request timeout.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::External(format!("http client build failed: {e}")))
}

pub struct MediaRelay {
    http: reqwest::Client,
    staging_dir: PathBuf,
    publisher: Arc<dyn StoryPublisher>,
}

impl MediaRelay {
    pub fn new(
        http: reqwest::Client,
        staging_dir: impl Into<PathBuf>,
        publisher: Arc<dyn StoryPublisher>,
    ) -> Self {
        Self {
            http,
            staging_dir: staging_dir.into(),
            publisher,
        }
    }

    async fn transfer(&self, story: &StoryRef, asset: &StagedAsset) -> Result<PublishReceipt> {
        tracing::info!(story_id = %story.id, url = %story.source_url, "downloading story");
        let bytes = download_to(&self.http, &story.source_url, asset).await?;
        tracing::info!(
            story_id = %story.id,
            bytes,
            path = %asset.path().display(),
            "story downloaded"
        );

        tracing::info!(story_id = %story.id, destination = self.publisher.name(), "uploading story");
        self.publisher
            .send_media(asset.path(), story.kind)
            .await
            .map_err(|e| match e {
                Error::Upload(_) => e,
                other => Error::Upload(other.to_string()),
            })
    }
}

#[async_trait]
impl Relay for MediaRelay {
    async fn relay(&self, story: &StoryRef) -> Result<PublishReceipt> {
        let asset = StagedAsset::create(&self.staging_dir, story.kind)
            .await
            .map_err(|e| Error::Download(format!("cannot create staging file: {e}")))?;

        let result = self.transfer(story, &asset).await;
        asset.release().await;
        result
    }
}

async fn download_to(http: &reqwest::Client, url: &str, asset: &StagedAsset) -> Result<u64> {
    let mut resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Download(format!("request failed: {e}")))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(Error::Download(format!("{url} returned {status}")));
    }

    let mut file = tokio::fs::File::create(asset.path())
        .await
        .map_err(|e| Error::Download(format!("cannot open staging file: {e}")))?;

    let mut total = 0u64;
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| Error::Download(format!("stream interrupted: {e}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| Error::Download(format!("write failed: {e}")))?;
        total += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| Error::Download(format!("write failed: {e}")))?;

    if total == 0 {
        return Err(Error::Download(format!("{url} returned an empty body")));
    }
    Ok(total)
}
