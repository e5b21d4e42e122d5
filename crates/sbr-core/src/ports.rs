use std::path::Path;

use async_trait::async_trait;

use crate::{
    domain::{MediaKind, PublishReceipt, StoryRef},
    Result,
};

/// Source of stories (Instagram today).
#[async_trait]
pub trait StorySource: Send + Sync {
    /// The newest story on the account, if any.
    ///
    /// Only the single most recent item is returned; older stories are never
    /// considered.
    async fn latest_story(&self) -> Result<Option<StoryRef>>;
}

/// Destination surface that stories are mirrored to (Telegram today).
#[async_trait]
pub trait StoryPublisher: Send + Sync {
    /// Short label used in logs and audit records.
    fn name(&self) -> &str;

    /// Whether the destination accepts a post right now.
    async fn can_send(&self) -> Result<bool>;

    /// Upload a staged local file.
    async fn send_media(&self, path: &Path, kind: MediaKind) -> Result<PublishReceipt>;
}
