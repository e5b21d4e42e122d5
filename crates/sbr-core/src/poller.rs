//! Periodic poll trigger.

use std::{sync::Arc, time::Duration};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    orchestrator::{Outcome, RepostOrchestrator, Trigger},
    ports::StorySource,
};

/// Result of one poll cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollResult {
    NoStory,
    FetchFailed(String),
    Considered(Outcome),
}

pub struct StoryPoller {
    source: Arc<dyn StorySource>,
    orchestrator: Arc<RepostOrchestrator>,
    interval: Duration,
}

impl StoryPoller {
    pub fn new(
        source: Arc<dyn StorySource>,
        orchestrator: Arc<RepostOrchestrator>,
        interval: Duration,
    ) -> Self {
        Self {
            source,
            orchestrator,
            interval,
        }
    }

    /// Fetch the newest story once and consider it for repost.
    pub async fn poll_once(&self) -> PollResult {
        let story = match self.source.latest_story().await {
            Ok(Some(story)) => story,
            Ok(None) => {
                tracing::debug!("no stories found");
                return PollResult::NoStory;
            }
            Err(e) => {
                tracing::error!(error = %e, retryable = e.is_retryable(), "failed to fetch latest story");
                return PollResult::FetchFailed(e.to_string());
            }
        };

        PollResult::Considered(
            self.orchestrator
                .consider_repost(&story, Trigger::Poll)
                .await,
        )
    }

    /// Poll until `cancel` fires. The first cycle runs immediately.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs(), "story poller started");

        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = tick.tick() => {
                // A slow cycle is not interrupted by shutdown.
                let _ = self.poll_once().await;
              }
            }
        }

        tracing::info!("story poller stopped");
    }
}
