//! Repost-once state machine.
//!
//! `consider_repost` checks the ledger, asks the destination whether it can
//! post, relays the media and records the story id. The whole sequence runs
//! under one global lock so two triggers racing on the same story can never
//! both get past the ledger check.

use std::{fmt, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::{
    audit::{AuditEvent, AuditLogger},
    domain::{PublishReceipt, StoryRef},
    ledger::DedupLedger,
    ports::StoryPublisher,
    relay::Relay,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyPosted,
    CapabilityDenied,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    /// `committed` is false when the relay succeeded but the ledger write kept
    /// failing; the story may be reposted on a later cycle.
    Posted {
        receipt: PublishReceipt,
        committed: bool,
    },
    Failed(String),
}

impl Outcome {
    pub fn is_posted(&self) -> bool {
        matches!(self, Self::Posted { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Skipped(SkipReason::AlreadyPosted) => "skipped_already_posted",
            Self::Skipped(SkipReason::CapabilityDenied) => "skipped_capability_denied",
            Self::Posted {
                committed: true, ..
            } => "posted",
            Self::Posted {
                committed: false, ..
            } => "posted_uncommitted",
            Self::Failed(_) => "failed",
        }
    }
}

/// What caused an orchestration run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Poll,
    Webhook,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Poll => "poll",
            Self::Webhook => "webhook",
        })
    }
}

pub struct RepostOrchestrator {
    ledger: Arc<dyn DedupLedger>,
    publisher: Arc<dyn StoryPublisher>,
    relay: Arc<dyn Relay>,
    gate: Mutex<()>,
    commit_attempts: u32,
    commit_backoff: Duration,
    audit: Option<AuditLogger>,
}

impl RepostOrchestrator {
    pub fn new(
        ledger: Arc<dyn DedupLedger>,
        publisher: Arc<dyn StoryPublisher>,
        relay: Arc<dyn Relay>,
    ) -> Self {
        Self {
            ledger,
            publisher,
            relay,
            gate: Mutex::new(()),
            commit_attempts: 3,
            commit_backoff: Duration::from_millis(250),
            audit: None,
        }
    }

    /// Commit retry policy applied after a successful relay.
    pub fn with_commit_policy(mut self, attempts: u32, backoff: Duration) -> Self {
        self.commit_attempts = attempts.max(1);
        self.commit_backoff = backoff;
        self
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = Some(audit);
        self
    }

    pub async fn consider_repost(&self, story: &StoryRef, trigger: Trigger) -> Outcome {
        let outcome = {
            let _guard = self.gate.lock().await;
            self.run(story).await
        };
        self.report(story, trigger, &outcome);
        outcome
    }

    async fn run(&self, story: &StoryRef) -> Outcome {
        if self.ledger.has(&story.id).await {
            return Outcome::Skipped(SkipReason::AlreadyPosted);
        }

        match self.publisher.can_send().await {
            Ok(true) => {}
            Ok(false) => return Outcome::Skipped(SkipReason::CapabilityDenied),
            Err(e) => return Outcome::Failed(format!("capability check failed: {e}")),
        }

        let receipt = match self.relay.relay(story).await {
            Ok(r) => r,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        let committed = self.commit_with_retry(story).await;
        Outcome::Posted { receipt, committed }
    }

    async fn commit_with_retry(&self, story: &StoryRef) -> bool {
        for attempt in 1..=self.commit_attempts {
            match self.ledger.commit(&story.id).await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(
                        story_id = %story.id,
                        attempt,
                        attempts = self.commit_attempts,
                        error = %e,
                        "ledger commit failed"
                    );
                    if attempt < self.commit_attempts {
                        sleep(self.commit_backoff * attempt).await;
                    }
                }
            }
        }

        tracing::error!(
            story_id = %story.id,
            "story was reposted but could not be recorded; it may be reposted again"
        );
        false
    }

    fn report(&self, story: &StoryRef, trigger: Trigger, outcome: &Outcome) {
        match outcome {
            Outcome::Skipped(reason) => {
                tracing::info!(story_id = %story.id, %trigger, ?reason, "repost skipped")
            }
            Outcome::Posted { receipt, committed } => tracing::info!(
                story_id = %story.id,
                %trigger,
                message_id = %receipt.message_id,
                committed,
                "story reposted"
            ),
            Outcome::Failed(reason) => {
                tracing::error!(story_id = %story.id, %trigger, %reason, "repost failed")
            }
        }

        let Some(audit) = &self.audit else {
            return;
        };
        let mut ev = AuditEvent::new(
            outcome.label(),
            &trigger.to_string(),
            story.id.as_str(),
            &story.source_url,
        );
        match outcome {
            Outcome::Posted { receipt, committed } => {
                ev.message_id = Some(receipt.message_id.clone());
                ev.committed = Some(*committed);
            }
            Outcome::Failed(reason) => ev.error = Some(reason.clone()),
            Outcome::Skipped(_) => {}
        }
        if let Err(e) = audit.write(ev) {
            tracing::warn!(error = %e, "audit write failed");
        }
    }
}
