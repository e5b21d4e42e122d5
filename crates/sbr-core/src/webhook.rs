//! Webhook trigger: payload model, signature checking and dispatch.
//!
//! Payload shape (Meta-style change notifications):
//! `{ "object": "...", "entry": [ { "id": "...", "changes": [ { "field": "story", "value": {...} } ] } ] }`

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::{
    domain::{MediaKind, StoryRef},
    orchestrator::{Outcome, RepostOrchestrator, Trigger},
};

type HmacSha256 = Hmac<Sha256>;

pub const STORY_FIELD: &str = "story";

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookEntry {
    /// Account id; string or number depending on the sender.
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub time: Option<serde_json::Value>,
    #[serde(default)]
    pub changes: Vec<WebhookChange>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct WebhookChange {
    #[serde(default)]
    pub field: String,
    /// Left untyped; only `story` values are decoded.
    #[serde(default)]
    pub value: serde_json::Value,
}

/// Fields read from a `story` change value.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoryChange {
    pub media_id: Option<String>,
    pub id: Option<String>,
    pub media_url: Option<String>,
    pub media_type: Option<String>,
}

impl StoryChange {
    /// Ids may arrive as strings or numbers; blank strings count as absent.
    pub fn from_value(value: &serde_json::Value) -> Self {
        let text = |key: &str| -> Option<String> {
            let s = match value.get(key)? {
                serde_json::Value::String(s) => s.trim().to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                _ => return None,
            };
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        };
        Self {
            media_id: text("media_id"),
            id: text("id"),
            media_url: text("media_url"),
            media_type: text("media_type"),
        }
    }
}

/// Story references carried by `payload`, in entry then change order.
///
/// Only `story` changes with a media URL count. The id falls back from
/// `media_id` to `id` to the URL itself.
pub fn extract_stories(payload: &WebhookPayload) -> Vec<StoryRef> {
    payload
        .entry
        .iter()
        .flat_map(|entry| entry.changes.iter())
        .filter(|change| change.field == STORY_FIELD)
        .filter_map(|change| {
            let value = StoryChange::from_value(&change.value);
            let url = value.media_url?;
            let id = value.media_id.or(value.id).unwrap_or_else(|| url.clone());

            let story = StoryRef::new(id, url);
            let kind = value
                .media_type
                .as_deref()
                .and_then(MediaKind::from_media_type);
            Some(match kind {
                Some(kind) => story.with_kind(kind),
                None => story,
            })
        })
        .collect()
}

/// Consider each story in order, one at a time.
pub async fn dispatch_stories(
    orchestrator: &RepostOrchestrator,
    stories: &[StoryRef],
) -> Vec<Outcome> {
    let mut outcomes = Vec::with_capacity(stories.len());
    for story in stories {
        outcomes.push(orchestrator.consider_repost(story, Trigger::Webhook).await);
    }
    outcomes
}

/// Check an `X-Hub-Signature-256` header (`sha256=<hex>`) against `body`.
pub fn verify_signature(app_secret: &str, body: &[u8], header: Option<&str>) -> bool {
    let Some(sig_hex) = header.and_then(|h| h.trim().strip_prefix("sha256=")) else {
        return false;
    };
    let Ok(expected) = hex::decode(sig_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Subscription handshake: echo `challenge` when mode and token match.
pub fn verify_subscription<'a>(
    expected_token: Option<&str>,
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&'a str>,
) -> Option<&'a str> {
    let expected = expected_token?;
    if mode != Some("subscribe") || token != Some(expected) {
        return None;
    }
    challenge
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domain::StoryId,
        ledger::JsonFileLedger,
        testing::{FakePublisher, FakeRelay},
    };
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn payload(v: serde_json::Value) -> WebhookPayload {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn extracts_story_changes_across_entries_in_order() {
        let p = payload(json!({
          "object": "instagram",
          "entry": [
            { "id": "1", "changes": [
              { "field": "story", "value": { "media_id": "a", "media_url": "https://x/a.jpg" } },
              { "field": "comments", "value": { "id": "c1" } },
              { "field": "story", "value": { "id": "b", "media_url": "https://x/b.mp4" } }
            ]},
            { "id": "2", "changes": [
              { "field": "story", "value": { "media_url": "https://x/c.jpg", "media_type": "VIDEO" } },
              { "field": "story", "value": { "media_id": "no-url" } }
            ]}
          ]
        }));

        let stories = extract_stories(&p);
        let ids: Vec<&str> = stories.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "https://x/c.jpg"]);
        assert_eq!(stories[1].kind, MediaKind::Video);
        assert_eq!(stories[2].kind, MediaKind::Video);
    }

    #[test]
    fn unrelated_changes_with_numeric_ids_do_not_break_parsing() {
        let body = br#"{"entry":[{"id":1784,"time":1700000000,"changes":[
          {"field":"mentions","value":{"media_id":17887498072083520}},
          {"field":"story","value":{"media_id":17900000000000001,"media_url":"https://x/n.jpg"}},
          {"field":"story","value":{"media_id":" s1 ","media_url":" https://x/1.jpg "}}
        ]}]}"#;
        let p: WebhookPayload = serde_json::from_slice(body).unwrap();

        let stories = extract_stories(&p);
        let ids: Vec<&str> = stories.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["17900000000000001", "s1"]);
        assert_eq!(stories[1].source_url, "https://x/1.jpg");
    }

    #[test]
    fn blank_ids_fall_back_to_the_url() {
        let p = payload(json!({ "entry": [ { "changes": [
          { "field": "story", "value": { "media_id": "  ", "id": "", "media_url": "https://x/u.jpg" } }
        ]}]}));
        assert_eq!(extract_stories(&p)[0].id.as_str(), "https://x/u.jpg");
    }

    #[test]
    fn empty_or_unrelated_payloads_yield_nothing() {
        assert!(extract_stories(&payload(json!({}))).is_empty());
        assert!(extract_stories(&payload(json!({ "entry": [ { "id": "1" } ] }))).is_empty());
    }

    #[tokio::test]
    async fn two_story_entries_trigger_two_reposts_in_order() {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(
            JsonFileLedger::load(dir.path().join("ledger.json"), None)
                .await
                .unwrap(),
        );
        let relay = Arc::new(FakeRelay::default());
        let orch = RepostOrchestrator::new(ledger, Arc::new(FakePublisher::default()), relay.clone());

        let p = payload(json!({
          "entry": [ { "changes": [
            { "field": "story", "value": { "media_id": "s1", "media_url": "https://x/1.jpg" } },
            { "field": "story", "value": { "media_id": "s2", "media_url": "https://x/2.jpg" } }
          ]}]
        }));
        let outcomes = dispatch_stories(&orch, &extract_stories(&p)).await;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(Outcome::is_posted));
        assert_eq!(relay.calls(), vec![StoryId::from("s1"), StoryId::from("s2")]);
    }

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn signature_must_match_body_and_secret() {
        let body = br#"{"entry":[]}"#;
        let good = sign("s3cret", body);

        assert!(verify_signature("s3cret", body, Some(good.as_str())));
        assert!(!verify_signature("other", body, Some(good.as_str())));
        assert!(!verify_signature("s3cret", b"{}", Some(good.as_str())));
        assert!(!verify_signature("s3cret", body, None));
        assert!(!verify_signature("s3cret", body, Some("sha256=zz")));
        assert!(!verify_signature("s3cret", body, Some(good.trim_start_matches("sha256="))));
    }

    #[test]
    fn subscription_handshake_echoes_challenge() {
        assert_eq!(
            verify_subscription(Some("tok"), Some("subscribe"), Some("tok"), Some("123")),
            Some("123")
        );
        assert_eq!(
            verify_subscription(Some("tok"), Some("subscribe"), Some("bad"), Some("123")),
            None
        );
        assert_eq!(
            verify_subscription(None, Some("subscribe"), Some("tok"), Some("123")),
            None
        );
    }
}
