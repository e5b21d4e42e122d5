//! Instagram adapter (story source).
//!
//! Reads the newest story of an account through the Instagram Graph API and
//! keeps the long-lived access token fresh in a persisted session file.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;

use sbr_core::{
    domain::{MediaKind, StoryRef},
    errors::Error,
    ports::StorySource,
    session::{SessionFile, SourceSession},
    Result,
};

const STORY_FIELDS: &str = "id,media_type,media_url,timestamp";

pub struct InstagramClient {
    http: reqwest::Client,
    base: String,
    session_file: SessionFile,
    session: Mutex<SourceSession>,
    refresh_after: Duration,
}

impl InstagramClient {
    /// Open the client, preferring the persisted session over the configured
    /// token. The file is seeded on first run or when the account changes.
    pub fn open(
        http: reqwest::Client,
        base: impl Into<String>,
        session_file: SessionFile,
        user_id: &str,
        access_token: &str,
        refresh_after: Duration,
    ) -> Result<Self> {
        let session = match session_file.load()? {
            Some(saved) if saved.user_id == user_id => {
                tracing::info!(
                    path = %session_file.path().display(),
                    "found existing instagram state file"
                );
                saved
            }
            _ => {
                tracing::info!(
                    path = %session_file.path().display(),
                    "seeding instagram state file from configuration"
                );
                let fresh = SourceSession::new(user_id, access_token);
                session_file.save(&fresh)?;
                fresh
            }
        };

        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            session_file,
            session: Mutex::new(session),
            refresh_after,
        })
    }

    pub async fn session(&self) -> SourceSession {
        self.session.lock().await.clone()
    }

    /// Refresh the access token when it is older than the refresh threshold.
    pub async fn refresh_if_stale(&self) -> Result<bool> {
        let mut session = self.session.lock().await;
        let age = session.age(Utc::now()).to_std().unwrap_or_default();
        if age < self.refresh_after {
            return Ok(false);
        }

        let url = format!("{}/refresh_access_token", self.base);
        let resp = self
            .http
            .get(url)
            .query(&[
                ("grant_type", "ig_refresh_token"),
                ("access_token", session.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token refresh request failed: {e}")))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Auth(format!("token refresh read failed: {e}")))?;
        if !(200..300).contains(&status) {
            return Err(Error::Auth(format!(
                "token refresh failed: {status} {}",
                snippet(&body)
            )));
        }

        let refreshed: RefreshResponse = serde_json::from_str(&body)?;
        let next = SourceSession::new(session.user_id.clone(), refreshed.access_token);
        self.session_file.save(&next)?;
        *session = next;

        tracing::info!(expires_in = ?refreshed.expires_in, "instagram access token refreshed");
        Ok(true)
    }
}

#[async_trait]
impl StorySource for InstagramClient {
    async fn latest_story(&self) -> Result<Option<StoryRef>> {
        if let Err(e) = self.refresh_if_stale().await {
            tracing::warn!(error = %e, "could not refresh instagram token, using the current one");
        }

        let session = self.session().await;
        let url = format!("{}/{}/stories", self.base, session.user_id);
        let resp = self
            .http
            .get(url)
            .query(&[
                ("fields", STORY_FIELDS),
                ("access_token", session.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| Error::Fetch(format!("instagram request error: {e}")))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Fetch(format!("instagram read error: {e}")))?;

        parse_stories_response(status, &body)
    }
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct StoriesResponse {
    #[serde(default)]
    data: Vec<StoryItem>,
}

#[derive(Debug, Deserialize)]
struct StoryItem {
    id: String,
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    media_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphErrorBody {
    error: GraphError,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    #[serde(default)]
    message: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    code: Option<i64>,
}

/// Turn a stories API response into the newest story, if any.
fn parse_stories_response(status: u16, body: &str) -> Result<Option<StoryRef>> {
    let graph_error = serde_json::from_str::<GraphErrorBody>(body).ok();

    if let Some(GraphErrorBody { error }) = &graph_error {
        let oauth = error.code == Some(190) || error.kind.as_deref() == Some("OAuthException");
        if oauth || status == 401 || status == 403 {
            return Err(Error::Auth(format!("instagram rejected the session: {}", error.message)));
        }
        return Err(Error::Fetch(format!("instagram error {status}: {}", error.message)));
    }
    if status == 401 || status == 403 {
        return Err(Error::Auth(format!("instagram returned {status}")));
    }
    if !(200..300).contains(&status) {
        return Err(Error::Fetch(format!("instagram returned {status}: {}", snippet(body))));
    }

    let parsed: StoriesResponse = serde_json::from_str(body)
        .map_err(|e| Error::Fetch(format!("instagram json error: {e}")))?;
    let Some(item) = parsed.data.into_iter().next() else {
        return Ok(None);
    };
    let Some(url) = item.media_url.filter(|u| !u.trim().is_empty()) else {
        tracing::warn!(story_id = %item.id, "newest story has no media url");
        return Ok(None);
    };

    let story = StoryRef::new(item.id, url);
    Ok(Some(
        match item.media_type.as_deref().and_then(MediaKind::from_media_type) {
            Some(kind) => story.with_kind(kind),
            None => story,
        },
    ))
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Query, routing::get, Json, Router};
    use serde_json::json;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn newest_story_is_the_first_item() {
        let body = json!({
          "data": [
            { "id": "18001", "media_type": "VIDEO", "media_url": "https://cdn/x?sig=1", "timestamp": "2024-05-01T10:00:00+0000" },
            { "id": "18000", "media_type": "IMAGE", "media_url": "https://cdn/y.jpg" }
          ]
        })
        .to_string();

        let story = parse_stories_response(200, &body).unwrap().unwrap();
        assert_eq!(story.id.as_str(), "18001");
        assert_eq!(story.source_url, "https://cdn/x?sig=1");
        assert_eq!(story.kind, MediaKind::Video);
    }

    #[test]
    fn empty_feed_is_none() {
        assert_eq!(parse_stories_response(200, r#"{"data":[]}"#).unwrap(), None);
        assert_eq!(
            parse_stories_response(200, r#"{"data":[{"id":"1"}]}"#).unwrap(),
            None
        );
    }

    #[test]
    fn oauth_errors_are_auth_errors() {
        let body = json!({
          "error": { "message": "Error validating access token", "type": "OAuthException", "code": 190 }
        })
        .to_string();
        assert!(matches!(parse_stories_response(400, &body), Err(Error::Auth(_))));
        assert!(matches!(parse_stories_response(401, "nope"), Err(Error::Auth(_))));
    }

    #[test]
    fn other_failures_are_fetch_errors() {
        let body = json!({ "error": { "message": "Please retry", "type": "GraphMethodException", "code": 2 } })
            .to_string();
        assert!(matches!(parse_stories_response(500, &body), Err(Error::Fetch(_))));
        assert!(matches!(parse_stories_response(502, "<html>"), Err(Error::Fetch(_))));
        assert!(matches!(parse_stories_response(200, "not json"), Err(Error::Fetch(_))));
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn graph_api() -> Router {
        Router::new()
            .route(
                "/1784/stories",
                get(|Query(q): Query<HashMap<String, String>>| async move {
                    let url = format!("https://cdn/{}.jpg", q.get("access_token").cloned().unwrap_or_default());
                    Json(json!({ "data": [ { "id": "s1", "media_type": "IMAGE", "media_url": url } ] }))
                }),
            )
            .route(
                "/refresh_access_token",
                get(|| async { Json(json!({ "access_token": "fresh", "expires_in": 5183944 })) }),
            )
    }

    fn http() -> reqwest::Client {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn fetches_latest_story_with_current_token() {
        let base = serve(graph_api()).await;
        let dir = TempDir::new().unwrap();
        let file = SessionFile::new(dir.path().join("ig_state.json"));
        let client = InstagramClient::open(
            http(),
            &base,
            file.clone(),
            "1784",
            "seed",
            Duration::from_secs(3600),
        )
        .unwrap();

        let story = client.latest_story().await.unwrap().unwrap();
        assert_eq!(story.id.as_str(), "s1");
        assert_eq!(story.source_url, "https://cdn/seed.jpg");
        assert_eq!(file.load().unwrap().unwrap().access_token, "seed");
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_and_persisted() {
        let base = serve(graph_api()).await;
        let dir = TempDir::new().unwrap();
        let file = SessionFile::new(dir.path().join("ig_state.json"));
        let client =
            InstagramClient::open(http(), &base, file.clone(), "1784", "seed", Duration::ZERO)
                .unwrap();

        let story = client.latest_story().await.unwrap().unwrap();
        assert_eq!(story.source_url, "https://cdn/fresh.jpg");
        assert_eq!(file.load().unwrap().unwrap().access_token, "fresh");
    }

    #[tokio::test]
    async fn persisted_session_wins_over_configured_token() {
        let dir = TempDir::new().unwrap();
        let file = SessionFile::new(dir.path().join("ig_state.json"));
        file.save(&SourceSession::new("1784", "saved")).unwrap();

        let client = InstagramClient::open(
            http(),
            "http://127.0.0.1:9",
            file.clone(),
            "1784",
            "configured",
            Duration::from_secs(3600),
        )
        .unwrap();
        assert_eq!(client.session().await.access_token, "saved");

        // A different account reseeds the file.
        let other = InstagramClient::open(
            http(),
            "http://127.0.0.1:9",
            file.clone(),
            "9999",
            "configured",
            Duration::from_secs(3600),
        )
        .unwrap();
        assert_eq!(other.session().await.user_id, "9999");
        assert_eq!(file.load().unwrap().unwrap().access_token, "configured");
    }
}
