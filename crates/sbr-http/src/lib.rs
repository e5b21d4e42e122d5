//! Inbound HTTP adapter (axum).
//!
//! - `GET /`         health check
//! - `GET /webhook`  subscription handshake
//! - `POST /webhook` story change notifications

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use sbr_core::{
    orchestrator::RepostOrchestrator,
    webhook::{dispatch_stories, extract_stories, verify_signature, verify_subscription, WebhookPayload},
};

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// State shared with the handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<RepostOrchestrator>,
    pub verify_token: Option<String>,
    pub app_secret: Option<String>,
    /// Background webhook dispatches; close and wait on it before exiting.
    pub tasks: TaskTracker,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/webhook", get(verify_webhook).post(handle_webhook))
        .with_state(state)
}

/// Serve until `cancel` fires.
pub async fn serve(port: u16, state: AppState, cancel: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "server is running");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("http server failed")?;
    Ok(())
}

async fn health() -> &'static str {
    "Server is running"
}

async fn verify_webhook(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let challenge = verify_subscription(
        state.verify_token.as_deref(),
        params.get("hub.mode").map(String::as_str),
        params.get("hub.verify_token").map(String::as_str),
        params.get("hub.challenge").map(String::as_str),
    );
    match challenge {
        Some(challenge) => (StatusCode::OK, challenge.to_string()).into_response(),
        None => {
            tracing::warn!("webhook subscription verification rejected");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

/// Acknowledge a notification and process its stories in the background.
///
/// Returns 200 whatever happens to the reposts; only a bad signature (when an
/// app secret is configured) is refused.
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(secret) = &state.app_secret {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, &body, header) {
            tracing::warn!("webhook signature mismatch, ignoring notification");
            return StatusCode::UNAUTHORIZED;
        }
    }

    let payload: WebhookPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(error = %e, "malformed webhook payload");
            return StatusCode::OK;
        }
    };

    let stories = extract_stories(&payload);
    if stories.is_empty() {
        tracing::debug!(object = ?payload.object, "webhook carried no story changes");
        return StatusCode::OK;
    }

    tracing::info!(count = stories.len(), "webhook received story changes");
    let orchestrator = state.orchestrator.clone();
    state.tasks.spawn(async move {
        dispatch_stories(&orchestrator, &stories).await;
    });

    StatusCode::OK
}
