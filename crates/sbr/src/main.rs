use std::{sync::Arc, time::Duration};

use tokio_util::{sync::CancellationToken, task::TaskTracker};

use sbr_core::{
    audit::AuditLogger,
    config::Config,
    ledger::JsonFileLedger,
    orchestrator::RepostOrchestrator,
    poller::StoryPoller,
    ports::StoryPublisher,
    relay::{build_http_client, MediaRelay},
    session::SessionFile,
};
use sbr_http::AppState;
use sbr_instagram::InstagramClient;
use sbr_telegram::TelegramPublisher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sbr_core::logging::init("sbr")?;

    let cfg = match Config::load() {
        Ok(cfg) => Arc::new(cfg),
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    let http = build_http_client(cfg.http_timeout)?;

    let source = Arc::new(InstagramClient::open(
        http.clone(),
        cfg.ig_graph_api_base.clone(),
        SessionFile::new(&cfg.ig_state_file),
        &cfg.ig_user_id,
        &cfg.ig_access_token,
        cfg.ig_token_refresh_after,
    )?);
    let publisher: Arc<dyn StoryPublisher> = Arc::new(TelegramPublisher::from_token(
        &cfg.telegram_bot_token,
        &cfg.telegram_chat_id,
        cfg.http_timeout,
    )?);

    let ledger = Arc::new(JsonFileLedger::load(&cfg.ledger_file, cfg.ledger_max_entries).await?);
    let relay = Arc::new(MediaRelay::new(http, &cfg.staging_dir, publisher.clone()));

    let mut orchestrator = RepostOrchestrator::new(ledger, publisher, relay)
        .with_commit_policy(cfg.ledger_commit_attempts, Duration::from_millis(250));
    if let Some(path) = &cfg.audit_log_path {
        orchestrator = orchestrator.with_audit(AuditLogger::new(path, cfg.audit_log_json));
    }
    let orchestrator = Arc::new(orchestrator);

    let cancel = CancellationToken::new();

    let poller = if cfg.poll_enabled {
        let poller = StoryPoller::new(source, orchestrator.clone(), cfg.poll_interval);
        let cancel = cancel.clone();
        Some(tokio::spawn(async move { poller.run(cancel).await }))
    } else {
        tracing::info!("polling disabled, relying on webhook notifications");
        None
    };

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("shutdown requested");
                    cancel.cancel();
                }
                Err(e) => tracing::warn!(error = %e, "cannot listen for ctrl-c"),
            }
        });
    }

    let tasks = TaskTracker::new();
    let state = AppState {
        orchestrator,
        verify_token: cfg.webhook_verify_token.clone(),
        app_secret: cfg.app_secret.clone(),
        tasks: tasks.clone(),
    };
    let served = sbr_http::serve(cfg.port, state, cancel.clone()).await;

    cancel.cancel();
    if let Some(handle) = poller {
        let _ = handle.await;
    }
    tasks.close();
    if !tasks.is_empty() {
        tracing::info!(pending = tasks.len(), "waiting for webhook reposts to finish");
    }
    tasks.wait().await;

    served
}
