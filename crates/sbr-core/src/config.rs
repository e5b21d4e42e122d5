use std::{env, fs, path::PathBuf, time::Duration};

use crate::{errors::Error, Result};

/// Typed configuration for storybridge.
#[derive(Clone, Debug)]
pub struct Config {
    // Destination (Telegram)
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,

    // Source (Instagram)
    pub ig_user_id: String,
    pub ig_access_token: String,
    pub ig_graph_api_base: String,
    pub ig_state_file: PathBuf,
    pub ig_token_refresh_after: Duration,

    // HTTP surface
    pub port: u16,
    pub webhook_verify_token: Option<String>,
    pub app_secret: Option<String>,

    // Polling
    pub poll_enabled: bool,
    pub poll_interval: Duration,
    pub http_timeout: Duration,

    // Ledger + staging
    pub ledger_file: PathBuf,
    pub ledger_max_entries: Option<usize>,
    pub ledger_commit_attempts: u32,
    pub staging_dir: PathBuf,

    // Audit
    pub audit_log_path: Option<PathBuf>,
    pub audit_log_json: bool,
}

const REQUIRED: [&str; 4] = [
    "TELEGRAM_BOT_TOKEN",
    "TELEGRAM_CHAT_ID",
    "IG_USER_ID",
    "IG_ACCESS_TOKEN",
];

impl Config {
    /// Load from the process environment (plus an optional `.env` file).
    pub fn load() -> Result<Self> {
        // Existing variables win over `.env`.
        dotenv_outcome(dotenvy::dotenv())?;
        let cfg = Self::from_lookup(|key| env::var(key).ok())?;

        fs::create_dir_all(&cfg.staging_dir)?;
        Ok(cfg)
    }

    /// Build a config from an arbitrary key lookup. Does not touch the filesystem.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let missing: Vec<&str> = REQUIRED
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }
        let required = |key: &str| get(key).unwrap_or_default();

        let port = parse_or(get("PORT"), "PORT", 3000u16)?;
        let poll_enabled = get("POLL_ENABLED").map(|s| truthy(&s)).unwrap_or(true);
        let poll_interval = Duration::from_secs(parse_or(
            get("POLL_INTERVAL_SECS"),
            "POLL_INTERVAL_SECS",
            600u64,
        )?);
        if poll_enabled && poll_interval.is_zero() {
            return Err(Error::Config(
                "POLL_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        let http_timeout = Duration::from_millis(parse_or(
            get("HTTP_TIMEOUT_MS"),
            "HTTP_TIMEOUT_MS",
            30_000u64,
        )?);

        let refresh_days = parse_or(get("IG_TOKEN_REFRESH_DAYS"), "IG_TOKEN_REFRESH_DAYS", 7u64)?;
        let ledger_max_entries = match get("LEDGER_MAX_ENTRIES") {
            Some(v) => Some(parse_value::<usize>(&v, "LEDGER_MAX_ENTRIES")?).filter(|n| *n > 0),
            None => None,
        };
        let ledger_commit_attempts = parse_or(
            get("LEDGER_COMMIT_ATTEMPTS"),
            "LEDGER_COMMIT_ATTEMPTS",
            3u32,
        )?
        .max(1);

        let staging_dir = get("STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| env::temp_dir().join("storybridge"));

        Ok(Self {
            telegram_bot_token: required("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: required("TELEGRAM_CHAT_ID"),
            ig_user_id: required("IG_USER_ID"),
            ig_access_token: required("IG_ACCESS_TOKEN"),
            ig_graph_api_base: get("IG_GRAPH_API_BASE")
                .unwrap_or_else(|| "https://graph.instagram.com/v21.0".to_string())
                .trim_end_matches('/')
                .to_string(),
            ig_state_file: get("IG_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./ig_state.json")),
            ig_token_refresh_after: Duration::from_secs(refresh_days * 24 * 60 * 60),
            port,
            webhook_verify_token: get("WEBHOOK_VERIFY_TOKEN"),
            app_secret: get("META_APP_SECRET"),
            poll_enabled,
            poll_interval,
            http_timeout,
            ledger_file: get("LEDGER_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./posted_stories.json")),
            ledger_max_entries,
            ledger_commit_attempts,
            staging_dir,
            audit_log_path: get("AUDIT_LOG_PATH").map(PathBuf::from),
            audit_log_json: get("AUDIT_LOG_JSON").map(|s| truthy(&s)).unwrap_or(false),
        })
    }
}

fn truthy(s: &str) -> bool {
    matches!(
        s.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

fn parse_value<T: std::str::FromStr>(raw: &str, key: &str) -> Result<T> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
}

fn parse_or<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        Some(v) => parse_value(&v, key),
        None => Ok(default),
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// A missing `.env` is fine; an unreadable or malformed one is a config error.
fn dotenv_outcome(loaded: std::result::Result<PathBuf, dotenvy::Error>) -> Result<()> {
    match loaded {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "loaded .env");
            Ok(())
        }
        Err(e) if e.not_found() => Ok(()),
        Err(e) => Err(Error::Config(format!("failed to load .env: {e}"))),
    }
}
