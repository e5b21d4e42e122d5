//! Append-only audit trail of orchestration outcomes.

use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

use crate::{errors::Error, Result};

const AUDIT_MAX_TEXT: usize = 500;

#[derive(Clone, Debug, Serialize)]
pub struct AuditEvent {
    pub timestamp: String,
    pub event: String,
    pub trigger: String,
    pub story_id: String,
    pub source_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event: &str, trigger: &str, story_id: &str, source_url: &str) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            event: event.to_string(),
            trigger: trigger.to_string(),
            story_id: story_id.to_string(),
            source_url: source_url.to_string(),
            message_id: None,
            committed: None,
            error: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuditLogger {
    path: PathBuf,
    json: bool,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>, json: bool) -> Self {
        Self {
            path: path.into(),
            json,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, mut event: AuditEvent) -> Result<()> {
        event.source_url = truncate_text(&event.source_url, AUDIT_MAX_TEXT);
        if let Some(s) = &event.error {
            event.error = Some(truncate_text(s, AUDIT_MAX_TEXT));
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        if self.json {
            let line = serde_json::to_string(&event)?;
            writeln!(file, "{line}")?;
            return Ok(());
        }

        let mut out = String::new();
        out.push('\n');
        out.push_str(&"=".repeat(60));

        let value = serde_json::to_value(&event)?;
        let Some(obj) = value.as_object() else {
            return Err(Error::External(
                "audit event is not a JSON object".to_string(),
            ));
        };
        for (k, v) in obj {
            out.push('\n');
            out.push_str(k);
            out.push_str(": ");
            match v {
                serde_json::Value::String(s) => out.push_str(s),
                other => out.push_str(&other.to_string()),
            }
        }
        out.push('\n');

        file.write_all(out.as_bytes())?;
        Ok(())
    }
}

pub fn truncate_text(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut out = s.chars().take(max_len).collect::<String>();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn json_lines_are_appended() {
        let dir = TempDir::new().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), true);

        let mut posted = AuditEvent::new("posted", "poll", "s1", "https://x/img.jpg");
        posted.message_id = Some("42".to_string());
        log.write(posted).unwrap();
        log.write(AuditEvent::new("skipped_already_posted", "webhook", "s1", "https://x/img.jpg"))
            .unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message_id"], "42");
        assert_eq!(lines[1]["trigger"], "webhook");
        assert!(lines[1].get("error").is_none());
    }

    #[test]
    fn text_format_truncates_long_errors() {
        let dir = TempDir::new().unwrap();
        let log = AuditLogger::new(dir.path().join("audit.log"), false);

        let mut failed = AuditEvent::new("failed", "poll", "s2", "https://x/v.mp4");
        failed.error = Some("e".repeat(AUDIT_MAX_TEXT + 20));
        log.write(failed).unwrap();

        let written = std::fs::read_to_string(log.path()).unwrap();
        assert!(written.contains("event: failed"));
        assert!(written.contains("..."));
        assert!(!written.contains(&"e".repeat(AUDIT_MAX_TEXT + 1)));
    }
}
