//! Job activity log.
//!
//! Writes one structured JSON entry per job lifecycle event through tracing
//! (target `job_activity`) and optionally appends it to a JSON-lines file.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Lifecycle event recorded for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Submitted,
    /// Submission turned away by a busy server; transient, not a failure.
    Busy,
    Resumed,
    Completed,
    Recovered,
    Failed,
    Superseded,
    Disconnected,
}

/// One activity log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobActivity {
    pub ts: DateTime<Utc>,
    pub job_id: Option<String>,
    pub session_id: Option<String>,
    pub action: JobAction,
    pub success: bool,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

impl JobActivity {
    pub fn new(action: JobAction, job_id: Option<&str>, session_id: Option<&str>) -> Self {
        Self {
            ts: Utc::now(),
            job_id: job_id.map(str::to_string),
            session_id: session_id.map(str::to_string),
            action,
            success: !matches!(action, JobAction::Failed),
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_duration(mut self, duration: std::time::Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

/// Activity logger that writes JSON lines to tracing and, optionally, a file.
pub struct JobActivityLogger {
    log_path: Option<PathBuf>,
    count: RwLock<u64>,
}

impl JobActivityLogger {
    /// Create a logger that writes to the given file path.
    /// If `None`, logs to tracing output only.
    pub fn new(log_path: Option<PathBuf>) -> Self {
        Self {
            log_path,
            count: RwLock::new(0),
        }
    }

    pub async fn log(&self, entry: &JobActivity) {
        let json = serde_json::to_string(entry).unwrap_or_else(|e| {
            format!(
                r#"{{"error":"serialization failed: {}","ts":"{}"}}"#,
                e,
                Utc::now().to_rfc3339()
            )
        });

        tracing::info!(target: "job_activity", "{}", json);

        if let Some(ref path) = self.log_path {
            if let Err(e) = append_log_line(path, &json).await {
                tracing::warn!("Failed to write job activity log: {}", e);
            }
        }

        *self.count.write().await += 1;
    }

    /// Total number of entries logged.
    pub async fn entry_count(&self) -> u64 {
        *self.count.read().await
    }
}

async fn append_log_line(path: &std::path::Path, line: &str) -> Result<(), std::io::Error> {
    use tokio::io::AsyncWriteExt;

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.write_all(b"\n").await?;
    Ok(())
}
