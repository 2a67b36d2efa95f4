use std::cmp::Ordering;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Handle for one backend generation task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub session_id: String,
}

/// Structured chart/table payload attached to a completed answer.
///
/// The backend owns the schema; the client only carries it through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VisualizationData(pub serde_json::Value);

/// Extra fields a `complete` event may carry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompleteMetadata {
    #[serde(default)]
    pub visualization: Option<VisualizationData>,
}

/// One entry of a job's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event payload, discriminated by the wire `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Chunk {
        #[serde(default)]
        content: Option<String>,
    },
    Complete {
        #[serde(default)]
        full_response: Option<String>,
        #[serde(default)]
        visualization: Option<VisualizationData>,
        #[serde(default)]
        metadata: Option<CompleteMetadata>,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    Status {
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

impl EventKind {
    /// Visualization on a `complete` event, preferring the top-level field
    /// over `metadata.visualization`.
    pub fn visualization(&self) -> Option<&VisualizationData> {
        match self {
            EventKind::Complete {
                visualization,
                metadata,
                ..
            } => visualization
                .as_ref()
                .or_else(|| metadata.as_ref().and_then(|m| m.visualization.as_ref())),
            _ => None,
        }
    }
}

/// Backend view of a job's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Response to one poll of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollResult {
    #[serde(default)]
    pub events: Vec<Event>,
    pub last_id: String,
    pub status: JobStatus,
}

/// High-water mark into a job's event log.
///
/// Values are opaque to the backend contract but are compared after parsing
/// so a stale response can never move the cursor backwards. Plain decimal ids
/// and `millis-seq` stream ids are understood; anything else is taken as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(String);

impl Cursor {
    pub const START: &'static str = "0";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Move to `next` unless it parses strictly lower than the current value.
    /// Returns whether the cursor changed.
    pub fn advance(&mut self, next: &str) -> bool {
        if next.is_empty() || next == self.0 {
            return false;
        }
        if let (Some(current), Some(candidate)) = (parse_cursor(&self.0), parse_cursor(next)) {
            if candidate.cmp(&current) == Ordering::Less {
                return false;
            }
        }
        self.0 = next.to_string();
        true
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::new(Self::START)
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_cursor(value: &str) -> Option<(u64, u64)> {
    match value.split_once('-') {
        Some((ms, seq)) => Some((ms.parse().ok()?, seq.parse().ok()?)),
        None => Some((value.parse().ok()?, 0)),
    }
}

/// Opaque model selection forwarded to the backend with a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Body of `POST /chat/jobs`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest<'a> {
    pub message: &'a str,
    pub model_config: Option<&'a ModelConfig>,
    pub session_id: Option<&'a str>,
}

/// Rate-limit payload returned with HTTP 429.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    #[serde(default)]
    pub used: Option<u64>,
    pub limit: u64,
    #[serde(default)]
    pub remaining: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RateLimitBody {
    pub limit: RateLimitInfo,
}

/// One persisted message from the history endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub visualization: Option<VisualizationData>,
}

impl HistoryMessage {
    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryBody {
    pub data: HistoryData,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HistoryData {
    #[serde(default)]
    pub messages: Vec<HistoryMessage>,
}

/// A job the backend still considers in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveJob {
    pub job_id: String,
    pub session_id: String,
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ActiveJob {
    pub fn job(&self) -> Job {
        Job {
            job_id: self.job_id.clone(),
            session_id: self.session_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ActiveJobsBody {
    #[serde(default)]
    pub jobs: Vec<ActiveJob>,
}

/// Client-side view of the chat currently being streamed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamState {
    pub response: String,
    pub visualization: Option<VisualizationData>,
    pub is_streaming: bool,
    pub error: Option<String>,
    pub current_job: Option<Job>,
}

/// How a submission or poll loop ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// A `complete` event was consumed.
    Completed,
    /// The event stream was lost and the persisted answer was fetched instead.
    Recovered,
    /// A newer loop took over; nothing further was applied.
    Superseded,
    /// `disconnect()` stopped observation. The backend job keeps running.
    Disconnected,
    /// The backend rejected the credentials and the login redirect ran.
    Redirected,
    /// `resume_polling` found a loop already running.
    AlreadyActive,
}
