//! Scripted backend shared by the poller and controller tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::config::ChatStreamConfig;
use crate::error::ChatStreamError;
use crate::traits::{ChatBackend, LoginRedirect};
use crate::types::{
    ActiveJob, Event, EventKind, HistoryMessage, Job, JobStatus, ModelConfig, PollResult,
};

pub(crate) enum PollStep {
    Respond(Result<PollResult, ChatStreamError>),
    Delayed(Duration, Result<PollResult, ChatStreamError>),
}

/// Backend that replays per-job scripts. A job whose script is exhausted
/// never answers, like a request stuck on the network.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    submits: Mutex<VecDeque<Result<Job, ChatStreamError>>>,
    polls: Mutex<HashMap<String, VecDeque<PollStep>>>,
    history: Mutex<Option<Result<Vec<HistoryMessage>, ChatStreamError>>>,
    requests: Mutex<Vec<(String, String)>>,
    pub submit_calls: AtomicUsize,
    pub history_calls: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_submit(self, result: Result<Job, ChatStreamError>) -> Self {
        self.submits.lock().push_back(result);
        self
    }

    pub fn on_poll(self, job_id: &str, step: PollStep) -> Self {
        self.polls
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .push_back(step);
        self
    }

    pub fn respond(self, job_id: &str, poll: PollResult) -> Self {
        self.on_poll(job_id, PollStep::Respond(Ok(poll)))
    }

    pub fn on_history(self, result: Result<Vec<HistoryMessage>, ChatStreamError>) -> Self {
        *self.history.lock() = Some(result);
        self
    }

    /// Cursors sent for `job_id`, in request order.
    pub fn cursors(&self, job_id: &str) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter(|(job, _)| job == job_id)
            .map(|(_, cursor)| cursor.clone())
            .collect()
    }

    pub fn poll_count(&self, job_id: &str) -> usize {
        self.cursors(job_id).len()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    async fn submit_job(
        &self,
        _message: &str,
        _model_config: Option<&ModelConfig>,
        _session_id: Option<&str>,
    ) -> Result<Job, ChatStreamError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.submits.lock().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn poll_events(
        &self,
        job_id: &str,
        last_id: &str,
    ) -> Result<PollResult, ChatStreamError> {
        self.requests
            .lock()
            .push((job_id.to_string(), last_id.to_string()));
        let step = self
            .polls
            .lock()
            .get_mut(job_id)
            .and_then(|steps| steps.pop_front());
        match step {
            Some(PollStep::Respond(result)) => result,
            Some(PollStep::Delayed(delay, result)) => {
                tokio::time::sleep(delay).await;
                result
            }
            None => std::future::pending().await,
        }
    }

    async fn fetch_history(
        &self,
        _session_id: &str,
    ) -> Result<Vec<HistoryMessage>, ChatStreamError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        self.history
            .lock()
            .clone()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn list_active_jobs(
        &self,
        _session_id: Option<&str>,
    ) -> Result<Vec<ActiveJob>, ChatStreamError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub(crate) struct CountingRedirect(pub AtomicUsize);

impl LoginRedirect for CountingRedirect {
    fn redirect_to_login(&self, _login_url: &str) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) fn fast_config() -> ChatStreamConfig {
    let mut config = ChatStreamConfig::with_base_url("http://localhost:0");
    config.poll_interval = Duration::from_millis(5);
    config.request_timeout = Duration::from_secs(2);
    config.resubmit_grace = Duration::from_millis(5);
    config.busy_retry.initial_backoff = Duration::from_millis(1);
    config
}

pub(crate) fn job(job_id: &str, session_id: &str) -> Job {
    Job {
        job_id: job_id.to_string(),
        session_id: session_id.to_string(),
    }
}

pub(crate) fn poll(events: Vec<Event>, last_id: &str, status: JobStatus) -> PollResult {
    PollResult {
        events,
        last_id: last_id.to_string(),
        status,
    }
}

pub(crate) fn chunk(id: &str, text: &str) -> Event {
    Event {
        id: id.to_string(),
        kind: EventKind::Chunk {
            content: Some(text.to_string()),
        },
    }
}

pub(crate) fn complete(id: &str, full: &str) -> Event {
    Event {
        id: id.to_string(),
        kind: EventKind::Complete {
            full_response: Some(full.to_string()),
            visualization: None,
            metadata: None,
        },
    }
}

pub(crate) fn failure(id: &str, message: &str) -> Event {
    Event {
        id: id.to_string(),
        kind: EventKind::Error {
            error: Some(message.to_string()),
        },
    }
}

pub(crate) fn assistant(content: &str) -> HistoryMessage {
    HistoryMessage {
        role: "assistant".to_string(),
        content: content.to_string(),
        visualization: None,
    }
}
