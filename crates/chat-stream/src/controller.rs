//! Chat stream controller, one per chat view.
//!
//! Owns the `StreamState` for a chat view and guarantees that at most one
//! poll loop is live at a time. Starting a loop bumps the generation counter
//! and cancels the previous loop's token, which drops its in-flight request.
//! `disconnect()` only stops observation; the backend job keeps running.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::ChatStreamConfig;
use crate::error::ChatStreamError;
use crate::logging::{JobAction, JobActivity, JobActivityLogger};
use crate::poller::{EventPoller, LoopHandle};
use crate::recovery::FallbackRecoverer;
use crate::traits::{ChatBackend, LogLoginRedirect, LoginRedirect};
use crate::types::{ActiveJob, Job, ModelConfig, StreamOutcome, StreamState};

const NO_ACTIVE_LOOP: u64 = 0;

pub struct ChatStreamController {
    backend: Arc<dyn ChatBackend>,
    config: ChatStreamConfig,
    redirect: Arc<dyn LoginRedirect>,
    activity: Arc<JobActivityLogger>,
    recoverer: FallbackRecoverer,
    state: watch::Sender<StreamState>,
    generation: AtomicU64,
    /// Generation id of the loop currently running, or `NO_ACTIVE_LOOP`.
    active_generation: AtomicU64,
    cancel: Mutex<CancellationToken>,
    session_id: Mutex<Option<String>>,
}

impl ChatStreamController {
    pub fn new(backend: Arc<dyn ChatBackend>, config: ChatStreamConfig) -> Self {
        let (state, _) = watch::channel(StreamState::default());
        Self {
            recoverer: FallbackRecoverer::new(backend.clone()),
            backend,
            config,
            redirect: Arc::new(LogLoginRedirect),
            activity: Arc::new(JobActivityLogger::new(None)),
            state,
            generation: AtomicU64::new(0),
            active_generation: AtomicU64::new(NO_ACTIVE_LOOP),
            cancel: Mutex::new(CancellationToken::new()),
            session_id: Mutex::new(None),
        }
    }

    pub fn with_login_redirect(mut self, redirect: Arc<dyn LoginRedirect>) -> Self {
        self.redirect = redirect;
        self
    }

    pub fn with_activity_logger(mut self, logger: Arc<JobActivityLogger>) -> Self {
        self.activity = logger;
        self
    }

    pub fn config(&self) -> &ChatStreamConfig {
        &self.config
    }

    /// Receive every state update as it is applied.
    pub fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> StreamState {
        self.state.borrow().clone()
    }

    /// Whether a submission or poll loop is currently live.
    pub fn is_active(&self) -> bool {
        self.active_generation.load(Ordering::SeqCst) != NO_ACTIVE_LOOP
    }

    /// Session remembered from the last submission or resume.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    /// Submit `message` as a new job and stream its answer until it ends.
    ///
    /// A live loop is disconnected first, followed by the configured grace
    /// period so its aborted request can unwind.
    pub async fn send_message(
        &self,
        message: &str,
        model_config: Option<&ModelConfig>,
        session_id: Option<&str>,
    ) -> Result<StreamOutcome, ChatStreamError> {
        if self.is_active() {
            self.disconnect();
            tokio::time::sleep(self.config.resubmit_grace).await;
        }

        let started = Instant::now();
        let live = self.begin_generation();
        live.mutate(&self.state, |s| {
            *s = StreamState {
                is_streaming: true,
                ..StreamState::default()
            }
        });

        let submitted = tokio::select! {
            biased;
            _ = live.cancelled() => {
                return self.finish(&live, None, started, Ok(live.exit_outcome())).await;
            }
            r = self.backend.submit_job(message, model_config, session_id) => r,
        };

        let job = match submitted {
            Ok(job) => job,
            Err(ChatStreamError::Unauthenticated) => {
                self.redirect.redirect_to_login(&self.config.login_url);
                return self
                    .finish(&live, None, started, Ok(StreamOutcome::Redirected))
                    .await;
            }
            Err(e) => return self.finish(&live, None, started, Err(e)).await,
        };

        if live
            .mutate(&self.state, |s| s.current_job = Some(job.clone()))
            .is_none()
        {
            return self
                .finish(&live, Some(&job), started, Ok(live.exit_outcome()))
                .await;
        }
        *self.session_id.lock() = Some(job.session_id.clone());

        tracing::info!(job_id = %job.job_id, session_id = %job.session_id, "Chat job submitted");
        self.activity
            .log(&JobActivity::new(
                JobAction::Submitted,
                Some(&job.job_id),
                Some(&job.session_id),
            ))
            .await;

        let result = self
            .run_poller(&live, &job.job_id, Some(job.session_id.clone()))
            .await;
        self.finish(&live, Some(&job), started, result).await
    }

    /// `send_message`, resubmitting with exponential backoff while the
    /// backend reports it is busy.
    pub async fn send_message_with_retry(
        &self,
        message: &str,
        model_config: Option<&ModelConfig>,
        session_id: Option<&str>,
    ) -> Result<StreamOutcome, ChatStreamError> {
        let retry = &self.config.busy_retry;
        let mut attempt = 0u32;
        loop {
            match self.send_message(message, model_config, session_id).await {
                Err(e) if e.is_server_busy() && attempt + 1 < retry.max_attempts => {
                    // Token of the generation that just ended; `disconnect()`
                    // cancels it, a newer loop replaces it.
                    let cancel = self.cancel.lock().clone();
                    let delay = retry.backoff_for(attempt);
                    tracing::warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Server busy, retrying submission"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            tracing::info!("Disconnected during busy backoff, not resubmitting");
                            return Ok(StreamOutcome::Disconnected);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Start observing `job_id`, replacing any live loop.
    pub async fn poll_for_events(&self, job_id: &str) -> Result<StreamOutcome, ChatStreamError> {
        let started = Instant::now();
        let live = self.begin_generation();

        // The log is replayed from its start, so earlier text is discarded.
        let session_id = self.session_id();
        let job = session_id.clone().map(|session_id| Job {
            job_id: job_id.to_string(),
            session_id,
        });
        live.mutate(&self.state, |s| {
            *s = StreamState {
                is_streaming: true,
                current_job: job.clone(),
                ..StreamState::default()
            }
        });
        let result = self.run_poller(&live, job_id, session_id).await;
        self.finish(&live, job.as_ref(), started, result).await
    }

    /// Resume observing a previously submitted job, e.g. after a restart.
    ///
    /// No-op returning `AlreadyActive` while another loop is live, so repeated
    /// calls never attach duplicate observers to the same job.
    pub async fn resume_polling(
        &self,
        job_id: &str,
        session_id: Option<&str>,
    ) -> Result<StreamOutcome, ChatStreamError> {
        let started = Instant::now();
        let Some(live) = self.try_begin_generation() else {
            tracing::debug!(job_id = %job_id, "Poll loop already active, not resuming");
            return Ok(StreamOutcome::AlreadyActive);
        };

        if let Some(session_id) = session_id {
            *self.session_id.lock() = Some(session_id.to_string());
        }
        let session_id = self.session_id();
        let job = Job {
            job_id: job_id.to_string(),
            session_id: session_id.clone().unwrap_or_default(),
        };
        live.mutate(&self.state, |s| {
            *s = StreamState {
                is_streaming: true,
                current_job: Some(job.clone()),
                ..StreamState::default()
            }
        });

        tracing::info!(job_id = %job_id, "Resuming job observation");
        self.activity
            .log(&JobActivity::new(
                JobAction::Resumed,
                Some(job_id),
                session_id.as_deref(),
            ))
            .await;

        let result = self.run_poller(&live, job_id, session_id).await;
        self.finish(&live, Some(&job), started, result).await
    }

    /// Stop observing the current job. The backend keeps generating.
    pub fn disconnect(&self) {
        {
            let cancel = self.cancel.lock();
            cancel.cancel();
            self.active_generation
                .store(NO_ACTIVE_LOOP, Ordering::SeqCst);
        }
        self.state.send_if_modified(|s| {
            let was_streaming = s.is_streaming;
            s.is_streaming = false;
            was_streaming
        });
        tracing::info!("Disconnected from chat stream, background generation continues");
    }

    /// Disconnect and clear all state, as when the chat view goes away.
    pub fn reset(&self) {
        self.disconnect();
        self.state.send_replace(StreamState::default());
        *self.session_id.lock() = None;
    }

    /// Jobs the backend still runs, for picking one to resume.
    pub async fn active_jobs(
        &self,
        session_id: Option<&str>,
    ) -> Result<Vec<ActiveJob>, ChatStreamError> {
        let result = self.backend.list_active_jobs(session_id).await;
        if let Err(ChatStreamError::Unauthenticated) = result {
            self.redirect.redirect_to_login(&self.config.login_url);
        }
        result
    }

    /// Start a new generation, replacing whatever loop is live.
    fn begin_generation(&self) -> LoopHandle<'_> {
        let mut cancel = self.cancel.lock();
        self.claim_generation(&mut cancel)
    }

    /// Start a new generation only if no loop is live.
    fn try_begin_generation(&self) -> Option<LoopHandle<'_>> {
        let mut cancel = self.cancel.lock();
        if self.is_active() {
            return None;
        }
        Some(self.claim_generation(&mut cancel))
    }

    /// Cancel the previous token, install a fresh one and record the new
    /// loop as active. Callers hold the `cancel` lock.
    fn claim_generation(&self, cancel: &mut CancellationToken) -> LoopHandle<'_> {
        cancel.cancel();
        let token = CancellationToken::new();
        *cancel = token.clone();
        let id = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.active_generation.store(id, Ordering::SeqCst);
        LoopHandle::new(&self.generation, id, token)
    }

    async fn run_poller(
        &self,
        live: &LoopHandle<'_>,
        job_id: &str,
        session_id: Option<String>,
    ) -> Result<StreamOutcome, ChatStreamError> {
        let poller = EventPoller {
            backend: self.backend.as_ref(),
            config: &self.config,
            state: &self.state,
            live,
            recoverer: &self.recoverer,
            redirect: self.redirect.as_ref(),
            session_id,
        };
        poller.run(job_id).await
    }

    /// Close out a loop: release the active slot if this loop still holds it,
    /// publish the final state and record the outcome.
    async fn finish(
        &self,
        live: &LoopHandle<'_>,
        job: Option<&Job>,
        started: Instant,
        result: Result<StreamOutcome, ChatStreamError>,
    ) -> Result<StreamOutcome, ChatStreamError> {
        let _ = self.active_generation.compare_exchange(
            live.id(),
            NO_ACTIVE_LOOP,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );

        live.mutate(&self.state, |s| {
            s.is_streaming = false;
            if let Err(ref e) = result {
                if e.is_user_visible() {
                    s.error = Some(e.to_string());
                }
            }
        });

        let job_id = job.map(|j| j.job_id.as_str());
        let session_id = job.map(|j| j.session_id.as_str());
        let action = match result {
            Ok(StreamOutcome::Completed) => JobAction::Completed,
            Ok(StreamOutcome::Recovered) => JobAction::Recovered,
            Ok(StreamOutcome::Superseded) => JobAction::Superseded,
            Ok(StreamOutcome::Disconnected) => JobAction::Disconnected,
            Ok(StreamOutcome::AlreadyActive) => return result,
            Err(ChatStreamError::ServerBusy) => JobAction::Busy,
            Ok(StreamOutcome::Redirected) | Err(_) => JobAction::Failed,
        };

        let mut entry =
            JobActivity::new(action, job_id, session_id).with_duration(started.elapsed());
        match result {
            Err(ChatStreamError::ServerBusy) => {
                tracing::warn!("Submission rejected, server busy");
            }
            Err(ref e) => {
                tracing::error!(job_id = ?job_id, error = %e, "Chat stream failed");
                entry = entry.with_error(e.to_string());
            }
            Ok(StreamOutcome::Redirected) => {
                entry = entry.with_error(ChatStreamError::Unauthenticated.to_string());
            }
            Ok(outcome) => {
                tracing::info!(job_id = ?job_id, outcome = ?outcome, "Chat stream finished");
            }
        }
        self.activity.log(&entry).await;

        result
    }
}
