//! Event-log poll loop for a single job.
//!
//! One loop issues at most one request at a time, moves its cursor forward
//! from each response, and folds events into the shared `StreamState`. Every
//! suspension point re-checks the loop's `LoopHandle`; a loop whose
//! generation was replaced or whose token was cancelled exits without
//! touching state again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::assembler::{Applied, StreamAssembler};
use crate::config::ChatStreamConfig;
use crate::error::ChatStreamError;
use crate::recovery::FallbackRecoverer;
use crate::traits::{ChatBackend, LoginRedirect};
use crate::types::{Cursor, JobStatus, StreamOutcome, StreamState};

/// Liveness of one poll generation.
pub(crate) struct LoopHandle<'a> {
    counter: &'a AtomicU64,
    id: u64,
    token: CancellationToken,
}

impl<'a> LoopHandle<'a> {
    pub(crate) fn new(counter: &'a AtomicU64, id: u64, token: CancellationToken) -> Self {
        Self { counter, id, token }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.id
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.token.is_cancelled() && self.is_current()
    }

    pub(crate) async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Why a loop that is no longer live stopped.
    pub(crate) fn exit_outcome(&self) -> StreamOutcome {
        if self.is_current() {
            StreamOutcome::Disconnected
        } else {
            StreamOutcome::Superseded
        }
    }

    /// Apply `f` to the state only while this generation is live. The check
    /// runs under the state lock, so a replacing loop's reset always wins.
    pub(crate) fn mutate<R>(
        &self,
        state: &watch::Sender<StreamState>,
        f: impl FnOnce(&mut StreamState) -> R,
    ) -> Option<R> {
        let mut out = None;
        state.send_if_modified(|current| {
            if !self.is_live() {
                return false;
            }
            out = Some(f(current));
            true
        });
        out
    }
}

pub(crate) struct EventPoller<'a> {
    pub backend: &'a dyn ChatBackend,
    pub config: &'a ChatStreamConfig,
    pub state: &'a watch::Sender<StreamState>,
    pub live: &'a LoopHandle<'a>,
    pub recoverer: &'a FallbackRecoverer,
    pub redirect: &'a dyn LoginRedirect,
    pub session_id: Option<String>,
}

impl EventPoller<'_> {
    pub(crate) async fn run(&self, job_id: &str) -> Result<StreamOutcome, ChatStreamError> {
        let mut cursor = Cursor::default();
        let mut skip_delay = true;
        let mut empty_terminal_polls = 0u32;

        loop {
            if !skip_delay && !self.pause(self.config.poll_interval).await {
                return Ok(self.live.exit_outcome());
            }
            skip_delay = false;

            if !self.live.is_live() {
                return Ok(self.live.exit_outcome());
            }

            let response = tokio::select! {
                biased;
                _ = self.live.cancelled() => return Ok(self.live.exit_outcome()),
                r = tokio::time::timeout(
                    self.config.request_timeout,
                    self.backend.poll_events(job_id, cursor.as_str()),
                ) => r,
            };

            if !self.live.is_live() {
                return Ok(self.live.exit_outcome());
            }

            let poll = match response {
                Ok(Ok(poll)) => poll,
                Err(_) | Ok(Err(ChatStreamError::Timeout)) => {
                    tracing::warn!(job_id = %job_id, cursor = %cursor, "Poll request timed out, retrying");
                    continue;
                }
                Ok(Err(ChatStreamError::Unauthenticated)) => {
                    self.redirect.redirect_to_login(&self.config.login_url);
                    return Ok(StreamOutcome::Redirected);
                }
                Ok(Err(e)) => return Err(e),
            };

            cursor.advance(&poll.last_id);
            tracing::debug!(
                job_id = %job_id,
                events = poll.events.len(),
                status = %poll.status,
                cursor = %cursor,
                "Polled job events"
            );

            for event in &poll.events {
                match self
                    .live
                    .mutate(self.state, |s| StreamAssembler::apply(s, &event.kind))
                {
                    None => return Ok(self.live.exit_outcome()),
                    Some(Applied::Continue) => {}
                    Some(Applied::Terminal) => return Ok(StreamOutcome::Completed),
                    Some(Applied::Failed(message)) => {
                        return Err(ChatStreamError::JobFailed(message))
                    }
                }
            }

            if !poll.events.is_empty() {
                // Drain quickly while events keep arriving, including
                // leftovers behind a terminal status.
                empty_terminal_polls = 0;
                skip_delay = true;
                continue;
            }

            if poll.status.is_terminal() {
                // Terminal status can be visible before the final event is.
                empty_terminal_polls += 1;
                if empty_terminal_polls < self.config.max_empty_terminal_polls {
                    tracing::debug!(
                        job_id = %job_id,
                        attempt = empty_terminal_polls,
                        "Terminal status without events, polling again"
                    );
                    continue;
                }

                return match poll.status {
                    JobStatus::Failed => Err(ChatStreamError::JobFailed("Job failed".to_string())),
                    _ => Ok(self.recover(job_id).await),
                };
            }
        }
    }

    /// Sleep for `duration`; false when the loop was cancelled meanwhile.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.live.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    async fn recover(&self, job_id: &str) -> StreamOutcome {
        let Some(ref session_id) = self.session_id else {
            tracing::warn!(job_id = %job_id, "Event stream lost and no session id known, skipping recovery");
            return StreamOutcome::Completed;
        };

        tracing::info!(job_id = %job_id, session_id = %session_id, "Event stream lost, recovering from history");
        let recovered = tokio::select! {
            biased;
            _ = self.live.cancelled() => return self.live.exit_outcome(),
            r = self.recoverer.recover(session_id) => r,
        };

        match recovered {
            Some(message) => match self
                .live
                .mutate(self.state, |s| StreamAssembler::apply_recovered(s, &message))
            {
                Some(()) => StreamOutcome::Recovered,
                None => self.live.exit_outcome(),
            },
            None => StreamOutcome::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::test_support::*;
    use crate::traits::LogLoginRedirect;
    use crate::types::{Event, EventKind};

    async fn run_poller(
        backend: Arc<ScriptedBackend>,
        config: ChatStreamConfig,
        job_id: &str,
    ) -> (Result<StreamOutcome, ChatStreamError>, StreamState) {
        let (state, _) = watch::channel(StreamState::default());
        let counter = AtomicU64::new(1);
        let live = LoopHandle::new(&counter, 1, CancellationToken::new());
        let recoverer = FallbackRecoverer::new(backend.clone());
        let poller = EventPoller {
            backend: backend.as_ref(),
            config: &config,
            state: &state,
            live: &live,
            recoverer: &recoverer,
            redirect: &LogLoginRedirect,
            session_id: Some("s-1".to_string()),
        };
        let result = tokio::time::timeout(Duration::from_secs(5), poller.run(job_id))
            .await
            .expect("poller did not finish");
        let snapshot = state.borrow().clone();
        (result, snapshot)
    }

    #[tokio::test]
    async fn cursor_follows_last_id_and_never_regresses() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("j", poll(vec![chunk("5", "Nvidia ")], "5", JobStatus::Processing))
                .respond("j", poll(vec![], "3", JobStatus::Processing))
                .respond("j", poll(vec![chunk("7", "rallied")], "7", JobStatus::Processing))
                .respond("j", poll(vec![complete("8", "Nvidia rallied.")], "8", JobStatus::Completed)),
        );
        let (result, state) = run_poller(backend.clone(), fast_config(), "j").await;
        assert_eq!(result.unwrap(), StreamOutcome::Completed);
        assert_eq!(backend.cursors("j"), vec!["0", "5", "5", "7"]);
        assert_eq!(state.response, "Nvidia rallied.");
    }

    #[tokio::test]
    async fn chunks_accumulate_across_polls() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("j", poll(vec![chunk("1", "A"), chunk("2", "B")], "2", JobStatus::Processing))
                .respond("j", poll(vec![chunk("3", "C")], "3", JobStatus::Processing))
                .respond(
                    "j",
                    poll(
                        vec![Event {
                            id: "4".to_string(),
                            kind: EventKind::Complete {
                                full_response: None,
                                visualization: None,
                                metadata: None,
                            },
                        }],
                        "4",
                        JobStatus::Completed,
                    ),
                ),
        );
        let (result, state) = run_poller(backend, fast_config(), "j").await;
        assert_eq!(result.unwrap(), StreamOutcome::Completed);
        assert_eq!(state.response, "ABC");
    }

    #[tokio::test]
    async fn leftover_events_after_terminal_status_are_drained() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("j", poll(vec![chunk("1", "par")], "1", JobStatus::Completed))
                .respond("j", poll(vec![chunk("2", "tial"), complete("3", "partial!")], "3", JobStatus::Completed)),
        );
        let (result, state) = run_poller(backend.clone(), fast_config(), "j").await;
        assert_eq!(result.unwrap(), StreamOutcome::Completed);
        assert_eq!(state.response, "partial!");
        assert_eq!(backend.history_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_terminal_polls_fall_back_to_history() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("j", poll(vec![], "0", JobStatus::Completed))
                .respond("j", poll(vec![], "0", JobStatus::Completed))
                .respond("j", poll(vec![], "0", JobStatus::Completed))
                .on_history(Ok(vec![assistant("final answer")])),
        );
        let (result, state) = run_poller(backend.clone(), fast_config(), "j").await;
        assert_eq!(result.unwrap(), StreamOutcome::Recovered);
        assert_eq!(state.response, "final answer");
        assert!(state.error.is_none());
        assert_eq!(backend.poll_count("j"), 3);
    }

    #[tokio::test]
    async fn empty_terminal_event_arriving_late_is_used() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("j", poll(vec![], "4", JobStatus::Completed))
                .respond("j", poll(vec![complete("5", "late but here")], "5", JobStatus::Completed)),
        );
        let (result, state) = run_poller(backend.clone(), fast_config(), "j").await;
        assert_eq!(result.unwrap(), StreamOutcome::Completed);
        assert_eq!(state.response, "late but here");
        assert_eq!(backend.history_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_fallback_keeps_partial_text() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("j", poll(vec![chunk("1", "half an ans")], "1", JobStatus::Processing))
                .respond("j", poll(vec![], "1", JobStatus::Completed))
                .respond("j", poll(vec![], "1", JobStatus::Completed))
                .respond("j", poll(vec![], "1", JobStatus::Completed))
                .on_history(Err(ChatStreamError::network(Some(500), "db down"))),
        );
        let (result, state) = run_poller(backend, fast_config(), "j").await;
        assert_eq!(result.unwrap(), StreamOutcome::Completed);
        assert_eq!(state.response, "half an ans");
    }

    #[tokio::test]
    async fn empty_failed_polls_give_up_with_error() {
        let mut config = fast_config();
        config.max_empty_terminal_polls = 2;
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("j", poll(vec![], "0", JobStatus::Failed))
                .respond("j", poll(vec![], "0", JobStatus::Failed)),
        );
        let (result, _) = run_poller(backend.clone(), config, "j").await;
        assert!(matches!(result, Err(ChatStreamError::JobFailed(_))));
        assert_eq!(backend.poll_count("j"), 2);
    }

    #[tokio::test]
    async fn error_event_is_not_retried() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("j", poll(vec![chunk("1", "x"), failure("2", "model overloaded")], "2", JobStatus::Failed)),
        );
        let (result, _) = run_poller(backend.clone(), fast_config(), "j").await;
        match result {
            Err(ChatStreamError::JobFailed(message)) => assert_eq!(message, "model overloaded"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(backend.poll_count("j"), 1);
    }

    #[tokio::test]
    async fn timed_out_request_is_retried() {
        let mut config = fast_config();
        config.request_timeout = Duration::from_millis(50);
        let backend = Arc::new(
            ScriptedBackend::new()
                .on_poll(
                    "j",
                    PollStep::Delayed(
                        Duration::from_millis(500),
                        Ok(poll(vec![chunk("1", "too late")], "1", JobStatus::Processing)),
                    ),
                )
                .respond("j", poll(vec![complete("2", "on time")], "2", JobStatus::Completed)),
        );
        let (result, state) = run_poller(backend.clone(), config, "j").await;
        assert_eq!(result.unwrap(), StreamOutcome::Completed);
        assert_eq!(state.response, "on time");
        assert_eq!(backend.cursors("j"), vec!["0", "0"]);
    }

    #[tokio::test]
    async fn backend_timeout_error_is_transient() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .on_poll("j", PollStep::Respond(Err(ChatStreamError::Timeout)))
                .respond("j", poll(vec![complete("1", "ok")], "1", JobStatus::Completed)),
        );
        let (result, _) = run_poller(backend, fast_config(), "j").await;
        assert_eq!(result.unwrap(), StreamOutcome::Completed);
    }

    #[tokio::test]
    async fn other_poll_errors_propagate() {
        let backend = Arc::new(ScriptedBackend::new().on_poll(
            "j",
            PollStep::Respond(Err(ChatStreamError::network(Some(502), "bad gateway"))),
        ));
        let (result, _) = run_poller(backend, fast_config(), "j").await;
        assert_eq!(result.unwrap_err().status(), Some(502));
    }

    #[test]
    fn stale_handle_cannot_mutate() {
        let (state, _) = watch::channel(StreamState::default());
        let counter = AtomicU64::new(1);
        let live = LoopHandle::new(&counter, 1, CancellationToken::new());
        assert_eq!(live.mutate(&state, |s| s.response.push('a')), Some(()));

        counter.store(2, Ordering::SeqCst);
        assert!(live.mutate(&state, |s| s.response.push('b')).is_none());
        assert_eq!(live.exit_outcome(), StreamOutcome::Superseded);
        assert_eq!(state.borrow().response, "a");
    }

    #[test]
    fn cancelled_handle_reports_disconnect() {
        let (state, _) = watch::channel(StreamState::default());
        let counter = AtomicU64::new(1);
        let token = CancellationToken::new();
        let live = LoopHandle::new(&counter, 1, token.clone());
        token.cancel();
        assert!(live.mutate(&state, |s| s.is_streaming = true).is_none());
        assert_eq!(live.exit_outcome(), StreamOutcome::Disconnected);
    }
}
