use async_trait::async_trait;

use crate::error::ChatStreamError;
use crate::types::{ActiveJob, HistoryMessage, Job, ModelConfig, PollResult};

/// Transport to the chat job backend.
///
/// `HttpChatBackend` is the production implementation; tests provide
/// scripted ones. Implementations map HTTP 401 to
/// `ChatStreamError::Unauthenticated`, 429 to `DailyLimitExceeded`, 503 on
/// submission to `ServerBusy`, and other failures to `Network`.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Create a generation job for `message`.
    async fn submit_job(
        &self,
        message: &str,
        model_config: Option<&ModelConfig>,
        session_id: Option<&str>,
    ) -> Result<Job, ChatStreamError>;

    /// Fetch events recorded after `last_id` for `job_id`.
    async fn poll_events(&self, job_id: &str, last_id: &str)
        -> Result<PollResult, ChatStreamError>;

    /// Fetch the persisted message history of a session, oldest first.
    async fn fetch_history(&self, session_id: &str)
        -> Result<Vec<HistoryMessage>, ChatStreamError>;

    /// List jobs the backend still considers in flight.
    async fn list_active_jobs(
        &self,
        session_id: Option<&str>,
    ) -> Result<Vec<ActiveJob>, ChatStreamError>;
}

/// Invoked when the backend rejects the caller's credentials.
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self, login_url: &str);
}

/// Default redirect that only records the event.
pub struct LogLoginRedirect;

impl LoginRedirect for LogLoginRedirect {
    fn redirect_to_login(&self, login_url: &str) {
        tracing::warn!(login_url = %login_url, "Session is not authenticated, redirecting to login");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::test_support::CountingRedirect;

    #[test]
    fn redirect_is_object_safe() {
        let counting = std::sync::Arc::new(CountingRedirect(AtomicUsize::new(0)));
        let redirect: std::sync::Arc<dyn LoginRedirect> = counting.clone();
        redirect.redirect_to_login("/login");
        LogLoginRedirect.redirect_to_login("/login");
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }
}
