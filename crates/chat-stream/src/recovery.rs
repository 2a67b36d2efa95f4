//! Best-effort recovery of a finished answer from persisted history.
//!
//! Used when the event log reports a job as completed but never delivers its
//! final event. Failures are logged and reported as `None`; they never reach
//! the caller as errors.

use std::sync::Arc;

use crate::assembler::RecoveredMessage;
use crate::traits::ChatBackend;

pub struct FallbackRecoverer {
    backend: Arc<dyn ChatBackend>,
}

impl FallbackRecoverer {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Self {
        Self { backend }
    }

    pub async fn recover(&self, session_id: &str) -> Option<RecoveredMessage> {
        let history = match self.backend.fetch_history(session_id).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Fallback history fetch failed");
                return None;
            }
        };

        let recovered = RecoveredMessage::latest_from(&history);
        match recovered {
            Some(ref message) => tracing::info!(
                session_id = %session_id,
                chars = message.content.len(),
                "Recovered final answer from history"
            ),
            None => tracing::warn!(
                session_id = %session_id,
                messages = history.len(),
                "No assistant message found in history"
            ),
        }
        recovered
    }
}
