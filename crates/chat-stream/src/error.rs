use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ChatStreamError {
    #[error("not authenticated")]
    Unauthenticated,

    #[error("daily message limit reached ({limit} messages per day)")]
    DailyLimitExceeded {
        limit: u64,
        used: Option<u64>,
        remaining: Option<u64>,
    },

    #[error("server is busy, try again shortly")]
    ServerBusy,

    #[error("network error{}: {message}", status_suffix(.status))]
    Network {
        status: Option<u16>,
        message: String,
    },

    #[error("job failed: {0}")]
    JobFailed(String),

    #[error("request timed out")]
    Timeout,

    #[error("response parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl ChatStreamError {
    /// True for the recoverable 503 condition that callers should retry with backoff.
    pub fn is_server_busy(&self) -> bool {
        matches!(self, ChatStreamError::ServerBusy)
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ChatStreamError::Unauthenticated => Some(401),
            ChatStreamError::DailyLimitExceeded { .. } => Some(429),
            ChatStreamError::ServerBusy => Some(503),
            ChatStreamError::Network { status, .. } => *status,
            _ => None,
        }
    }

    /// Whether this error is written into `StreamState::error` for display.
    ///
    /// Busy and unauthenticated conditions are handled by the caller
    /// (retry, login redirect) and never shown as an in-widget error.
    pub fn is_user_visible(&self) -> bool {
        !matches!(
            self,
            ChatStreamError::ServerBusy | ChatStreamError::Unauthenticated
        )
    }

    pub(crate) fn network(status: Option<u16>, message: impl Into<String>) -> Self {
        ChatStreamError::Network {
            status,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_limit_message_mentions_limit() {
        let err = ChatStreamError::DailyLimitExceeded {
            limit: 5,
            used: Some(5),
            remaining: Some(0),
        };
        assert!(err.to_string().contains('5'));
        assert_eq!(err.status(), Some(429));
        assert!(err.is_user_visible());
    }

    #[test]
    fn server_busy_flag() {
        assert!(ChatStreamError::ServerBusy.is_server_busy());
        assert!(!ChatStreamError::Timeout.is_server_busy());
        assert!(!ChatStreamError::ServerBusy.is_user_visible());
    }

    #[test]
    fn network_error_display_includes_status() {
        let err = ChatStreamError::network(Some(502), "bad gateway");
        assert_eq!(err.to_string(), "network error (HTTP 502): bad gateway");

        let err = ChatStreamError::network(None, "connection refused");
        assert_eq!(err.to_string(), "network error: connection refused");
    }
}
