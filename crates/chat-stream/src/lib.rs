//! Chat job streaming client for Stockchat.
//!
//! Submitting a chat message creates a background job on the server. The job
//! appends its output to an event log that this crate polls with a cursor,
//! folding chunks into a live response until the job completes or fails.
//!
//! - `ChatStreamController` owns the visible state of one chat view and keeps
//!   at most one poll loop live, cancelling stale loops on every new start
//! - `ChatBackend` is the seam to the server; `HttpChatBackend` talks to the
//!   REST API with `reqwest`
//! - When a job finishes without delivering its final event, the answer is
//!   recovered from the session's persisted history

pub mod assembler;
pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod recovery;
pub mod traits;
pub mod types;

mod poller;

#[cfg(test)]
mod test_support;

// Re-export core types
pub use assembler::{Applied, RecoveredMessage, StreamAssembler};
pub use backend::HttpChatBackend;
pub use config::{BusyRetryConfig, ChatStreamConfig, ConfigError};
pub use controller::ChatStreamController;
pub use error::ChatStreamError;
pub use logging::{JobAction, JobActivity, JobActivityLogger};
pub use recovery::FallbackRecoverer;
pub use traits::{ChatBackend, LogLoginRedirect, LoginRedirect};
pub use types::{
    ActiveJob, CompleteMetadata, Cursor, Event, EventKind, HistoryMessage, Job, JobStatus,
    ModelConfig, PollResult, RateLimitInfo, StreamOutcome, StreamState, VisualizationData,
};
