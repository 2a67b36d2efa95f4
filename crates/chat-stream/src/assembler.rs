//! Folds job events into the visible response.
//!
//! Chunks are appended as they arrive so partial text shows immediately. A
//! `complete` event carrying `full_response` replaces everything accumulated
//! so far, which also repairs missed or duplicated chunks. Replacement makes
//! applying the same `complete` twice a no-op.

use crate::types::{EventKind, HistoryMessage, StreamState, VisualizationData};

/// What applying one event means for the surrounding poll loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Keep processing the batch.
    Continue,
    /// A `complete` event was consumed; stop the batch and the loop.
    Terminal,
    /// The backend reported a failure for this job.
    Failed(String),
}

/// Persisted answer fetched by the fallback path.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveredMessage {
    pub content: String,
    pub visualization: Option<VisualizationData>,
}

impl RecoveredMessage {
    /// Most recent non-empty assistant message of a history, if any.
    pub fn latest_from(history: &[HistoryMessage]) -> Option<Self> {
        let message = history.iter().rev().find(|m| m.is_assistant())?;
        if message.content.is_empty() {
            return None;
        }
        Some(Self {
            content: message.content.clone(),
            visualization: message.visualization.clone(),
        })
    }
}

pub struct StreamAssembler;

impl StreamAssembler {
    /// Apply one event to `state`. Mutates `state` only for `chunk` and
    /// `complete`.
    pub fn apply(state: &mut StreamState, event: &EventKind) -> Applied {
        match event {
            EventKind::Chunk { content } => {
                if let Some(text) = content {
                    state.response.push_str(text);
                }
                Applied::Continue
            }
            EventKind::Complete { full_response, .. } => {
                if let Some(full) = full_response {
                    state.response.clone_from(full);
                }
                if let Some(viz) = event.visualization() {
                    state.visualization = Some(viz.clone());
                }
                Applied::Terminal
            }
            EventKind::Error { error } => Applied::Failed(
                error
                    .clone()
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| "Job failed".to_string()),
            ),
            EventKind::Status { .. } | EventKind::Unknown => Applied::Continue,
        }
    }

    /// Replace the response with a recovered persisted answer.
    pub fn apply_recovered(state: &mut StreamState, recovered: &RecoveredMessage) {
        state.response.clone_from(&recovered.content);
        if let Some(ref viz) = recovered.visualization {
            state.visualization = Some(viz.clone());
        }
    }

    /// Fold a whole event sequence into a fresh `(response, visualization)`
    /// pair, stopping at the first terminal or failed event.
    pub fn assemble<'a>(
        events: impl IntoIterator<Item = &'a EventKind>,
    ) -> (String, Option<VisualizationData>) {
        let mut state = StreamState::default();
        for event in events {
            if Self::apply(&mut state, event) != Applied::Continue {
                break;
            }
        }
        (state.response, state.visualization)
    }
}
