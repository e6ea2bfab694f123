//! Fatal pipeline errors.
//!
//! Everything in the crate returns `anyhow::Result`; the conditions that stop
//! a job are raised as a [`PipelineError`] inside the `anyhow::Error`, so
//! callers can recover the kind with `err.downcast_ref::<PipelineError>()`.
//! Non-fatal conditions (late data, expired unmatched entries) are counters in
//! [`JobMetrics`](crate::metrics::JobMetrics), not errors.

use crate::types::CheckpointId;

/// Errors that stop (or prevent the start of) a job.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Invalid configuration or schema, detected before any event is processed.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A record could not be written after exhausting the retry budget.
    #[error("sink write failed for {key} after {attempts} attempts: {reason}")]
    SinkWriteFailure {
        /// Window key of the record that could not be persisted.
        key: String,
        attempts: u32,
        reason: String,
    },

    /// A checkpoint did not complete.
    #[error("checkpoint {checkpoint_id} failed: {reason}")]
    CheckpointFailure {
        checkpoint_id: CheckpointId,
        reason: String,
    },

    /// No valid snapshot could be restored.
    #[error("recovery failed: {0}")]
    RecoveryFailure(String),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
