//! Run-level errors of the scoring pipeline.

use thiserror::Error;

use crate::PartitionKey;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a pipeline run is already in progress")]
    RunInProgress,

    #[error("failed to read pipeline inputs: {0}")]
    Source(#[from] sqlx::Error),

    #[error("pipeline run exceeded its {secs}s timeout; nothing was written")]
    Timeout { secs: u64 },

    #[error("scoring worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("score sink rejected {} records after {attempts} attempts: {last_error}", .keys.len())]
    SinkWrite {
        attempts: u32,
        keys: Vec<PartitionKey>,
        last_error: String,
    },
}

impl PipelineError {
    /// Partitions whose scores were not persisted because of this error.
    pub fn unwritten_keys(&self) -> &[PartitionKey] {
        match self {
            Self::SinkWrite { keys, .. } => keys,
            _ => &[],
        }
    }
}
