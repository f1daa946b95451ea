//! Errors raised while driving external tools.

use fuzzgate_core::FuzzgateError;

/// Errors from process execution and scheduling.
///
/// Only [`RunnerError::Spawn`] is retried; everything else is folded into a
/// gate result by the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {secs}s")]
    Timeout { program: String, secs: u64 },

    #[error("duplicate reward function name: {0}")]
    DuplicateRewardFunction(String),

    #[error("batch task failed: {0}")]
    Join(String),

    #[error(transparent)]
    Core(#[from] FuzzgateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Whether the failure happened before the child existed.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, RunnerError::Spawn { .. })
    }
}

/// Result type for fuzzgate-pipeline operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
