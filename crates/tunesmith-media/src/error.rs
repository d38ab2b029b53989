//! Errors of the transform pipeline.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Which codec invocation of a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Re-encoding input `index` to the common format before concatenation.
    Normalize { index: usize },
    /// The job's own operation.
    Final,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Normalize { index } => write!(f, "normalize input #{index}"),
            Stage::Final => f.write_str("final pass"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransformError {
    /// Caller-supplied ranges or arguments were rejected before any codec
    /// call.
    #[error("invalid transform: {0}")]
    Validation(String),

    /// The codec exited non-zero, could not be started, or produced no
    /// output.
    #[error("codec failed at {stage} (exit status {status:?}): {stderr}")]
    Codec {
        stage: Stage,
        status: Option<i32>,
        stderr: String,
    },

    /// Scratch directory, promotion or other filesystem failure.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Duration metadata could not be read.
    #[error("failed to probe {}: {message}", .path.display())]
    Probe { path: PathBuf, message: String },

    /// The executor's worker loop has stopped.
    #[error("transform executor is not running")]
    ExecutorClosed,
}

impl TransformError {
    /// The stage a codec failure happened in.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            TransformError::Codec { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}
