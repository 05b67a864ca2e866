//! Error types for ironbatch.
//!
//! Every failure the pipeline can surface is a [`PipelineError`]. Worker
//! failures are captured where they happen, stored once, and handed back to
//! whoever is pulling batches.

use std::any::Any;
use thiserror::Error;

/// Primary error type for all pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ========== Construction ==========
    /// Invalid parameters (batch size, worker or buffer counts, padding ratios).
    #[error("invalid configuration: {0}")]
    Config(String),

    // ========== Workers ==========
    /// A user transform returned an error.
    #[error("transform failed in stage `{stage}`: {source:#}")]
    Transform {
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    /// A user transform panicked inside a worker.
    #[error("transform panicked in stage `{stage}`: {message}")]
    Panicked { stage: String, message: String },

    /// An item could not cross the process boundary.
    #[error("serialization failed in stage `{stage}`: {message}")]
    Serialization { stage: String, message: String },

    /// A worker process could not be started, died, or broke its pipe.
    #[error("worker {worker} of stage `{stage}` crashed: {message}")]
    WorkerCrashed {
        stage: String,
        worker: usize,
        message: String,
    },

    /// An item reaching a stage was not the type the stage was built for.
    #[error("stage `{stage}` expected items of type `{expected}`")]
    TypeMismatch {
        stage: String,
        expected: &'static str,
    },

    // ========== Batches ==========
    /// Arity or shape mismatch while combining, stacking, or padding.
    #[error("shape mismatch: {0}")]
    Shape(String),

    // ========== Lifecycle ==========
    /// Invalid lifecycle transition, or use of a closed pipeline.
    #[error("lifecycle error: {0}")]
    Lifecycle(String),
}

impl PipelineError {
    /// Wrap an error returned by user code running in `stage`.
    ///
    /// Errors that already are [`PipelineError`]s (for example a shape error
    /// raised by [`combine_pad`](crate::combine_pad) inside a combiner) keep
    /// their kind.
    pub(crate) fn from_user(stage: &str, err: anyhow::Error) -> Self {
        match err.downcast::<PipelineError>() {
            Ok(inner) => inner,
            Err(source) => PipelineError::Transform {
                stage: stage.to_string(),
                source,
            },
        }
    }

    pub(crate) fn from_panic(stage: &str, payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        PipelineError::Panicked {
            stage: stage.to_string(),
            message,
        }
    }

    /// Returns true if this error came out of a running worker rather than
    /// from construction or lifecycle misuse.
    pub fn is_worker_failure(&self) -> bool {
        matches!(
            self,
            PipelineError::Transform { .. }
                | PipelineError::Panicked { .. }
                | PipelineError::Serialization { .. }
                | PipelineError::WorkerCrashed { .. }
                | PipelineError::TypeMismatch { .. }
        )
    }

    /// Returns true for failures specific to the process boundary.
    pub fn is_cross_process(&self) -> bool {
        matches!(
            self,
            PipelineError::Serialization { .. } | PipelineError::WorkerCrashed { .. }
        )
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
