//! Error types for pipeline construction, submission and configuration.
//!
//! Stage-level failures are not represented here: a stage reports them as a
//! [`StageError`](crate::worker::StageError), which the scheduler records as
//! a `Failed` task state rather than propagating to the caller.

use thiserror::Error;

use crate::task::TaskState;

/// Errors surfaced by the orchestration layer.
///
/// # Examples
///
/// ```
/// use taskchain::Error;
///
/// let err = Error::BuilderReused {
///     name: "img".to_string(),
/// };
/// assert!(err.to_string().contains("img"));
/// assert!(err.is_misuse());
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// A [`PipelineBuilder`](crate::pipeline::PipelineBuilder) was used after `submit`.
    #[error("pipeline builder for '{name}' was already submitted")]
    BuilderReused {
        /// Unique work name of the pipeline.
        name: String,
    },

    /// The pipeline graph violates a structural invariant.
    #[error("invalid pipeline '{name}': {reason}")]
    InvalidPipeline {
        /// Unique work name of the pipeline.
        name: String,
        /// What is wrong with the graph.
        reason: String,
    },

    /// A task state change that the state machine does not allow.
    #[error("invalid transition from {from} to {to} for task {task_id}")]
    InvalidTransition {
        /// The task being transitioned.
        task_id: String,
        /// Its current state.
        from: TaskState,
        /// The rejected target state.
        to: TaskState,
    },

    /// A [`Data`](crate::data::Data) payload exceeds the size limit.
    #[error("data payload of {actual_bytes} bytes exceeds {limit_bytes} byte limit")]
    DataTooLarge {
        /// The configured limit in bytes.
        limit_bytes: usize,
        /// The payload size in bytes.
        actual_bytes: usize,
    },

    /// No run is registered for the given run id.
    #[error("unknown run: {run_id}")]
    UnknownRun {
        /// The run id that was not found.
        run_id: String,
    },

    /// The scheduler rejected or failed an operation.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Configuration could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A payload could not be serialized.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Creates a [`Error::Scheduler`] from any message.
    pub fn scheduler(message: impl Into<String>) -> Self {
        Self::Scheduler(message.into())
    }

    /// Creates a [`Error::Config`] from any message.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns `true` for errors caused by programmer misuse of the API
    /// rather than by runtime conditions.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            Self::BuilderReused { .. } | Self::InvalidPipeline { .. } | Self::InvalidTransition { .. }
        )
    }
}
