//! The stage execution contract.
//!
//! [`Worker::execute`] is the only logic a stage author writes. Everything a
//! worker reports crosses into the scheduler as a [`StageOutcome`]; a panic
//! inside a worker is caught by [`run_guarded`] and reported as a failure.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;

use crate::data::{Data, SchemaViolation};
use crate::task::WorkerName;

/// Why a stage did not produce an output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StageError {
    /// A required input key is missing or malformed. Not retryable.
    #[error("invalid input '{key}': {reason}")]
    InvalidInput {
        /// The offending key.
        key: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Reading or writing an artifact failed.
    #[error("artifact I/O failed: {0}")]
    TransientIo(String),

    /// The stage's own processing failed.
    #[error("transform failed: {0}")]
    Transform(String),

    /// The stage panicked; the panic was contained at the stage boundary.
    #[error("stage panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Returns `true` if retrying could succeed. Retry policy itself belongs
    /// to the scheduler.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo(_))
    }

    /// Wraps any I/O error.
    pub fn io(err: impl fmt::Display) -> Self {
        Self::TransientIo(err.to_string())
    }
}

impl From<SchemaViolation> for StageError {
    fn from(violation: SchemaViolation) -> Self {
        Self::InvalidInput {
            key: violation.key,
            reason: violation.reason,
        }
    }
}

/// A unit of stage logic.
///
/// Implementations must be `Send + Sync`: the scheduler shares one instance
/// across every task that names it.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Runs the stage against `input`, returning its output.
    async fn execute(&self, input: Data) -> Result<Data, StageError>;
}

/// The only signal that crosses from a stage into the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage produced `Data`.
    Success(Data),
    /// The stage failed.
    Failure(StageError),
}

impl StageOutcome {
    /// Returns `true` for [`StageOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Executes `worker`, containing panics.
///
/// # Examples
///
/// ```
/// use taskchain::{run_guarded, worker_fn, Data, StageOutcome};
///
/// # tokio_test_block(async {
/// let exploding = worker_fn(|input: Data| async move {
///     if input.is_empty() {
///         panic!("decoder blew up");
///     }
///     Ok(input)
/// });
///
/// let outcome = run_guarded(&exploding, Data::empty()).await;
/// assert!(matches!(outcome, StageOutcome::Failure(_)));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub async fn run_guarded(worker: &dyn Worker, input: Data) -> StageOutcome {
    match AssertUnwindSafe(worker.execute(input)).catch_unwind().await {
        Ok(Ok(output)) => StageOutcome::Success(output),
        Ok(Err(err)) => StageOutcome::Failure(err),
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, "stage panicked");
            StageOutcome::Failure(StageError::Panicked(message))
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// A [`Worker`] backed by an async closure.
pub struct FnWorker<F> {
    f: F,
}

impl<F> fmt::Debug for FnWorker<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnWorker").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Worker for FnWorker<F>
where
    F: Fn(Data) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Data, StageError>> + Send + 'static,
{
    async fn execute(&self, input: Data) -> Result<Data, StageError> {
        (self.f)(input).await
    }
}

/// Wraps an async closure as a [`Worker`].
///
/// # Examples
///
/// ```
/// use taskchain::{worker_fn, Data, StageError};
///
/// let echo = worker_fn(|input: Data| async move { Ok::<_, StageError>(input) });
/// # let _ = echo;
/// ```
pub fn worker_fn<F, Fut>(f: F) -> FnWorker<F>
where
    F: Fn(Data) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Data, StageError>> + Send + 'static,
{
    FnWorker { f }
}

/// Maps worker names to the shared worker instances that execute them.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use taskchain::{worker_fn, Data, StageError, WorkerName, WorkerRegistry};
///
/// let registry = WorkerRegistry::new().register(
///     "Echo",
///     Arc::new(worker_fn(|input: Data| async move { Ok::<_, StageError>(input) })),
/// );
/// assert!(registry.get(&WorkerName::new("Echo")).is_some());
/// assert!(registry.get(&WorkerName::new("Missing")).is_none());
/// ```
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerName, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `worker` under `name` (chainable).
    #[must_use]
    pub fn register(mut self, name: impl Into<WorkerName>, worker: Arc<dyn Worker>) -> Self {
        self.insert(name, worker);
        self
    }

    /// Registers `worker` under `name`, replacing any previous entry.
    pub fn insert(&mut self, name: impl Into<WorkerName>, worker: Arc<dyn Worker>) {
        self.workers.insert(name.into(), worker);
    }

    /// Looks up a worker.
    pub fn get(&self, name: &WorkerName) -> Option<Arc<dyn Worker>> {
        self.workers.get(name).cloned()
    }

    /// Returns `true` if `name` is registered.
    pub fn contains(&self, name: &WorkerName) -> bool {
        self.workers.contains_key(name)
    }

    /// Number of registered workers.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

impl fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.workers.keys().map(WorkerName::as_str).collect();
        names.sort_unstable();
        f.debug_struct("WorkerRegistry")
            .field("workers", &names)
            .finish()
    }
}
