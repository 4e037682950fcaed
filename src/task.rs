//! Work requests and the per-task state machine.
//!
//! A [`WorkRequest`] is the smallest schedulable unit: which worker to run,
//! the input it starts with, the [`Constraints`] gating it and the tags it
//! can later be found by. It is immutable once built and owned by the
//! pipeline that contains it until submission.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::constraint::Constraints;
use crate::data::Data;
use crate::error::{Error, Result};

/// Lifecycle state of a single task.
///
/// Transitions are driven by the scheduler, never by the task itself.
///
/// # State Machine
///
/// ```text
/// Enqueued -> Blocked, Running, Failed, Cancelled
/// Blocked  -> Running, Failed, Cancelled
/// Running  -> Blocked, Succeeded, Failed, Cancelled
/// Succeeded, Failed, Cancelled -> (terminal, no transitions)
/// ```
///
/// `Blocked` and `Running` may alternate while a constraint flaps.
/// `Enqueued -> Failed` is the fail-fast edge used when an upstream stage
/// fails before this one started.
///
/// # Examples
///
/// ```
/// use taskchain::TaskState;
///
/// assert!(TaskState::Blocked.can_transition_to(&TaskState::Running));
/// assert!(TaskState::Running.can_transition_to(&TaskState::Blocked));
/// assert!(!TaskState::Enqueued.can_transition_to(&TaskState::Succeeded));
/// assert!(!TaskState::Cancelled.can_transition_to(&TaskState::Succeeded));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted by the scheduler, not yet considered for execution.
    Enqueued,
    /// Waiting for unmet constraints.
    Blocked,
    /// Executing.
    Running,
    /// Finished with an output (terminal).
    Succeeded,
    /// Finished without an output (terminal).
    Failed,
    /// Cancelled before it could finish (terminal).
    Cancelled,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enqueued => write!(f, "enqueued"),
            Self::Blocked => write!(f, "blocked"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl TaskState {
    /// All states, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Enqueued,
        Self::Blocked,
        Self::Running,
        Self::Succeeded,
        Self::Failed,
        Self::Cancelled,
    ];

    /// Returns `true` for `Succeeded`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    /// Returns `true` if moving from this state to `next` is allowed.
    ///
    /// Self-transitions are rejected.
    pub fn can_transition_to(&self, next: &Self) -> bool {
        if self == next {
            return false;
        }

        match self {
            Self::Enqueued => matches!(
                next,
                Self::Blocked | Self::Running | Self::Failed | Self::Cancelled
            ),
            Self::Blocked => matches!(next, Self::Running | Self::Failed | Self::Cancelled),
            Self::Running => matches!(
                next,
                Self::Blocked | Self::Succeeded | Self::Failed | Self::Cancelled
            ),
            Self::Succeeded | Self::Failed | Self::Cancelled => false,
        }
    }

    /// Validates a transition, naming the task in the error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTransition`] if the state machine rejects it.
    pub fn validate_transition(&self, task_id: &TaskId, next: &Self) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::InvalidTransition {
                task_id: task_id.to_string(),
                from: *self,
                to: *next,
            })
        }
    }
}

/// What a stage does within the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Prunes stale artifacts before the pipeline starts.
    Cleanup,
    /// Turns one artifact into another.
    Transform,
    /// Publishes the final artifact.
    Persist,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cleanup => write!(f, "cleanup"),
            Self::Transform => write!(f, "transform"),
            Self::Persist => write!(f, "persist"),
        }
    }
}

/// Unique identifier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of one submitted run of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry key selecting which worker executes a task.
///
/// Uses `Arc<str>` for O(1) cloning.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerName(Arc<str>);

impl WorkerName {
    /// Creates a worker name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WorkerName {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl Serialize for WorkerName {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for WorkerName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}

/// An immutable, schedulable unit of work.
///
/// The worker's name is always present among the tags, so every task can be
/// found by the kind of work it does.
///
/// # Examples
///
/// ```
/// use taskchain::{Constraints, Data, StageKind, WorkRequest};
///
/// let save = WorkRequest::builder(StageKind::Persist, "SaveImageToFileWorker")
///     .constraints(Constraints::none().with_requires_charging(true))
///     .tag("output")
///     .build();
///
/// assert!(save.has_tag("output"));
/// assert!(save.has_tag("SaveImageToFileWorker"));
/// assert!(save.constraints().requires_charging);
/// assert!(save.input().is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkRequest {
    id: TaskId,
    kind: StageKind,
    worker: WorkerName,
    input: Data,
    constraints: Constraints,
    tags: BTreeSet<String>,
}

impl WorkRequest {
    /// Starts building a request for `worker`.
    pub fn builder(kind: StageKind, worker: impl Into<WorkerName>) -> WorkRequestBuilder {
        WorkRequestBuilder {
            kind,
            worker: worker.into(),
            input: Data::empty(),
            constraints: Constraints::none(),
            tags: BTreeSet::new(),
        }
    }

    /// A request with no input, constraints or extra tags.
    pub fn from_worker(kind: StageKind, worker: impl Into<WorkerName>) -> Self {
        Self::builder(kind, worker).build()
    }

    /// Task id.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Stage kind.
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    /// Worker that executes this task.
    pub fn worker(&self) -> &WorkerName {
        &self.worker
    }

    /// Explicitly supplied input.
    pub fn input(&self) -> &Data {
        &self.input
    }

    /// Preconditions for running.
    pub fn constraints(&self) -> &Constraints {
        &self.constraints
    }

    /// Lookup tags, including the worker name.
    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    /// Returns `true` if the request carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Builder for [`WorkRequest`].
#[derive(Debug, Clone)]
pub struct WorkRequestBuilder {
    kind: StageKind,
    worker: WorkerName,
    input: Data,
    constraints: Constraints,
    tags: BTreeSet<String>,
}

impl WorkRequestBuilder {
    /// Sets the explicit input.
    #[must_use]
    pub fn input(mut self, input: Data) -> Self {
        self.input = input;
        self
    }

    /// Sets the constraints.
    #[must_use]
    pub fn constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Adds a lookup tag.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Finishes the request with a fresh [`TaskId`].
    pub fn build(self) -> WorkRequest {
        let mut tags = self.tags;
        tags.insert(self.worker.as_str().to_string());
        WorkRequest {
            id: TaskId::new(),
            kind: self.kind,
            worker: self.worker,
            input: self.input,
            constraints: self.constraints,
            tags,
        }
    }
}
