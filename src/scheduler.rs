//! The boundary between pipeline construction and execution.
//!
//! A [`Scheduler`] owns everything that happens after submission: unique-name
//! bookkeeping, constraint gating, ordering, cancellation and the
//! observable [`WorkInfo`] records. This crate only defines the contract;
//! `taskchain-scheduler` provides an in-process implementation.

use std::collections::BTreeSet;
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

use crate::constraint::ConstraintKind;
use crate::data::Data;
use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, UniqueWorkPolicy};
use crate::task::{RunId, StageKind, TaskId, TaskState, WorkRequest, WorkerName};

/// Observable status of one task in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkInfo {
    /// The task.
    pub task_id: TaskId,
    /// The run the task belongs to.
    pub run_id: RunId,
    /// Unique work name of the run.
    pub name: String,
    /// Worker executing the task.
    pub worker: WorkerName,
    /// Stage kind.
    pub kind: StageKind,
    /// Current lifecycle state.
    pub state: TaskState,
    /// Output data; empty until the task succeeds.
    pub output: Data,
    /// Lookup tags.
    pub tags: BTreeSet<String>,
    /// Constraints currently keeping the task `Blocked`.
    pub blocked_by: Vec<ConstraintKind>,
    /// How many times the task entered `Running`.
    pub run_attempt: u32,
    /// Failure reason, if the task failed.
    pub error: Option<String>,
    /// Time of the last change.
    pub updated_at: DateTime<Utc>,
}

impl WorkInfo {
    /// The initial `Enqueued` record for `request` in `run_id`.
    pub fn enqueued(run_id: RunId, name: &str, request: &WorkRequest) -> Self {
        Self {
            task_id: request.id(),
            run_id,
            name: name.to_string(),
            worker: request.worker().clone(),
            kind: request.kind(),
            state: TaskState::Enqueued,
            output: Data::empty(),
            tags: request.tags().clone(),
            blocked_by: Vec::new(),
            run_attempt: 0,
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Returns `true` if the task carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Result of cancelling by name or run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// This many non-terminal tasks were cancelled.
    Cancelled(usize),
    /// Nothing was active.
    NothingToCancel,
}

/// What a scheduler returns for an accepted pipeline.
///
/// [`PipelineBuilder::submit`](crate::pipeline::PipelineBuilder::submit)
/// wraps it in a [`PipelineHandle`](crate::handle::PipelineHandle).
#[derive(Debug, Clone)]
pub struct RunSubmission {
    /// Unique work name.
    pub name: String,
    /// The run the handle observes. Under `Keep` with an active run, this is
    /// the existing run.
    pub run_id: RunId,
    /// Tasks of that run, in declaration order.
    pub task_ids: Vec<TaskId>,
    /// Live view of that run's tasks.
    pub updates: watch::Receiver<Vec<WorkInfo>>,
}

/// Executes pipelines.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Accepts a validated pipeline under its unique name.
    async fn submit(&self, pipeline: Pipeline, policy: UniqueWorkPolicy) -> Result<RunSubmission>;

    /// Cancels every non-terminal task of every run under `name`.
    async fn cancel_by_name(&self, name: &str) -> Result<CancelOutcome>;

    /// Cancels every non-terminal task of one run.
    async fn cancel_run(&self, run_id: RunId) -> Result<CancelOutcome>;

    /// Live view of every task carrying `tag`.
    fn query_by_tag(&self, tag: &str) -> WorkInfoStream;

    /// Live view of every task submitted under `name`.
    fn query_by_name(&self, name: &str) -> WorkInfoStream;

    /// Forgets terminal runs, returning how many task records were removed.
    async fn prune(&self) -> Result<usize>;
}

/// A live, replayable stream of [`WorkInfo`] snapshots.
///
/// The first item is the current snapshot; later items follow each change.
/// The stream never ends on its own: once the scheduler forgets the view,
/// the last snapshot has already been delivered and the stream goes idle.
/// Dropping the stream unsubscribes.
pub struct WorkInfoStream {
    rx: watch::Receiver<Vec<WorkInfo>>,
    inner: WatchStream<Vec<WorkInfo>>,
}

impl WorkInfoStream {
    /// Wraps a watch receiver.
    pub fn new(rx: watch::Receiver<Vec<WorkInfo>>) -> Self {
        Self {
            inner: WatchStream::new(rx.clone()),
            rx,
        }
    }

    /// The latest snapshot, without waiting.
    pub fn current(&self) -> Vec<WorkInfo> {
        self.rx.borrow().clone()
    }

    /// Waits until a snapshot satisfies `predicate`, returning it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scheduler`] if the view is dropped first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&[WorkInfo]) -> bool,
    ) -> Result<Vec<WorkInfo>> {
        let mut rx = self.rx.clone();
        let infos = rx
            .wait_for(|infos| predicate(infos))
            .await
            .map_err(|_| Error::scheduler("work info view closed"))?
            .clone();
        Ok(infos)
    }
}

impl std::fmt::Debug for WorkInfoStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkInfoStream")
            .field("current", &*self.rx.borrow())
            .finish_non_exhaustive()
    }
}

impl Stream for WorkInfoStream {
    type Item = Vec<WorkInfo>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            // A forgotten view idles until the caller drops the stream.
            Poll::Ready(None) => Poll::Pending,
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    fn info(state: TaskState) -> WorkInfo {
        let request = WorkRequest::builder(StageKind::Persist, "Save")
            .tag("output")
            .build();
        let mut info = WorkInfo::enqueued(RunId::new(), "work", &request);
        info.state = state;
        info
    }

    #[test]
    fn enqueued_record_copies_request() {
        let info = info(TaskState::Enqueued);
        assert!(info.has_tag("output"));
        assert!(info.has_tag("Save"));
        assert_eq!(info.run_attempt, 0);
        assert!(info.output.is_empty());
    }

    #[tokio::test]
    async fn stream_replays_current_then_follows_changes() {
        let (tx, rx) = watch::channel(vec![info(TaskState::Enqueued)]);
        let mut stream = WorkInfoStream::new(rx);

        let first = stream.next().await.unwrap();
        assert_eq!(first[0].state, TaskState::Enqueued);

        tx.send_replace(vec![info(TaskState::Running)]);
        let second = stream.next().await.unwrap();
        assert_eq!(second[0].state, TaskState::Running);
        assert_eq!(stream.current()[0].state, TaskState::Running);
    }

    #[tokio::test]
    async fn stream_idles_after_the_view_is_dropped() {
        let (tx, rx) = watch::channel(vec![info(TaskState::Running)]);
        let mut stream = WorkInfoStream::new(rx);
        assert_eq!(stream.next().await.unwrap()[0].state, TaskState::Running);

        tx.send_replace(vec![info(TaskState::Succeeded)]);
        drop(tx);
        assert_eq!(stream.next().await.unwrap()[0].state, TaskState::Succeeded);

        let idle = tokio::time::timeout(Duration::from_millis(20), stream.next()).await;
        assert!(idle.is_err());
        assert_eq!(stream.current()[0].state, TaskState::Succeeded);
    }

    #[tokio::test]
    async fn wait_for_resolves_on_matching_snapshot() {
        let (tx, rx) = watch::channel(vec![info(TaskState::Running)]);
        let stream = WorkInfoStream::new(rx);

        let waiter = tokio::spawn(async move {
            stream
                .wait_for(|infos| infos.iter().all(|i| i.state.is_terminal()))
                .await
        });
        tx.send_replace(vec![info(TaskState::Succeeded)]);

        let infos = waiter.await.unwrap().unwrap();
        assert_eq!(infos[0].state, TaskState::Succeeded);
    }

    #[tokio::test]
    async fn wait_for_errors_when_view_closes() {
        let (tx, rx) = watch::channel(vec![info(TaskState::Running)]);
        let stream = WorkInfoStream::new(rx);
        drop(tx);
        assert!(stream.wait_for(|_| false).await.is_err());
    }
}
