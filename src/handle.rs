//! Handle on one submitted run.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::Result;
use crate::scheduler::{CancelOutcome, RunSubmission, Scheduler, WorkInfo, WorkInfoStream};
use crate::task::{RunId, TaskId, TaskState};

/// Aggregate state of a run, derived from its tasks.
///
/// A run is terminal only once every task is. It is then `Failed` if any
/// task failed, `Cancelled` if any was cancelled, and `Succeeded` otherwise.
/// While tasks are still live, `Running` beats `Blocked` beats `Enqueued`.
///
/// # Examples
///
/// ```
/// use taskchain::{RunState, TaskState};
///
/// let states = [TaskState::Succeeded, TaskState::Failed, TaskState::Failed];
/// assert_eq!(RunState::from_states(states), RunState::Failed);
///
/// let states = [TaskState::Succeeded, TaskState::Blocked];
/// assert_eq!(RunState::from_states(states), RunState::Blocked);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// No task has started.
    Enqueued,
    /// No task is running and at least one waits on constraints.
    Blocked,
    /// At least one task is running.
    Running,
    /// Every task succeeded.
    Succeeded,
    /// Every task is terminal and at least one failed.
    Failed,
    /// Every task is terminal, none failed and at least one was cancelled.
    Cancelled,
}

impl RunState {
    /// Aggregates task states.
    pub fn from_states(states: impl IntoIterator<Item = TaskState>) -> Self {
        let mut all_terminal = true;
        let (mut failed, mut cancelled, mut running, mut blocked) = (false, false, false, false);
        let mut any = false;
        for state in states {
            any = true;
            all_terminal &= state.is_terminal();
            match state {
                TaskState::Failed => failed = true,
                TaskState::Cancelled => cancelled = true,
                TaskState::Running => running = true,
                TaskState::Blocked => blocked = true,
                TaskState::Enqueued | TaskState::Succeeded => {},
            }
        }

        if !any {
            return Self::Enqueued;
        }
        if all_terminal {
            if failed {
                Self::Failed
            } else if cancelled {
                Self::Cancelled
            } else {
                Self::Succeeded
            }
        } else if running {
            Self::Running
        } else if blocked {
            Self::Blocked
        } else {
            Self::Enqueued
        }
    }

    /// Aggregates a snapshot.
    pub fn from_infos(infos: &[WorkInfo]) -> Self {
        Self::from_states(infos.iter().map(|info| info.state))
    }

    /// Returns `true` for `Succeeded`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunState {
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

/// Observes and controls one submitted run.
///
/// Cloning is cheap; every clone observes the same run.
#[derive(Clone)]
pub struct PipelineHandle {
    name: String,
    run_id: RunId,
    task_ids: Vec<TaskId>,
    scheduler: Arc<dyn Scheduler>,
    updates: watch::Receiver<Vec<WorkInfo>>,
}

impl PipelineHandle {
    /// Wraps a scheduler's submission receipt.
    pub fn new(scheduler: Arc<dyn Scheduler>, submission: RunSubmission) -> Self {
        Self {
            name: submission.name,
            run_id: submission.run_id,
            task_ids: submission.task_ids,
            scheduler,
            updates: submission.updates,
        }
    }

    /// Unique work name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The observed run.
    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Tasks of the run, in declaration order.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.task_ids
    }

    /// Cancels every live task under this run's unique name, including
    /// runs appended before or after this one. Cancelling when nothing is
    /// live is a no-op.
    ///
    /// # Errors
    ///
    /// Propagates scheduler failures.
    pub async fn cancel(&self) -> Result<()> {
        let outcome = self.scheduler.cancel_by_name(&self.name).await?;
        self.log_cancel(outcome);
        Ok(())
    }

    /// Cancels only this run, leaving other runs under the name alone.
    ///
    /// # Errors
    ///
    /// Propagates scheduler failures.
    pub async fn cancel_run_only(&self) -> Result<()> {
        let outcome = self.scheduler.cancel_run(self.run_id).await?;
        self.log_cancel(outcome);
        Ok(())
    }

    fn log_cancel(&self, outcome: CancelOutcome) {
        match outcome {
            CancelOutcome::Cancelled(count) => {
                info!(name = %self.name, run_id = %self.run_id, count, "cancelled");
            },
            CancelOutcome::NothingToCancel => {
                debug!(name = %self.name, run_id = %self.run_id, "nothing to cancel");
            },
        }
    }

    /// The latest status of every task in the run.
    pub fn snapshot(&self) -> Vec<WorkInfo> {
        self.updates.borrow().clone()
    }

    /// Status of one task.
    pub fn task_info(&self, task_id: TaskId) -> Option<WorkInfo> {
        self.updates
            .borrow()
            .iter()
            .find(|info| info.task_id == task_id)
            .cloned()
    }

    /// The run's aggregate state.
    pub fn state(&self) -> RunState {
        RunState::from_infos(&self.updates.borrow())
    }

    /// Live stream of snapshots, starting with the current one.
    ///
    /// The stream never ends on its own, even after the scheduler forgets a
    /// settled run; drop it to unsubscribe.
    pub fn updates(&self) -> WorkInfoStream {
        WorkInfoStream::new(self.updates.clone())
    }

    /// Waits until every task of the run is terminal.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Scheduler`](crate::Error::Scheduler) if the scheduler
    /// drops the run first.
    pub async fn wait_for_terminal(&self) -> Result<RunState> {
        let infos = self
            .updates()
            .wait_for(|infos| RunState::from_infos(infos).is_terminal())
            .await?;
        Ok(RunState::from_infos(&infos))
    }
}

impl fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("name", &self.name)
            .field("run_id", &self.run_id)
            .field("task_ids", &self.task_ids)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskState::*;

    #[test]
    fn empty_run_is_enqueued() {
        assert_eq!(RunState::from_states(Vec::new()), RunState::Enqueued);
    }

    #[test]
    fn failure_waits_for_siblings() {
        assert_eq!(RunState::from_states([Failed, Running]), RunState::Running);
        assert_eq!(RunState::from_states([Failed, Cancelled]), RunState::Failed);
    }

    #[test]
    fn cancellation_outranks_success() {
        assert_eq!(
            RunState::from_states([Succeeded, Cancelled, Cancelled]),
            RunState::Cancelled
        );
        assert_eq!(
            RunState::from_states([Succeeded, Succeeded]),
            RunState::Succeeded
        );
    }

    #[test]
    fn live_states_rank_running_over_blocked() {
        assert_eq!(
            RunState::from_states([Succeeded, Blocked, Running]),
            RunState::Running
        );
        assert_eq!(
            RunState::from_states([Succeeded, Enqueued]),
            RunState::Enqueued
        );
    }
}
