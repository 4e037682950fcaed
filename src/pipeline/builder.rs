use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::{Pipeline, UniqueWorkPolicy};
use crate::data::MergePolicy;
use crate::error::{Error, Result};
use crate::handle::PipelineHandle;
use crate::scheduler::Scheduler;
use crate::task::{TaskId, WorkRequest};

/// Fluent builder for a uniquely named [`Pipeline`].
///
/// Each `then` appends a task that depends on everything added by the
/// previous step. [`then_all`](Self::then_all) fans out to several
/// independent tasks; the next `then` fans back in.
///
/// The builder is single-use: once [`submit`](Self::submit) succeeds, both
/// `build` and `submit` return [`Error::BuilderReused`].
///
/// # Examples
///
/// ```no_run
/// # async fn demo(scheduler: std::sync::Arc<dyn taskchain::Scheduler>) -> taskchain::Result<()> {
/// use taskchain::{PipelineBuilder, StageKind, UniqueWorkPolicy, WorkRequest};
///
/// let mut builder = PipelineBuilder::begin_unique_work(
///     scheduler,
///     "image_manipulation_work",
///     WorkRequest::from_worker(StageKind::Cleanup, "CleanupWorker"),
/// )
/// .then(WorkRequest::from_worker(StageKind::Transform, "BlurWorker"))
/// .then(WorkRequest::from_worker(StageKind::Persist, "SaveImageToFileWorker"));
///
/// let handle = builder.submit(UniqueWorkPolicy::Replace).await?;
/// let state = handle.wait_for_terminal().await?;
/// println!("pipeline finished: {state}");
/// # Ok(())
/// # }
/// ```
pub struct PipelineBuilder {
    scheduler: Arc<dyn Scheduler>,
    pipeline: Pipeline,
    tail: Vec<TaskId>,
    submitted: bool,
}

impl PipelineBuilder {
    /// Starts a pipeline named `name` whose first task is `initial`.
    pub fn begin_unique_work(
        scheduler: Arc<dyn Scheduler>,
        name: impl Into<String>,
        initial: WorkRequest,
    ) -> Self {
        let tail = vec![initial.id()];
        Self {
            scheduler,
            pipeline: Pipeline::single(name.into(), initial),
            tail,
            submitted: false,
        }
    }

    /// Appends `task`, depending on every task added by the previous step.
    #[must_use]
    pub fn then(mut self, task: WorkRequest) -> Self {
        let id = task.id();
        self.pipeline.push_task(task, &self.tail);
        self.tail = vec![id];
        self
    }

    /// Appends several independent tasks, each depending on every task added
    /// by the previous step. An empty list leaves the builder unchanged.
    #[must_use]
    pub fn then_all(mut self, tasks: impl IntoIterator<Item = WorkRequest>) -> Self {
        let mut next_tail = Vec::new();
        for task in tasks {
            next_tail.push(task.id());
            self.pipeline.push_task(task, &self.tail);
        }
        if !next_tail.is_empty() {
            self.tail = next_tail;
        }
        self
    }

    /// Sets how a fan-in task combines its predecessors' outputs.
    #[must_use]
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.pipeline.set_merge_policy(policy);
        self
    }

    /// The unique work name.
    pub fn name(&self) -> &str {
        self.pipeline.name()
    }

    /// Returns a validated copy of the pipeline without submitting it.
    ///
    /// # Errors
    ///
    /// [`Error::BuilderReused`] after a successful submit, or
    /// [`Error::InvalidPipeline`] if the graph is malformed.
    pub fn build(&self) -> Result<Pipeline> {
        if self.submitted {
            return Err(Error::BuilderReused {
                name: self.pipeline.name().to_string(),
            });
        }
        self.pipeline.validate()?;
        Ok(self.pipeline.clone())
    }

    /// Hands the pipeline to the scheduler under its unique name.
    ///
    /// # Errors
    ///
    /// [`Error::BuilderReused`] if this builder was already submitted, or
    /// whatever the scheduler reports. A failed submission leaves the builder
    /// usable.
    pub async fn submit(&mut self, policy: UniqueWorkPolicy) -> Result<PipelineHandle> {
        let pipeline = self.build()?;
        debug!(
            name = %pipeline.name(),
            tasks = pipeline.len(),
            %policy,
            "submitting pipeline"
        );
        let submission = self.scheduler.submit(pipeline, policy).await?;
        self.submitted = true;
        info!(
            name = %submission.name,
            run_id = %submission.run_id,
            "pipeline submitted"
        );
        Ok(PipelineHandle::new(Arc::clone(&self.scheduler), submission))
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("pipeline", &self.pipeline)
            .field("tail", &self.tail)
            .field("submitted", &self.submitted)
            .finish_non_exhaustive()
    }
}
