use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use taskchain::{
    CancelOutcome, Error, Pipeline, Result, RunId, RunSubmission, Scheduler,
    SchedulerSettings, UniqueWorkPolicy, WorkInfoStream, WorkerRegistry,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{self, Predecessor, RunContext};
use crate::monitor::ConstraintMonitor;
use crate::store::WorkInfoStore;

/// Executes pipelines on the current tokio runtime.
///
/// Each accepted run is driven by its own spawned task. Unique names are
/// resolved atomically: concurrent submissions under one name are
/// serialized, so `Replace` never leaves two runs active.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use taskchain::{
///     worker_fn, Data, PipelineBuilder, RunState, StageError, StageKind, UniqueWorkPolicy,
///     WorkRequest, WorkerRegistry,
/// };
/// use taskchain_scheduler::{ConstraintMonitor, InMemoryScheduler};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> taskchain::Result<()> {
/// let workers = WorkerRegistry::new().register(
///     "Echo",
///     Arc::new(worker_fn(|input: Data| async move { Ok::<_, StageError>(input) })),
/// );
/// let scheduler = Arc::new(InMemoryScheduler::new(workers, ConstraintMonitor::default()));
///
/// let handle = PipelineBuilder::begin_unique_work(
///     scheduler,
///     "echo",
///     WorkRequest::from_worker(StageKind::Transform, "Echo"),
/// )
/// .submit(UniqueWorkPolicy::Replace)
/// .await?;
///
/// assert_eq!(handle.wait_for_terminal().await?, RunState::Succeeded);
/// # Ok(())
/// # }
/// ```
pub struct InMemoryScheduler {
    store: Arc<WorkInfoStore>,
    workers: WorkerRegistry,
    monitor: ConstraintMonitor,
    names: Arc<DashMap<String, Vec<RunId>>>,
    tokens: Arc<DashMap<RunId, CancellationToken>>,
    permits: Arc<Semaphore>,
    settings: SchedulerSettings,
}

impl InMemoryScheduler {
    /// Creates a scheduler executing `workers` under the device state
    /// published by `monitor`.
    pub fn new(workers: WorkerRegistry, monitor: ConstraintMonitor) -> Self {
        let settings = SchedulerSettings::default();
        Self {
            store: Arc::new(WorkInfoStore::new()),
            workers,
            monitor,
            names: Arc::new(DashMap::new()),
            tokens: Arc::new(DashMap::new()),
            permits: Arc::new(Semaphore::new(settings.max_concurrent_runs.max(1))),
            settings,
        }
    }

    /// Replaces the settings. Call before submitting anything.
    #[must_use]
    pub fn with_config(mut self, settings: SchedulerSettings) -> Self {
        self.permits = Arc::new(Semaphore::new(settings.max_concurrent_runs.max(1)));
        self.settings = settings;
        self
    }

    /// The monitor task constraints are evaluated against.
    pub fn monitor(&self) -> &ConstraintMonitor {
        &self.monitor
    }

    /// The underlying work info store.
    pub fn store(&self) -> &WorkInfoStore {
        &self.store
    }

    fn is_active(&self, run_id: RunId) -> bool {
        self.store
            .run_state(run_id)
            .is_some_and(|state| !state.is_terminal())
    }

    fn cancel_active(&self, run_id: RunId) -> usize {
        if let Some(token) = self.tokens.get(&run_id) {
            token.cancel();
        }
        self.store.cancel_run(run_id)
    }

    fn submission_for(&self, name: &str, run_id: RunId) -> Result<RunSubmission> {
        let updates = self.store.subscribe_run(run_id).ok_or_else(|| Error::UnknownRun {
            run_id: run_id.to_string(),
        })?;
        Ok(RunSubmission {
            name: name.to_string(),
            run_id,
            task_ids: self.store.run_task_ids(run_id),
            updates,
        })
    }
}

impl std::fmt::Debug for InMemoryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryScheduler")
            .field("workers", &self.workers)
            .field("settings", &self.settings)
            .field("tasks", &self.store.len())
            .finish_non_exhaustive()
    }
}

fn outcome(count: usize) -> CancelOutcome {
    if count == 0 {
        CancelOutcome::NothingToCancel
    } else {
        CancelOutcome::Cancelled(count)
    }
}

#[async_trait]
impl Scheduler for InMemoryScheduler {
    async fn submit(&self, pipeline: Pipeline, policy: UniqueWorkPolicy) -> Result<RunSubmission> {
        pipeline.validate()?;
        let name = pipeline.name().to_string();

        let mut runs = self.names.entry(name.clone()).or_default();
        runs.retain(|id| self.store.contains_run(*id));
        let active: Vec<RunId> = runs
            .iter()
            .copied()
            .filter(|id| self.is_active(*id))
            .collect();

        let mut after = None;
        match policy {
            UniqueWorkPolicy::Keep => {
                if let Some(&existing) = active.last() {
                    info!(%name, run_id = %existing, "keeping active run; new pipeline dropped");
                    return self.submission_for(&name, existing);
                }
            },
            UniqueWorkPolicy::Replace => {
                for run_id in &active {
                    let cancelled = self.cancel_active(*run_id);
                    info!(%name, run_id = %run_id, cancelled, "replacing active run");
                }
            },
            UniqueWorkPolicy::Append => {
                if let Some(&previous) = active.last() {
                    if let Some(updates) = self.store.subscribe_run(previous) {
                        debug!(%name, after = %previous, "appending to active run");
                        after = Some(Predecessor {
                            run_id: previous,
                            leaves: self.store.run_leaves(previous),
                            updates,
                        });
                    }
                }
            },
        }

        let run_id = RunId::new();
        let updates = self.store.insert_run(run_id, &pipeline);
        runs.push(run_id);
        drop(runs);

        let token = CancellationToken::new();
        self.tokens.insert(run_id, token.clone());

        let submission = RunSubmission {
            name,
            run_id,
            task_ids: pipeline.task_ids(),
            updates,
        };
        info!(name = %submission.name, %run_id, %policy, "run accepted");

        tokio::spawn(engine::drive(RunContext {
            run_id,
            pipeline,
            store: Arc::clone(&self.store),
            workers: self.workers.clone(),
            monitor: self.monitor.clone(),
            token,
            permits: Arc::clone(&self.permits),
            after,
            retain_terminal: self.settings.retain_terminal,
            tokens: Arc::clone(&self.tokens),
            names: Arc::clone(&self.names),
        }));

        Ok(submission)
    }

    async fn cancel_by_name(&self, name: &str) -> Result<CancelOutcome> {
        let run_ids = self
            .names
            .get(name)
            .map(|runs| runs.clone())
            .unwrap_or_default();
        let cancelled: usize = run_ids.into_iter().map(|id| self.cancel_active(id)).sum();
        debug!(%name, cancelled, "cancel by name");
        Ok(outcome(cancelled))
    }

    async fn cancel_run(&self, run_id: RunId) -> Result<CancelOutcome> {
        Ok(outcome(self.cancel_active(run_id)))
    }

    fn query_by_tag(&self, tag: &str) -> WorkInfoStream {
        WorkInfoStream::new(self.store.subscribe_tag(tag))
    }

    fn query_by_name(&self, name: &str) -> WorkInfoStream {
        WorkInfoStream::new(self.store.subscribe_name(name))
    }

    async fn prune(&self) -> Result<usize> {
        let (pruned, removed) = self.store.prune_terminal();
        for run_id in &pruned {
            self.tokens.remove(run_id);
        }
        self.names.retain(|_, runs| {
            runs.retain(|id| !pruned.contains(id));
            !runs.is_empty()
        });
        debug!(runs = pruned.len(), tasks = removed, "pruned terminal runs");
        Ok(removed)
    }
}
