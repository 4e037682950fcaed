//! Drives one run from submission to a terminal state.
//!
//! The engine walks the pipeline layer by layer. Tasks in one layer have no
//! dependencies on each other and run concurrently; a layer starts only once
//! the previous one has settled. For each task it:
//!
//! 1. skips it if an upstream failure or a cancellation already settled it,
//! 2. merges its predecessors' outputs and overlays its own input,
//! 3. holds it `Blocked` until its constraints hold,
//! 4. runs the worker, dropping back to `Blocked` if a constraint is lost
//!    mid-run,
//! 5. records the outcome, failing every not-yet-started descendant on
//!    failure.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use taskchain::{
    run_guarded, Constraints, Data, DeviceState, Pipeline, RunId, RunState, StageError,
    StageOutcome, TaskId, TaskState, WorkInfo, WorkRequest, WorkerRegistry,
};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::monitor::ConstraintMonitor;
use crate::store::WorkInfoStore;

/// A run this one must wait for before starting.
pub(crate) struct Predecessor {
    pub(crate) run_id: RunId,
    pub(crate) leaves: Vec<TaskId>,
    pub(crate) updates: watch::Receiver<Vec<WorkInfo>>,
}

/// Everything a spawned run needs.
pub(crate) struct RunContext {
    pub(crate) run_id: RunId,
    pub(crate) pipeline: Pipeline,
    pub(crate) store: Arc<WorkInfoStore>,
    pub(crate) workers: WorkerRegistry,
    pub(crate) monitor: ConstraintMonitor,
    pub(crate) token: CancellationToken,
    pub(crate) permits: Arc<Semaphore>,
    pub(crate) after: Option<Predecessor>,
    pub(crate) retain_terminal: bool,
    pub(crate) tokens: Arc<DashMap<RunId, CancellationToken>>,
    pub(crate) names: Arc<DashMap<String, Vec<RunId>>>,
}

/// Runs the pipeline to completion. Never panics on task failure.
pub(crate) async fn drive(ctx: RunContext) {
    let span = info_span!("run", run_id = %ctx.run_id, name = %ctx.pipeline.name());
    async move {
        execute(&ctx).await;
        finish(&ctx);
    }
    .instrument(span)
    .await;
}

async fn execute(ctx: &RunContext) {
    let seed = match &ctx.after {
        Some(predecessor) => match await_predecessor(ctx, predecessor).await {
            Some(seed) => seed,
            None => return,
        },
        None => Vec::new(),
    };

    let _permit = tokio::select! {
        permit = Arc::clone(&ctx.permits).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => {
                error!("scheduler shut down");
                return;
            },
        },
        () = ctx.token.cancelled() => return,
    };

    let layers = match ctx.pipeline.layers() {
        Ok(layers) => layers,
        Err(err) => {
            error!(error = %err, "pipeline rejected");
            fail_all(ctx, &err.to_string());
            return;
        },
    };

    info!(tasks = ctx.pipeline.len(), "run started");
    let mut outputs: HashMap<TaskId, Data> = HashMap::new();
    for layer in layers {
        let results = join_all(
            layer
                .iter()
                .map(|id| run_task(ctx, *id, &outputs, &seed)),
        )
        .await;
        for (id, output) in layer.into_iter().zip(results) {
            if let Some(output) = output {
                outputs.insert(id, output);
            }
        }
    }
}

fn finish(ctx: &RunContext) {
    ctx.tokens.remove(&ctx.run_id);
    let state = ctx.store.run_state(ctx.run_id);
    info!(state = ?state, "run finished");

    if !ctx.retain_terminal && ctx.store.remove_run_if_terminal(ctx.run_id) > 0 {
        if let Some(mut runs) = ctx.names.get_mut(ctx.pipeline.name()) {
            runs.retain(|id| *id != ctx.run_id);
        }
    }
}

/// Waits for the run this one was appended to. Returns the seed input for
/// this run's roots, or `None` if this run was settled instead.
async fn await_predecessor(ctx: &RunContext, predecessor: &Predecessor) -> Option<Vec<Data>> {
    debug!(after = %predecessor.run_id, "waiting for preceding run");
    let mut updates = predecessor.updates.clone();
    let settled = tokio::select! {
        res = updates.wait_for(|infos| RunState::from_infos(infos).is_terminal()) => {
            res.map(|infos| infos.to_vec()).ok()
        },
        () = ctx.token.cancelled() => return None,
    };
    let snapshot = settled.unwrap_or_else(|| predecessor.updates.borrow().clone());

    match RunState::from_infos(&snapshot) {
        RunState::Succeeded => Some(leaf_outputs(&snapshot, &predecessor.leaves)),
        RunState::Cancelled => {
            info!(after = %predecessor.run_id, "preceding run cancelled");
            for id in ctx.pipeline.task_ids() {
                settle(ctx, id, TaskState::Cancelled, |_| {});
            }
            None
        },
        other => {
            warn!(after = %predecessor.run_id, state = %other, "preceding run did not succeed");
            fail_all(ctx, &format!("preceding run {} {other}", predecessor.run_id));
            None
        },
    }
}

/// Outputs of `leaves`, in the given order, taken from a run snapshot.
fn leaf_outputs(snapshot: &[WorkInfo], leaves: &[TaskId]) -> Vec<Data> {
    leaves
        .iter()
        .filter_map(|id| snapshot.iter().find(|info| info.task_id == *id))
        .map(|info| info.output.clone())
        .collect()
}

async fn run_task(
    ctx: &RunContext,
    id: TaskId,
    outputs: &HashMap<TaskId, Data>,
    seed: &[Data],
) -> Option<Data> {
    let request = ctx.pipeline.task(id)?;
    if ctx.token.is_cancelled() || ctx.store.state(id).map_or(true, |s| s.is_terminal()) {
        return None;
    }

    let span = info_span!("task", task_id = %id, worker = %request.worker());
    async move {
        let input = match task_input(ctx, request, outputs, seed) {
            Ok(input) => input,
            Err(reason) => {
                fail_with_descendants(ctx, id, &reason);
                return None;
            },
        };

        let Some(worker) = ctx.workers.get(request.worker()) else {
            let reason = format!("no worker registered as '{}'", request.worker());
            error!("{reason}");
            fail_with_descendants(ctx, id, &reason);
            return None;
        };

        let constraints = *request.constraints();
        loop {
            if !wait_for_constraints(ctx, id, &constraints).await {
                return None;
            }
            if !settle(ctx, id, TaskState::Running, |_| {}) {
                return None;
            }
            debug!("task running");

            let mut device = ctx.monitor.subscribe();
            let outcome = tokio::select! {
                biased;
                outcome = run_guarded(worker.as_ref(), input.clone()) => Some(outcome),
                () = constraint_lost(&mut device, &constraints), if !constraints.is_empty() => None,
            };

            match outcome {
                None => {
                    let unmet = constraints.unmet(&ctx.monitor.current());
                    info!(?unmet, "constraint lost; task interrupted");
                    if !settle(ctx, id, TaskState::Blocked, |info| info.blocked_by = unmet) {
                        return None;
                    }
                },
                Some(StageOutcome::Success(output)) => {
                    let recorded = settle(ctx, id, TaskState::Succeeded, |info| {
                        info.output = output.clone();
                    });
                    if recorded {
                        info!("task succeeded");
                        return Some(output);
                    }
                    debug!("result discarded");
                    return None;
                },
                Some(StageOutcome::Failure(err)) => {
                    warn!(error = %err, "task failed");
                    fail_with_descendants(ctx, id, &err.to_string());
                    return None;
                },
            }
        }
    }
    .instrument(span)
    .await
}

/// Builds a task's input: the merge of its predecessors' outputs (or the
/// seed for roots) overlaid with the task's own input.
fn task_input(
    ctx: &RunContext,
    request: &WorkRequest,
    outputs: &HashMap<TaskId, Data>,
    seed: &[Data],
) -> Result<Data, String> {
    let predecessors = ctx.pipeline.predecessors(request.id());
    let inputs: Vec<Data> = if predecessors.is_empty() {
        seed.to_vec()
    } else {
        let mut inputs = Vec::with_capacity(predecessors.len());
        for predecessor in predecessors {
            let output = outputs
                .get(&predecessor)
                .ok_or_else(|| format!("predecessor {predecessor} produced no output"))?;
            inputs.push(output.clone());
        }
        inputs
    };

    let merged = Data::merge(&inputs, ctx.pipeline.merge_policy()).map_err(|conflict| {
        StageError::InvalidInput {
            key: conflict.key,
            reason: "predecessor outputs conflict".to_string(),
        }
        .to_string()
    })?;
    Ok(merged.overlay(request.input()))
}

/// Holds the task `Blocked` until its constraints hold. Returns `false` if
/// the run was cancelled first.
async fn wait_for_constraints(ctx: &RunContext, id: TaskId, constraints: &Constraints) -> bool {
    let mut device = ctx.monitor.subscribe();
    let unmet = constraints.unmet(&device.borrow_and_update());
    if unmet.is_empty() {
        return true;
    }

    if ctx.store.state(id) != Some(TaskState::Blocked) {
        info!(?unmet, "task blocked");
        if !settle(ctx, id, TaskState::Blocked, |info| info.blocked_by = unmet) {
            return false;
        }
    }

    tokio::select! {
        satisfied = state_matches(&mut device, |state| constraints.is_satisfied_by(state)) => satisfied,
        () = ctx.token.cancelled() => false,
    }
}

async fn constraint_lost(device: &mut watch::Receiver<DeviceState>, constraints: &Constraints) {
    if !state_matches(device, |state| !constraints.is_satisfied_by(state)).await {
        // The monitor outlives every run; a closed channel never resolves.
        std::future::pending::<()>().await;
    }
}

async fn state_matches(
    device: &mut watch::Receiver<DeviceState>,
    predicate: impl FnMut(&DeviceState) -> bool,
) -> bool {
    device.wait_for(predicate).await.is_ok()
}

/// Applies a transition, logging instead of failing when the task was
/// already settled elsewhere (typically by a cancellation).
fn settle(
    ctx: &RunContext,
    id: TaskId,
    next: TaskState,
    update: impl FnOnce(&mut WorkInfo),
) -> bool {
    match ctx.store.transition(id, next, update) {
        Ok(_) => true,
        Err(err) => {
            debug!(task_id = %id, error = %err, "transition skipped");
            false
        },
    }
}

fn fail_with_descendants(ctx: &RunContext, id: TaskId, reason: &str) {
    settle(ctx, id, TaskState::Failed, |info| {
        info.error = Some(reason.to_string());
    });

    let cause = format!("upstream task {id} failed");
    for descendant in ctx.pipeline.descendants(id) {
        if ctx.store.state(descendant) == Some(TaskState::Enqueued) {
            settle(ctx, descendant, TaskState::Failed, |info| {
                info.error = Some(cause.clone());
            });
        }
    }
}

fn fail_all(ctx: &RunContext, reason: &str) {
    for id in ctx.pipeline.task_ids() {
        settle(ctx, id, TaskState::Failed, |info| {
            info.error = Some(reason.to_string());
        });
    }
}
