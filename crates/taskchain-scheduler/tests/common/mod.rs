//! Shared workers and helpers for the scheduler integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use taskchain::{
    worker_fn, Data, PipelineHandle, StageError, StageKind, WorkInfo, WorkRequest, Worker,
    WorkerRegistry,
};
use taskchain_scheduler::{ConstraintMonitor, InMemoryScheduler};
use tokio::sync::Semaphore;

/// Upper bound for every wait in these tests.
pub const TIMEOUT: Duration = Duration::from_secs(5);

pub const STEP: &str = "Step";
pub const GATED: &str = "Gated";
pub const FAIL: &str = "Fail";
pub const PANIC: &str = "Panic";
pub const COLLECT: &str = "Collect";

/// Appends the input `label` to the input `trail`.
fn append_label(input: &Data) -> Result<Data, StageError> {
    let trail = input.get_string("trail").unwrap_or_default();
    let label = input.get_string("label").unwrap_or("?");
    Data::builder()
        .put_string("trail", format!("{trail}{label}"))
        .build()
        .map_err(|err| StageError::Transform(err.to_string()))
}

/// Like `Step`, but each execution first takes a permit from the gate.
pub struct Gated {
    gate: Arc<Semaphore>,
}

#[async_trait]
impl Worker for Gated {
    async fn execute(&self, input: Data) -> Result<Data, StageError> {
        self.gate
            .acquire()
            .await
            .map_err(|err| StageError::Transform(err.to_string()))?
            .forget();
        append_label(&input)
    }
}

/// Workers used across the tests plus the gate holding `Gated` back.
pub struct Fixture {
    pub scheduler: Arc<InMemoryScheduler>,
    pub gate: Arc<Semaphore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with(|scheduler| scheduler)
    }

    /// Builds the fixture, letting the caller adjust the scheduler.
    pub fn with(configure: impl FnOnce(InMemoryScheduler) -> InMemoryScheduler) -> Self {
        let gate = Arc::new(Semaphore::new(0));
        let scheduler = InMemoryScheduler::new(registry(Arc::clone(&gate)), ConstraintMonitor::default());
        Self {
            scheduler: Arc::new(configure(scheduler)),
            gate,
        }
    }

    pub fn monitor(&self) -> &ConstraintMonitor {
        self.scheduler.monitor()
    }

    /// Lets `n` gated executions through.
    pub fn open(&self, n: usize) {
        self.gate.add_permits(n);
    }
}

pub fn registry(gate: Arc<Semaphore>) -> WorkerRegistry {
    WorkerRegistry::new()
        .register(
            STEP,
            Arc::new(worker_fn(|input: Data| async move { append_label(&input) })),
        )
        .register(GATED, Arc::new(Gated { gate }))
        .register(
            FAIL,
            Arc::new(worker_fn(|_input: Data| async move {
                Err::<Data, _>(StageError::Transform("corrupt image".to_string()))
            })),
        )
        .register(
            PANIC,
            Arc::new(worker_fn(|input: Data| async move {
                if input.get_string("label").is_some() {
                    panic!("boom");
                }
                Ok(input)
            })),
        )
        .register(
            COLLECT,
            Arc::new(worker_fn(|input: Data| async move {
                let label = input.get_string("label").unwrap_or_default().to_string();
                Data::builder()
                    .put_all(&input)
                    .put_string(label, "1")
                    .build()
                    .map_err(|err| StageError::Transform(err.to_string()))
            })),
        )
}

/// A request for `worker` whose input carries `label`.
pub fn labelled(worker: &str, label: &str) -> WorkRequest {
    WorkRequest::builder(StageKind::Transform, worker)
        .input(
            Data::builder()
                .put_string("label", label)
                .build()
                .unwrap(),
        )
        .build()
}

/// Waits until the run's snapshot satisfies `predicate`.
pub async fn wait_until(
    handle: &PipelineHandle,
    predicate: impl FnMut(&[WorkInfo]) -> bool,
) -> Vec<WorkInfo> {
    tokio::time::timeout(TIMEOUT, handle.updates().wait_for(predicate))
        .await
        .expect("timed out waiting for run")
        .unwrap()
}

/// Waits for the run to settle.
pub async fn settle(handle: &PipelineHandle) -> taskchain::RunState {
    tokio::time::timeout(TIMEOUT, handle.wait_for_terminal())
        .await
        .expect("timed out waiting for terminal state")
        .unwrap()
}

pub fn info_of(handle: &PipelineHandle, index: usize) -> WorkInfo {
    handle.task_info(handle.task_ids()[index]).unwrap()
}
