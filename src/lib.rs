//! Ordered, replaceable background pipelines.
//!
//! `taskchain` composes independently schedulable units of work into one
//! named pipeline. A pipeline runs its stages in dependency order, hands
//! each stage's result to the next one, gates stages on environmental
//! [`Constraints`], and replaces (or keeps, or appends to) any earlier run
//! submitted under the same unique name.
//!
//! # Overview
//!
//! ```text
//! PipelineBuilder --build--> Pipeline (DAG of WorkRequests)
//!        |
//!        +--submit(policy)--> Scheduler --> PipelineHandle
//!                                |               |
//!                                +-- WorkInfo ---+--> observers
//! ```
//!
//! The [`Scheduler`] is an injected collaborator. This crate defines its
//! contract; `taskchain-scheduler` ships an in-process implementation.
//!
//! # Module Organization
//!
//! - [`data`] - The string-keyed payload passed into and out of every stage
//! - [`constraint`] - Preconditions gating when a stage may run
//! - [`task`] - Work requests and the per-task state machine
//! - [`worker`] - The stage execution contract and panic guard
//! - [`pipeline`] - The pipeline DAG, its builder and unique-work policy
//! - [`scheduler`] - The scheduler contract and observable work info
//! - [`handle`] - The caller-facing handle for a submitted run
//! - [`stages`] - Cleanup, blur and save stages with their collaborators
//! - [`blur`] - Composition helper that assembles the blur pipeline
//! - [`config`] - TOML and environment configuration

pub mod blur;
pub mod config;
pub mod constants;
pub mod constraint;
pub mod data;
pub mod error;
pub mod handle;
#[cfg(feature = "logging")]
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod stages;
pub mod task;
pub mod worker;

// Re-exports for ergonomic access
pub use blur::BlurCoordinator;
pub use config::{LoggingConfig, PipelineSettings, SchedulerSettings, TaskchainConfig};
pub use constants::*;
pub use constraint::{ConstraintKind, Constraints, DeviceState, NetworkType};
pub use data::{
    Data, DataBuilder, DataSchema, DataValue, MergeConflict, MergePolicy, RequiredKey,
    SchemaViolation, ValueKind,
};
pub use error::{Error, Result};
pub use handle::{PipelineHandle, RunState};
pub use pipeline::{Edge, Pipeline, PipelineBuilder, UniqueWorkPolicy};
pub use scheduler::{CancelOutcome, RunSubmission, Scheduler, WorkInfo, WorkInfoStream};
pub use task::{RunId, StageKind, TaskId, TaskState, WorkRequest, WorkRequestBuilder, WorkerName};
pub use worker::{
    run_guarded, worker_fn, FnWorker, StageError, StageOutcome, Worker, WorkerRegistry,
};
