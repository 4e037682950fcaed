//! In-process scheduler for `taskchain` pipelines.
//!
//! This crate implements the [`taskchain::Scheduler`] contract on top of the
//! tokio runtime. Every accepted run is driven by its own spawned task;
//! stages run in dependency order, stages in the same dependency layer run
//! concurrently, and every state change is published to the observable
//! work info views.
//!
//! # Overview
//!
//! A task progresses through the state machine
//! (`enqueued` -> `blocked` <-> `running` -> `succeeded`/`failed`/`cancelled`).
//! It sits in `blocked` while its constraints are unmet according to the
//! [`ConstraintMonitor`]; losing a constraint mid-run interrupts the stage
//! and sends it back to `blocked`. A failed stage fails every stage
//! downstream of it.
//!
//! # Module Organization
//!
//! - [`scheduler`] - [`InMemoryScheduler`], the [`taskchain::Scheduler`] implementation
//! - [`store`] - Thread-safe work info records and their live views
//! - [`monitor`] - Observable device state for constraint evaluation

mod engine;
pub mod monitor;
pub mod scheduler;
pub mod store;

// Re-exports for ergonomic access
pub use monitor::ConstraintMonitor;
pub use scheduler::InMemoryScheduler;
pub use store::WorkInfoStore;
