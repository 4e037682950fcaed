//! Pipelines: named DAGs of work requests and the builder that assembles them.
//!
//! A [`Pipeline`] is a plain value. It owns its [`WorkRequest`]s and the
//! [`Edge`]s between them, so it can be inspected, validated and serialized
//! without a scheduler. [`PipelineBuilder`] assembles one with chained
//! `then` calls and hands it to a [`Scheduler`](crate::scheduler::Scheduler)
//! under a unique name.
//!
//! [`WorkRequest`]: crate::task::WorkRequest

mod builder;
mod graph;
mod policy;

pub use builder::PipelineBuilder;
pub use graph::{Edge, Pipeline};
pub use policy::UniqueWorkPolicy;
