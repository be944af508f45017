//! Orchestration engine for Lattix workflows.
//!
//! The [`Orchestrator`] accepts runs, validates the graph up front, and
//! hands each run to a worker pool that walks nodes in topological order,
//! threading a copy-on-write context between them. Invoked agents get a
//! [`DelegationContext`] so they can call other agents at runtime within a
//! configured depth limit.

pub mod builder;
pub mod delegation;
pub mod invoke;
pub mod orchestrator;
pub mod queue;
pub mod runner;

pub use builder::WorkflowBuilder;
pub use delegation::{DelegationContext, InvocationBudget};
pub use invoke::EchoInvoker;
pub use orchestrator::Orchestrator;
pub use queue::{RunJob, RunQueue, WorkerPool};
pub use runner::NodeRunner;
