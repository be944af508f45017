//! Workflow graph assembly, validation, and topological scheduling.
//!
//! A [`WorkflowGraph`] is the in-memory DAG of one workflow. It answers two
//! questions: is the graph valid, and in what order do its nodes run. All
//! mutations re-validate before committing, so a rejected change leaves the
//! graph exactly as it was.

mod graph;

pub use graph::WorkflowGraph;
