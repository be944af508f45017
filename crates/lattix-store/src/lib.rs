//! SQLite-backed [`ExecutionStore`] implementation.
//!
//! Six related tables: workflows, agents, nodes, edges, executions, and
//! execution_logs, with foreign-key cascades from workflow down. Log rows
//! deliberately carry no foreign key to nodes or agents, so an execution's
//! forensic trail survives later edits to the workflow definition.
//!
//! [`ExecutionStore`]: lattix_core::traits::ExecutionStore

mod store;

pub use store::SqliteStore;
