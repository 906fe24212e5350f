//! The event-to-ledger reconciliation engine.
//!
//! For each registered (contract, event) pair the orchestrator plans a
//! block window, fetches its logs, parses them into typed domain facts, and
//! applies the facts to the store through idempotent upserts before
//! advancing the pair's cursor. Re-delivery of any window is a no-op.

pub mod allowlist;
pub mod apply;
pub mod cli;
pub mod error;
pub mod ledger;
pub mod marketplace;
pub mod orchestrator;
pub mod parser;
pub mod planner;
pub mod registry;

pub use error::{IndexerError, IndexerErrorResultExt, ReportExt};
pub use orchestrator::{Orchestrator, OrchestratorOptions, RunReport};
pub use registry::EventKind;
