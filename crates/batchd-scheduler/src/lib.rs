//! batchd-scheduler: RAM-aware batch scheduler for batchd
//!
//! This crate provides the scheduling core and its maintenance loops:
//! - Free RAM accounting per online node
//! - Placement of pending batches with spread or binpack selection
//! - Recovery probes for offline nodes
//! - Redaction of credentials once batches and experiments finish

pub mod accountant;
pub mod inspection;
pub mod orchestrator;
pub mod placement;
pub mod redaction;
pub mod scheduler;
pub mod voiding;

#[cfg(test)]
mod testing;

pub use accountant::{NodeCapacity, ResourceSnapshot};
pub use inspection::{inspect_offline_nodes, InspectionStats};
pub use orchestrator::{Orchestrator, OrchestratorHandle, SchedulerContext, Triggers};
pub use placement::{NodeSelector, PlacementDecision};
pub use redaction::Redactor;
pub use scheduler::{PassStats, Scheduler};
pub use voiding::{run_voiding_pass, VoidingStats};
