//! batchd-core: Core types and primitives for the batchd scheduler
//!
//! This crate provides the fundamental types used throughout batchd:
//! - Node, batch and experiment documents
//! - Node agent action messages
//! - The coalescing trigger queue used by every maintenance loop
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod model;
pub mod trigger;

pub use config::*;
pub use error::*;
pub use model::*;
pub use trigger::TriggerQueue;
