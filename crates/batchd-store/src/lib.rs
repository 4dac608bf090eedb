//! batchd-store: Persistence for nodes, batches and experiments
//!
//! This crate provides:
//! - The `Store` trait the scheduler reads and writes through
//! - `MemoryStore`, an in-process document store

pub mod memory;
pub mod traits;

pub use memory::MemoryStore;
pub use traits::Store;
