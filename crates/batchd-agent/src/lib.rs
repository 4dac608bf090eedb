//! batchd-agent: Node agent proxies
//!
//! This crate provides the command channel from the scheduler to the fleet:
//! - The `NodeAgent` trait
//! - A registry mapping node names to agents
//! - An HTTP-backed agent with a per-node action queue

pub mod http;
pub mod registry;
pub mod traits;

pub use http::HttpNodeAgent;
pub use registry::AgentRegistry;
pub use traits::NodeAgent;
