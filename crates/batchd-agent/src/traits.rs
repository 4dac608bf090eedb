//! Node agent trait definitions

use async_trait::async_trait;
use batchd_core::Action;

/// Remote command channel to the agent running on one node
#[async_trait]
pub trait NodeAgent: Send + Sync {
    /// Name of the node this agent controls
    fn node_name(&self) -> &str;

    /// Enqueue an action for delivery. Never blocks and never fails;
    /// delivery problems are handled by the agent itself.
    fn put_action(&self, action: Action);

    /// Probe an offline node and bring it back online if it answers.
    /// Expected network failures are absorbed, not returned.
    async fn inspect_offline_node(&self);
}
