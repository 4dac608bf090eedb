//! Agent lookup by node name

use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::traits::NodeAgent;

/// Maps node names to their agents
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn NodeAgent>>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an agent under its node name, replacing any previous one
    pub fn register(&mut self, agent: Arc<dyn NodeAgent>) {
        self.agents.insert(agent.node_name().to_string(), agent);
    }

    /// Look up the agent of a node
    pub fn get(&self, node: &str) -> Option<Arc<dyn NodeAgent>> {
        let agent = self.agents.get(node).cloned();
        if agent.is_none() {
            warn!(node = node, "No agent registered for node");
        }
        agent
    }

    /// Number of registered agents
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}
