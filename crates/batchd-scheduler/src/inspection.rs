//! Offline node inspection

use batchd_agent::AgentRegistry;
use batchd_core::{BatchdResult, NodeState};
use batchd_store::Store;
use futures::future::join_all;
use std::collections::HashSet;
use tracing::{info, warn};

/// Summary of one inspection pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InspectionStats {
    /// Offline nodes probed
    pub probed: usize,
    /// Probed nodes that are online afterwards
    pub recovered: usize,
    /// Probes that panicked
    pub failed: usize,
}

/// Probe every offline node through its agent, one task per node, and wait
/// for all probes. Bringing a node online is left to the agent.
pub async fn inspect_offline_nodes(
    store: &dyn Store,
    agents: &AgentRegistry,
) -> BatchdResult<InspectionStats> {
    let offline = store.nodes(Some(NodeState::Offline)).await?;
    if offline.is_empty() {
        return Ok(InspectionStats::default());
    }

    let mut probed = HashSet::new();
    let mut probes = Vec::new();
    for node in &offline {
        if let Some(agent) = agents.get(&node.name) {
            probed.insert(node.name.clone());
            probes.push(tokio::spawn(async move {
                agent.inspect_offline_node().await;
            }));
        }
    }

    let mut stats = InspectionStats {
        probed: probes.len(),
        ..InspectionStats::default()
    };
    for result in join_all(probes).await {
        if let Err(e) = result {
            warn!(error = %e, "Node probe panicked");
            stats.failed += 1;
        }
    }

    stats.recovered = store
        .nodes(Some(NodeState::Online))
        .await?
        .iter()
        .filter(|n| probed.contains(&n.name))
        .count();

    info!(
        probed = stats.probed,
        recovered = stats.recovered,
        "Inspection pass complete"
    );
    Ok(stats)
}
