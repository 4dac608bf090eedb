//! Per-node free RAM accounting

use batchd_core::{Batch, BatchState, BatchdResult, Experiment, Node, NodeState};
use batchd_store::Store;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

/// Free capacity of one online node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeCapacity {
    /// Node name
    pub name: String,
    /// Total RAM in MiB
    pub total_ram: u64,
    /// RAM not claimed by processing batches, in MiB
    pub free_ram: u64,
}

impl NodeCapacity {
    pub fn new(name: impl Into<String>, total_ram: u64, free_ram: u64) -> Self {
        Self {
            name: name.into(),
            total_ram,
            free_ram,
        }
    }
}

/// Free RAM of every online node at the start of a placement pass.
///
/// The snapshot is never written back; placement works on its own copy.
#[derive(Debug, Clone, Default)]
pub struct ResourceSnapshot {
    nodes: Vec<NodeCapacity>,
}

impl ResourceSnapshot {
    /// Build a snapshot from explicit capacities
    pub fn from_capacities(nodes: Vec<NodeCapacity>) -> Self {
        Self { nodes }
    }

    /// Read online nodes, their processing batches and the experiments those
    /// batches belong to, then compute free RAM per node
    pub async fn capture(store: &dyn Store) -> BatchdResult<Self> {
        let nodes = store.nodes(Some(NodeState::Online)).await?;
        if nodes.is_empty() {
            return Ok(Self::default());
        }

        let names: Vec<String> = nodes.iter().map(|n| n.name.clone()).collect();
        let processing = store.node_batches(&names, BatchState::Processing).await?;

        let experiment_ids: Vec<String> = processing
            .iter()
            .map(|b| b.experiment_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let experiments: HashMap<String, Experiment> = store
            .experiments(&experiment_ids)
            .await?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect();

        Ok(Self::compute(&nodes, &processing, &experiments))
    }

    /// `free = total - sum(ram of experiment)` over batches processing on the node
    pub fn compute(
        nodes: &[Node],
        processing: &[Batch],
        experiments: &HashMap<String, Experiment>,
    ) -> Self {
        let mut used: HashMap<&str, u64> = HashMap::new();
        for batch in processing {
            let Some(node) = batch.node.as_deref() else {
                continue;
            };
            match experiments.get(&batch.experiment_id) {
                Some(experiment) => {
                    *used.entry(node).or_insert(0) += experiment.ram();
                }
                None => {
                    warn!(
                        batch_id = %batch.id,
                        experiment_id = %batch.experiment_id,
                        "Processing batch references unknown experiment, not counted"
                    );
                }
            }
        }

        let nodes = nodes
            .iter()
            .map(|node| {
                let used = used.get(node.name.as_str()).copied().unwrap_or(0);
                let free_ram = node.ram.saturating_sub(used);
                debug!(node = %node.name, total_ram = node.ram, free_ram = free_ram, "Node capacity");
                NodeCapacity::new(node.name.clone(), node.ram, free_ram)
            })
            .collect();

        Self { nodes }
    }

    /// Capacities in store order
    pub fn nodes(&self) -> &[NodeCapacity] {
        &self.nodes
    }

    /// Free RAM of a node, if it is online
    pub fn free_ram(&self, node: &str) -> Option<u64> {
        self.nodes
            .iter()
            .find(|n| n.name == node)
            .map(|n| n.free_ram)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
