//! Batch placement decisions
//!
//! Placement is a pure function of a resource snapshot, the FIFO-ordered
//! pending batches and their experiments. Batches are placed greedily one at
//! a time; each placement reduces the chosen node's free RAM before the next
//! batch is considered.

use batchd_core::{Action, Batch, Experiment, ImageAuth, PlacementStrategy};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::accountant::{NodeCapacity, ResourceSnapshot};

/// Strategy for picking one node among the candidates that fit a batch
pub trait NodeSelector: Send + Sync {
    /// Return the index into `nodes` of the selected node, or `None` if no
    /// node has `required_ram` free
    fn select(&self, nodes: &[NodeCapacity], required_ram: u64) -> Option<usize>;

    /// Strategy name for logs
    fn name(&self) -> &'static str;
}

/// Picks the fitting node with the most free RAM
pub struct SpreadSelector;

/// Picks the fitting node with the least free RAM
pub struct BinpackSelector;

/// First fitting node wins ties, so ordering is stable across passes.
fn select_by<F>(nodes: &[NodeCapacity], required_ram: u64, better: F) -> Option<usize>
where
    F: Fn(u64, u64) -> bool,
{
    let mut best: Option<usize> = None;
    for (index, node) in nodes.iter().enumerate() {
        if node.free_ram < required_ram {
            continue;
        }
        best = match best {
            Some(current) if !better(node.free_ram, nodes[current].free_ram) => Some(current),
            _ => Some(index),
        };
    }
    best
}

impl NodeSelector for SpreadSelector {
    fn select(&self, nodes: &[NodeCapacity], required_ram: u64) -> Option<usize> {
        select_by(nodes, required_ram, |candidate, best| candidate > best)
    }

    fn name(&self) -> &'static str {
        "spread"
    }
}

impl NodeSelector for BinpackSelector {
    fn select(&self, nodes: &[NodeCapacity], required_ram: u64) -> Option<usize> {
        select_by(nodes, required_ram, |candidate, best| candidate < best)
    }

    fn name(&self) -> &'static str {
        "binpack"
    }
}

/// Selector implementing a configured strategy
pub fn selector_for(strategy: PlacementStrategy) -> Arc<dyn NodeSelector> {
    match strategy {
        PlacementStrategy::Spread => Arc::new(SpreadSelector),
        PlacementStrategy::Binpack => Arc::new(BinpackSelector),
    }
}

/// Image pull identity: batches sharing a key on one node share one pull
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullKey {
    pub url: String,
    pub auth: Option<ImageAuth>,
}

impl PullKey {
    fn for_experiment(experiment: &Experiment) -> Option<Self> {
        if experiment.pull_disabled() {
            return None;
        }
        Some(Self {
            url: experiment.image_url().to_string(),
            auth: experiment.image_auth().cloned(),
        })
    }
}

/// Placement decision for one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementDecision {
    pub batch_id: String,
    pub node: String,
    /// RAM deducted from the node
    pub ram: u64,
    /// Image the node must pull first, unless pulling is disabled
    pub pull: Option<PullKey>,
}

/// Outcome of one placement pass
#[derive(Debug, Clone, Default)]
pub struct PlacementPlan {
    /// Placed batches in FIFO order
    pub decisions: Vec<PlacementDecision>,
    /// Batches no node could fit, in FIFO order
    pub deferred: Vec<String>,
    /// Batches whose experiment could not be found
    pub unresolved: Vec<String>,
}

/// Assign `batches` (oldest first) to nodes of `snapshot`
pub fn plan(
    snapshot: &ResourceSnapshot,
    batches: &[Batch],
    experiments: &HashMap<String, Experiment>,
    selector: &dyn NodeSelector,
) -> PlacementPlan {
    let mut nodes: Vec<NodeCapacity> = snapshot.nodes().to_vec();
    let mut plan = PlacementPlan::default();

    for batch in batches {
        let Some(experiment) = experiments.get(&batch.experiment_id) else {
            warn!(
                batch_id = %batch.id,
                experiment_id = %batch.experiment_id,
                "Experiment not found, skipping batch"
            );
            plan.unresolved.push(batch.id.clone());
            continue;
        };

        let ram = experiment.ram();
        let Some(index) = selector.select(&nodes, ram) else {
            debug!(batch_id = %batch.id, ram = ram, "No node fits batch, deferring");
            plan.deferred.push(batch.id.clone());
            continue;
        };

        let node = &mut nodes[index];
        node.free_ram = node.free_ram.saturating_sub(ram);
        debug!(
            batch_id = %batch.id,
            node = %node.name,
            ram = ram,
            free_ram = node.free_ram,
            strategy = selector.name(),
            "Batch placed"
        );

        plan.decisions.push(PlacementDecision {
            batch_id: batch.id.clone(),
            node: node.name.clone(),
            ram,
            pull: PullKey::for_experiment(experiment),
        });
    }

    plan
}

/// Actions for one node, pulls before runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeActions {
    pub node: String,
    pub actions: Vec<Action>,
}

/// Group decisions per node into deduplicated `pull_image` actions followed
/// by one `run_batch_container` per batch. Nodes appear in order of their
/// first decision.
pub fn node_actions(decisions: &[PlacementDecision]) -> Vec<NodeActions> {
    struct Pending<'a> {
        node: &'a str,
        pulls: Vec<(&'a PullKey, Vec<String>)>,
        runs: Vec<String>,
    }

    let mut pending: Vec<Pending> = Vec::new();
    for decision in decisions {
        let position = match pending.iter().position(|p| p.node == decision.node) {
            Some(position) => position,
            None => {
                pending.push(Pending {
                    node: &decision.node,
                    pulls: Vec::new(),
                    runs: Vec::new(),
                });
                pending.len() - 1
            }
        };
        let entry = &mut pending[position];

        if let Some(key) = &decision.pull {
            match entry.pulls.iter_mut().find(|(k, _)| *k == key) {
                Some((_, required_by)) => required_by.push(decision.batch_id.clone()),
                None => entry.pulls.push((key, vec![decision.batch_id.clone()])),
            }
        }
        entry.runs.push(decision.batch_id.clone());
    }

    pending
        .into_iter()
        .map(|p| {
            let pulls = p.pulls.into_iter().map(|(key, required_by)| Action::PullImage {
                url: key.url.clone(),
                required_by,
                auth: key.auth.clone(),
            });
            let runs = p
                .runs
                .into_iter()
                .map(|batch_id| Action::RunBatchContainer { batch_id });
            NodeActions {
                node: p.node.to_string(),
                actions: pulls.chain(runs).collect(),
            }
        })
        .collect()
}
