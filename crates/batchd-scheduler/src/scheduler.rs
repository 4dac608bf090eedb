//! Placement pass: snapshot, plan, persist, dispatch

use batchd_agent::AgentRegistry;
use batchd_core::{Action, Batch, BatchdResult, Experiment, NodeState, PlacementStrategy};
use batchd_store::Store;
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::accountant::ResourceSnapshot;
use crate::placement::{node_actions, plan, selector_for, NodeSelector, PlacementDecision};

/// Summary of one placement pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassStats {
    /// Batches moved to processing
    pub placed: usize,
    /// Batches left registered because no node fits
    pub deferred: usize,
    /// Batches skipped because their experiment is missing
    pub unresolved: usize,
    /// Placements the store refused to persist
    pub failed: usize,
    /// `pull_image` actions dispatched
    pub pulls: usize,
}

/// Runs placement passes against the store and dispatches the result
pub struct Scheduler {
    store: Arc<dyn Store>,
    agents: AgentRegistry,
    selector: Arc<dyn NodeSelector>,
}

impl Scheduler {
    /// Create a scheduler using the given strategy
    pub fn new(store: Arc<dyn Store>, agents: AgentRegistry, strategy: PlacementStrategy) -> Self {
        info!(strategy = %strategy, nodes = agents.len(), "Scheduler initialized");
        Self {
            store,
            agents,
            selector: selector_for(strategy),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Place every pending batch that fits. Must not run concurrently with
    /// another pass, or node capacity may be handed out twice.
    pub async fn run_pass(&self) -> BatchdResult<PassStats> {
        let snapshot = ResourceSnapshot::capture(self.store.as_ref()).await?;
        let pending = self.store.registered_batches().await?;
        if pending.is_empty() {
            debug!("No pending batches");
            return Ok(PassStats::default());
        }

        let experiments = self.resolve_experiments(&pending).await?;
        let plan = plan(&snapshot, &pending, &experiments, self.selector.as_ref());

        let mut stats = PassStats {
            deferred: plan.deferred.len(),
            unresolved: plan.unresolved.len(),
            ..PassStats::default()
        };

        let placed = self.persist(plan.decisions, &mut stats).await;
        stats.pulls = self.dispatch(&placed);

        info!(
            placed = stats.placed,
            deferred = stats.deferred,
            unresolved = stats.unresolved,
            failed = stats.failed,
            pulls = stats.pulls,
            "Placement pass complete"
        );
        Ok(stats)
    }

    /// Send `clean_up` to every online node
    pub async fn broadcast_clean_up(&self) -> BatchdResult<usize> {
        let nodes = self.store.nodes(Some(NodeState::Online)).await?;
        let mut sent = 0;
        for node in nodes {
            if let Some(agent) = self.agents.get(&node.name) {
                agent.put_action(Action::CleanUp);
                sent += 1;
            }
        }
        debug!(nodes = sent, "Clean up broadcast");
        Ok(sent)
    }

    /// Fetch each distinct experiment referenced by `batches` once
    async fn resolve_experiments(
        &self,
        batches: &[Batch],
    ) -> BatchdResult<HashMap<String, Experiment>> {
        let ids: Vec<String> = batches
            .iter()
            .map(|b| b.experiment_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        Ok(self
            .store
            .experiments(&ids)
            .await?
            .into_iter()
            .map(|e| (e.id.clone(), e))
            .collect())
    }

    /// Write each placement as soon as it is decided, in FIFO order
    async fn persist(
        &self,
        decisions: Vec<PlacementDecision>,
        stats: &mut PassStats,
    ) -> Vec<PlacementDecision> {
        let mut placed = Vec::with_capacity(decisions.len());
        for decision in decisions {
            match self
                .store
                .schedule_batch(&decision.batch_id, &decision.node, Utc::now())
                .await
            {
                Ok(()) => {
                    debug!(
                        batch_id = %decision.batch_id,
                        node = %decision.node,
                        "Batch scheduled"
                    );
                    stats.placed += 1;
                    placed.push(decision);
                }
                Err(e) => {
                    warn!(
                        batch_id = %decision.batch_id,
                        node = %decision.node,
                        error = %e,
                        "Failed to persist placement"
                    );
                    stats.failed += 1;
                }
            }
        }
        placed
    }

    /// Hand pulls then runs to each node's agent; returns the pull count
    fn dispatch(&self, placed: &[PlacementDecision]) -> usize {
        let mut pulls = 0;
        for node in node_actions(placed) {
            let Some(agent) = self.agents.get(&node.node) else {
                continue;
            };
            for action in node.actions {
                if matches!(action, Action::PullImage { .. }) {
                    pulls += 1;
                }
                agent.put_action(action);
            }
        }
        pulls
    }
}
