//! Test doubles shared by the scheduler tests

use async_trait::async_trait;
use batchd_agent::{AgentRegistry, NodeAgent};
use batchd_core::{Action, Batch, BatchState, BatchdResult, Experiment, Node, NodeState};
use batchd_store::{MemoryStore, Store};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Agent that records every action and counts probes
pub struct RecordingAgent {
    node: String,
    actions: Mutex<Vec<Action>>,
    inspections: AtomicUsize,
    /// When set, a probe brings the node back online in this store
    recover_in: Option<Arc<dyn Store>>,
}

impl RecordingAgent {
    pub fn new(node: &str) -> Arc<Self> {
        Arc::new(Self {
            node: node.to_string(),
            actions: Mutex::new(Vec::new()),
            inspections: AtomicUsize::new(0),
            recover_in: None,
        })
    }

    pub fn recovering(node: &str, store: Arc<dyn Store>) -> Arc<Self> {
        Arc::new(Self {
            node: node.to_string(),
            actions: Mutex::new(Vec::new()),
            inspections: AtomicUsize::new(0),
            recover_in: Some(store),
        })
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    pub fn inspections(&self) -> usize {
        self.inspections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeAgent for RecordingAgent {
    fn node_name(&self) -> &str {
        &self.node
    }

    fn put_action(&self, action: Action) {
        self.actions.lock().unwrap().push(action);
    }

    async fn inspect_offline_node(&self) {
        self.inspections.fetch_add(1, Ordering::SeqCst);
        if let Some(store) = &self.recover_in {
            store
                .set_node_state(&self.node, NodeState::Online)
                .await
                .unwrap();
        }
    }
}

pub fn registry(agents: &[Arc<RecordingAgent>]) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.register(agent.clone());
    }
    registry
}

/// `MemoryStore` whose `registered_batches` is slow and tracks how many
/// calls overlap
pub struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl SlowStore {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        })
    }

    /// Most `registered_batches` calls seen running at once
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for SlowStore {
    async fn insert_node(&self, node: Node) -> BatchdResult<()> {
        self.inner.insert_node(node).await
    }

    async fn insert_batch(&self, batch: Batch) -> BatchdResult<()> {
        self.inner.insert_batch(batch).await
    }

    async fn insert_experiment(&self, experiment: Experiment) -> BatchdResult<()> {
        self.inner.insert_experiment(experiment).await
    }

    async fn nodes(&self, state: Option<NodeState>) -> BatchdResult<Vec<Node>> {
        self.inner.nodes(state).await
    }

    async fn set_node_state(&self, name: &str, state: NodeState) -> BatchdResult<()> {
        self.inner.set_node_state(name, state).await
    }

    async fn node_batches(&self, nodes: &[String], state: BatchState) -> BatchdResult<Vec<Batch>> {
        self.inner.node_batches(nodes, state).await
    }

    async fn registered_batches(&self) -> BatchdResult<Vec<Batch>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let batches = self.inner.registered_batches().await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        batches
    }

    async fn batch(&self, id: &str) -> BatchdResult<Option<Batch>> {
        self.inner.batch(id).await
    }

    async fn experiment(&self, id: &str) -> BatchdResult<Option<Experiment>> {
        self.inner.experiment(id).await
    }

    async fn experiments(&self, ids: &[String]) -> BatchdResult<Vec<Experiment>> {
        self.inner.experiments(ids).await
    }

    async fn count_unfinished_batches(&self) -> BatchdResult<u64> {
        self.inner.count_unfinished_batches().await
    }

    async fn schedule_batch(&self, id: &str, node: &str, time: DateTime<Utc>) -> BatchdResult<()> {
        self.inner.schedule_batch(id, node, time).await
    }

    async fn requeue_batch(&self, id: &str, node: &str, time: DateTime<Utc>) -> BatchdResult<bool> {
        self.inner.requeue_batch(id, node, time).await
    }

    async fn finish_batch(
        &self,
        id: &str,
        state: BatchState,
        time: DateTime<Utc>,
    ) -> BatchdResult<()> {
        self.inner.finish_batch(id, state, time).await
    }

    async fn voidable_batches(&self) -> BatchdResult<Vec<String>> {
        self.inner.voidable_batches().await
    }

    async fn voidable_experiments(&self) -> BatchdResult<Vec<String>> {
        self.inner.voidable_experiments().await
    }

    async fn batch_document(&self, id: &str) -> BatchdResult<Option<Value>> {
        self.inner.batch_document(id).await
    }

    async fn experiment_document(&self, id: &str) -> BatchdResult<Option<Value>> {
        self.inner.experiment_document(id).await
    }

    async fn store_voided_batch(&self, id: &str, document: Value) -> BatchdResult<bool> {
        self.inner.store_voided_batch(id, document).await
    }

    async fn store_voided_experiment(&self, id: &str, document: Value) -> BatchdResult<bool> {
        self.inner.store_voided_experiment(id, document).await
    }
}
