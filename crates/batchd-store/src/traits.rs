//! Store trait definitions

use async_trait::async_trait;
use batchd_core::{Batch, BatchState, BatchdResult, Experiment, Node, NodeState};
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Document store holding the `nodes`, `batches` and `experiments` collections.
///
/// Every write touches a single document atomically; nothing here spans
/// multiple documents.
#[async_trait]
pub trait Store: Send + Sync {
    /// Add a node document
    async fn insert_node(&self, node: Node) -> BatchdResult<()>;

    /// Add a batch document
    async fn insert_batch(&self, batch: Batch) -> BatchdResult<()>;

    /// Add an experiment document
    async fn insert_experiment(&self, experiment: Experiment) -> BatchdResult<()>;

    /// List nodes, optionally filtered by state, ordered by name
    async fn nodes(&self, state: Option<NodeState>) -> BatchdResult<Vec<Node>>;

    /// Update the state of a node
    async fn set_node_state(&self, name: &str, state: NodeState) -> BatchdResult<()>;

    /// Batches in `state` placed on any of `nodes`
    async fn node_batches(&self, nodes: &[String], state: BatchState) -> BatchdResult<Vec<Batch>>;

    /// Batches waiting for placement, oldest registration first
    async fn registered_batches(&self) -> BatchdResult<Vec<Batch>>;

    /// Fetch one batch
    async fn batch(&self, id: &str) -> BatchdResult<Option<Batch>>;

    /// Fetch one experiment
    async fn experiment(&self, id: &str) -> BatchdResult<Option<Experiment>>;

    /// Fetch the experiments with the given ids; unknown ids are left out
    async fn experiments(&self, ids: &[String]) -> BatchdResult<Vec<Experiment>>;

    /// Number of batches not yet in a terminal state
    async fn count_unfinished_batches(&self) -> BatchdResult<u64>;

    /// Move a registered batch to `processing` on `node`: set state and node,
    /// push a history entry and increment attempts in one update
    async fn schedule_batch(&self, id: &str, node: &str, time: DateTime<Utc>) -> BatchdResult<()>;

    /// Return a batch that is `processing` on `node` to `registered`: clear
    /// the node and push a history entry in one update. Returns false when
    /// the batch is no longer processing on that node.
    async fn requeue_batch(&self, id: &str, node: &str, time: DateTime<Utc>) -> BatchdResult<bool>;

    /// Record a completion report from a node agent
    async fn finish_batch(&self, id: &str, state: BatchState, time: DateTime<Utc>)
        -> BatchdResult<()>;

    /// Ids of terminal batches whose protected keys are not voided yet
    async fn voidable_batches(&self) -> BatchdResult<Vec<String>>;

    /// Ids of unvoided experiments whose batches are all terminal
    async fn voidable_experiments(&self) -> BatchdResult<Vec<String>>;

    /// Raw batch document
    async fn batch_document(&self, id: &str) -> BatchdResult<Option<Value>>;

    /// Raw experiment document
    async fn experiment_document(&self, id: &str) -> BatchdResult<Option<Value>>;

    /// Replace a batch document with its redacted form and set
    /// `protectedKeysVoided`. Returns false if it was already voided.
    async fn store_voided_batch(&self, id: &str, document: Value) -> BatchdResult<bool>;

    /// Replace an experiment document with its redacted form and set
    /// `protectedKeysVoided`. Returns false if it was already voided.
    async fn store_voided_experiment(&self, id: &str, document: Value) -> BatchdResult<bool>;
}
