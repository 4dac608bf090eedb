//! In-process document store

use async_trait::async_trait;
use batchd_core::{
    Batch, BatchState, BatchdError, BatchdResult, Experiment, HistoryEntry, Node, NodeState,
};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::traits::Store;

const VOIDED_FLAG: &str = "protectedKeysVoided";

type Collection = BTreeMap<String, Value>;

#[derive(Default)]
struct Collections {
    nodes: Collection,
    batches: Collection,
    experiments: Collection,
}

/// Document store keeping every collection in memory.
///
/// Documents are stored as JSON values so fields unknown to the typed model
/// survive every update. A single lock guards all collections, which makes
/// each single-document update atomic.
pub struct MemoryStore {
    collections: RwLock<Collections>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(Collections::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every operation fail, as a lost database connection would
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> BatchdResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BatchdError::Store("store unavailable".to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn encode<T: Serialize>(record: &T) -> BatchdResult<Value> {
    Ok(serde_json::to_value(record)?)
}

fn decode<T: DeserializeOwned>(document: &Value) -> BatchdResult<T> {
    Ok(serde_json::from_value(document.clone())?)
}

fn insert_new(collection: &mut Collection, id: &str, document: Value) -> BatchdResult<()> {
    if collection.contains_key(id) {
        return Err(BatchdError::Store(format!("duplicate document id: {}", id)));
    }
    collection.insert(id.to_string(), document);
    Ok(())
}

fn field_str<'a>(document: &'a Value, key: &str) -> Option<&'a str> {
    document.get(key).and_then(Value::as_str)
}

fn batch_state(document: &Value) -> BatchdResult<BatchState> {
    let state = document
        .get("state")
        .cloned()
        .ok_or_else(|| BatchdError::Store("batch document without state".to_string()))?;
    Ok(serde_json::from_value(state)?)
}

fn is_voided(document: &Value) -> bool {
    document
        .get(VOIDED_FLAG)
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Apply a state transition in place: set state, push history, optionally
/// set node and bump attempts.
fn transition(
    document: &mut Value,
    state: BatchState,
    node: Option<&str>,
    time: DateTime<Utc>,
    increment_attempts: bool,
) -> BatchdResult<()> {
    let entry = encode(&HistoryEntry {
        state,
        time,
        node: node.map(str::to_string),
    })?;
    let object = document
        .as_object_mut()
        .ok_or_else(|| BatchdError::Store("batch document is not an object".to_string()))?;

    object.insert("state".to_string(), encode(&state)?);
    if let Some(node) = node {
        object.insert("node".to_string(), json!(node));
    }

    match object.get_mut("history").and_then(Value::as_array_mut) {
        Some(history) => history.push(entry),
        None => {
            object.insert("history".to_string(), json!([entry]));
        }
    }

    if increment_attempts {
        let attempts = object.get("attempts").and_then(Value::as_u64).unwrap_or(0);
        object.insert("attempts".to_string(), json!(attempts + 1));
    }
    Ok(())
}

fn replace_voided(collection: &mut Collection, id: &str, mut document: Value) -> BatchdResult<bool> {
    let current = collection
        .get(id)
        .ok_or_else(|| BatchdError::Store(format!("document not found: {}", id)))?;
    if is_voided(current) {
        return Ok(false);
    }

    let object = document
        .as_object_mut()
        .ok_or_else(|| BatchdError::Store("voided document is not an object".to_string()))?;
    object.insert(VOIDED_FLAG.to_string(), Value::Bool(true));
    collection.insert(id.to_string(), document);
    Ok(true)
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_node(&self, node: Node) -> BatchdResult<()> {
        self.check_available()?;
        let document = encode(&node)?;
        insert_new(&mut self.collections.write().await.nodes, &node.name, document)?;
        debug!(node = %node.name, ram = node.ram, state = %node.state, "Inserted node");
        Ok(())
    }

    async fn insert_batch(&self, batch: Batch) -> BatchdResult<()> {
        self.check_available()?;
        let document = encode(&batch)?;
        insert_new(&mut self.collections.write().await.batches, &batch.id, document)
    }

    async fn insert_experiment(&self, experiment: Experiment) -> BatchdResult<()> {
        self.check_available()?;
        let document = encode(&experiment)?;
        insert_new(
            &mut self.collections.write().await.experiments,
            &experiment.id,
            document,
        )
    }

    async fn nodes(&self, state: Option<NodeState>) -> BatchdResult<Vec<Node>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let mut nodes = Vec::new();
        for document in collections.nodes.values() {
            let node: Node = decode(document)?;
            if state.map_or(true, |s| node.state == s) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }

    async fn set_node_state(&self, name: &str, state: NodeState) -> BatchdResult<()> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let document = collections
            .nodes
            .get_mut(name)
            .ok_or_else(|| BatchdError::NodeNotFound(name.to_string()))?;
        document["state"] = encode(&state)?;
        Ok(())
    }

    async fn node_batches(&self, nodes: &[String], state: BatchState) -> BatchdResult<Vec<Batch>> {
        self.check_available()?;
        let wanted: HashSet<&str> = nodes.iter().map(String::as_str).collect();
        let collections = self.collections.read().await;
        let mut batches = Vec::new();
        for document in collections.batches.values() {
            let on_node = field_str(document, "node").map_or(false, |n| wanted.contains(n));
            if on_node && batch_state(document)? == state {
                batches.push(decode(document)?);
            }
        }
        Ok(batches)
    }

    async fn registered_batches(&self) -> BatchdResult<Vec<Batch>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let mut batches: Vec<Batch> = Vec::new();
        for document in collections.batches.values() {
            if batch_state(document)? == BatchState::Registered {
                batches.push(decode(document)?);
            }
        }
        batches.sort_by(|a, b| {
            a.registration_time
                .cmp(&b.registration_time)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(batches)
    }

    async fn batch(&self, id: &str) -> BatchdResult<Option<Batch>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        collections.batches.get(id).map(decode).transpose()
    }

    async fn experiment(&self, id: &str) -> BatchdResult<Option<Experiment>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        collections.experiments.get(id).map(decode).transpose()
    }

    async fn experiments(&self, ids: &[String]) -> BatchdResult<Vec<Experiment>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        ids.iter()
            .filter_map(|id| collections.experiments.get(id))
            .map(decode)
            .collect()
    }

    async fn count_unfinished_batches(&self) -> BatchdResult<u64> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let mut count = 0;
        for document in collections.batches.values() {
            if !batch_state(document)?.is_terminal() {
                count += 1;
            }
        }
        Ok(count)
    }

    async fn schedule_batch(&self, id: &str, node: &str, time: DateTime<Utc>) -> BatchdResult<()> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let document = collections
            .batches
            .get_mut(id)
            .ok_or_else(|| BatchdError::BatchNotFound(id.to_string()))?;

        let state = batch_state(document)?;
        if state != BatchState::Registered {
            return Err(BatchdError::Scheduler(format!(
                "batch {} is {}, not registered",
                id, state
            )));
        }
        transition(document, BatchState::Processing, Some(node), time, true)
    }

    async fn requeue_batch(&self, id: &str, node: &str, time: DateTime<Utc>) -> BatchdResult<bool> {
        self.check_available()?;
        let mut collections = self.collections.write().await;
        let document = collections
            .batches
            .get_mut(id)
            .ok_or_else(|| BatchdError::BatchNotFound(id.to_string()))?;

        let on_node = field_str(document, "node") == Some(node);
        if !on_node || batch_state(document)? != BatchState::Processing {
            return Ok(false);
        }
        transition(document, BatchState::Registered, None, time, false)?;
        document["node"] = Value::Null;
        debug!(batch_id = %id, node = %node, "Requeued batch");
        Ok(true)
    }

    async fn finish_batch(
        &self,
        id: &str,
        state: BatchState,
        time: DateTime<Utc>,
    ) -> BatchdResult<()> {
        self.check_available()?;
        if !state.is_terminal() {
            return Err(BatchdError::Store(format!(
                "{} is not a terminal state",
                state
            )));
        }

        let mut collections = self.collections.write().await;
        let document = collections
            .batches
            .get_mut(id)
            .ok_or_else(|| BatchdError::BatchNotFound(id.to_string()))?;
        if batch_state(document)?.is_terminal() {
            return Err(BatchdError::Store(format!("batch {} already finished", id)));
        }
        let node = field_str(document, "node").map(str::to_string);
        transition(document, state, node.as_deref(), time, false)
    }

    async fn voidable_batches(&self) -> BatchdResult<Vec<String>> {
        self.check_available()?;
        let collections = self.collections.read().await;
        let mut ids = Vec::new();
        for (id, document) in &collections.batches {
            if !is_voided(document) && batch_state(document)?.is_terminal() {
                ids.push(id.clone());
            }
        }
        Ok(ids)
    }

    async fn voidable_experiments(&self) -> BatchdResult<Vec<String>> {
        self.check_available()?;
        let collections = self.collections.read().await;

        let mut unfinished: HashSet<&str> = HashSet::new();
        for document in collections.batches.values() {
            if !batch_state(document)?.is_terminal() {
                if let Some(experiment_id) = field_str(document, "experimentId") {
                    unfinished.insert(experiment_id);
                }
            }
        }

        Ok(collections
            .experiments
            .iter()
            .filter(|(id, document)| !is_voided(document) && !unfinished.contains(id.as_str()))
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn batch_document(&self, id: &str) -> BatchdResult<Option<Value>> {
        self.check_available()?;
        Ok(self.collections.read().await.batches.get(id).cloned())
    }

    async fn experiment_document(&self, id: &str) -> BatchdResult<Option<Value>> {
        self.check_available()?;
        Ok(self.collections.read().await.experiments.get(id).cloned())
    }

    async fn store_voided_batch(&self, id: &str, document: Value) -> BatchdResult<bool> {
        self.check_available()?;
        replace_voided(&mut self.collections.write().await.batches, id, document)
    }

    async fn store_voided_experiment(&self, id: &str, document: Value) -> BatchdResult<bool> {
        self.check_available()?;
        replace_voided(&mut self.collections.write().await.experiments, id, document)
    }
}
