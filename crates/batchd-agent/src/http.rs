//! HTTP node agent proxy
//!
//! Actions are queued per node and delivered in order by a background task
//! that POSTs them as JSON to `{url}/actions`. When a delivery fails the node
//! is marked offline and every batch named by the undelivered actions goes
//! back to `registered`, so the next scheduling pass places it again.
//! Offline nodes are probed with `GET {url}/health`.

use async_trait::async_trait;
use batchd_core::{Action, BatchdError, BatchdResult, NodeState, TriggerQueue};
use batchd_store::Store;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::traits::NodeAgent;

/// Node agent reached over HTTP
pub struct HttpNodeAgent {
    node: String,
    health_url: String,
    client: reqwest::Client,
    store: Arc<dyn Store>,
    /// Scheduling queue, signalled when the node comes back online
    scheduling: TriggerQueue,
    actions: mpsc::UnboundedSender<Action>,
}

impl HttpNodeAgent {
    /// Create the agent and start its delivery task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        node: impl Into<String>,
        base_url: &str,
        store: Arc<dyn Store>,
        scheduling: TriggerQueue,
        timeout: Duration,
    ) -> BatchdResult<Arc<Self>> {
        let node = node.into();
        let base_url = base_url.trim_end_matches('/');
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BatchdError::Agent(format!("Failed to create HTTP client: {}", e)))?;

        let (actions, queue) = mpsc::unbounded_channel();
        let dispatcher = ActionDispatcher {
            node: node.clone(),
            actions_url: format!("{}/actions", base_url),
            client: client.clone(),
            store: store.clone(),
            scheduling: scheduling.clone(),
        };
        tokio::spawn(dispatcher.run(queue));

        Ok(Arc::new(Self {
            node,
            health_url: format!("{}/health", base_url),
            client,
            store,
            scheduling,
            actions,
        }))
    }

    async fn probe(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                debug!(
                    node = %self.node,
                    status = %response.status(),
                    "Node health probe rejected"
                );
                false
            }
            Err(e) => {
                debug!(node = %self.node, error = %e, "Node unreachable");
                false
            }
        }
    }
}

#[async_trait]
impl NodeAgent for HttpNodeAgent {
    fn node_name(&self) -> &str {
        &self.node
    }

    fn put_action(&self, action: Action) {
        if self.actions.send(action).is_err() {
            warn!(node = %self.node, "Action queue closed, dropping action");
        }
    }

    async fn inspect_offline_node(&self) {
        if !self.probe().await {
            return;
        }

        match self.store.set_node_state(&self.node, NodeState::Online).await {
            Ok(()) => {
                info!(node = %self.node, "Node back online");
                self.scheduling.signal();
            }
            Err(e) => {
                warn!(node = %self.node, error = %e, "Failed to mark node online");
            }
        }
    }
}

/// Delivers queued actions of one node in order
struct ActionDispatcher {
    node: String,
    actions_url: String,
    client: reqwest::Client,
    store: Arc<dyn Store>,
    scheduling: TriggerQueue,
}

/// Batches an action was sent for
fn batch_ids(action: &Action) -> Vec<&str> {
    match action {
        Action::CleanUp => Vec::new(),
        Action::PullImage { required_by, .. } => required_by.iter().map(String::as_str).collect(),
        Action::RunBatchContainer { batch_id } => vec![batch_id.as_str()],
    }
}

impl ActionDispatcher {
    async fn run(self, mut queue: mpsc::UnboundedReceiver<Action>) {
        while let Some(action) = queue.recv().await {
            if let Err(e) = self.deliver(&action).await {
                warn!(
                    node = %self.node,
                    action = action.kind(),
                    error = %e,
                    "Action delivery failed, marking node offline"
                );
                let mut undelivered = vec![action];
                while let Ok(action) = queue.try_recv() {
                    undelivered.push(action);
                }

                // Offline first, so the requeued batches are not placed here again
                self.mark_offline().await;
                self.requeue(&undelivered).await;
            }
        }
    }

    async fn deliver(&self, action: &Action) -> BatchdResult<()> {
        let response = self
            .client
            .post(&self.actions_url)
            .json(action)
            .send()
            .await
            .map_err(|e| BatchdError::Agent(e.to_string()))?;

        if !response.status().is_success() {
            return Err(BatchdError::Agent(format!(
                "agent answered {}",
                response.status()
            )));
        }

        debug!(node = %self.node, action = action.kind(), "Action delivered");
        Ok(())
    }

    /// Return the batches of undelivered actions to `registered`
    async fn requeue(&self, undelivered: &[Action]) {
        let mut ids: Vec<&str> = Vec::new();
        for id in undelivered.iter().flat_map(batch_ids) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }

        let mut requeued = 0;
        for id in ids {
            match self.store.requeue_batch(id, &self.node, Utc::now()).await {
                Ok(true) => requeued += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(node = %self.node, batch_id = %id, error = %e, "Failed to requeue batch");
                }
            }
        }

        debug!(
            node = %self.node,
            dropped = undelivered.len(),
            requeued = requeued,
            "Dropped undelivered actions"
        );
        if requeued > 0 {
            self.scheduling.signal();
        }
    }

    async fn mark_offline(&self) {
        if let Err(e) = self.store.set_node_state(&self.node, NodeState::Offline).await {
            warn!(node = %self.node, error = %e, "Failed to mark node offline");
        }
    }
}
