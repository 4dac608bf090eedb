//! Background loops driving placement, inspection and voiding
//!
//! Each loop is a worker function over a shared read-only
//! [`SchedulerContext`]. Loops only talk to each other through
//! [`TriggerQueue`]s and the store:
//!
//! - cron: every interval, signals scheduling while unfinished batches exist
//! - scheduling: signals inspection and voiding, runs one placement pass,
//!   then broadcasts `clean_up` to online nodes
//! - inspection: probes offline nodes
//! - voiding: redacts records that reached a terminal state
//!
//! The scheduling worker is the only caller of [`Scheduler::run_pass`], so
//! placement passes never overlap.

use batchd_agent::AgentRegistry;
use batchd_core::{BatchdResult, RedactionConfig, SchedulingConfig, TriggerQueue};
use batchd_store::Store;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::inspection::inspect_offline_nodes;
use crate::redaction::Redactor;
use crate::scheduler::Scheduler;
use crate::voiding::run_voiding_pass;

/// Wake-up queues of the scheduling, inspection and voiding loops
#[derive(Clone, Default)]
pub struct Triggers {
    pub scheduling: TriggerQueue,
    pub inspection: TriggerQueue,
    pub voiding: TriggerQueue,
}

impl Triggers {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Everything the loops read; nothing in here is mutated after start
pub struct SchedulerContext {
    scheduler: Arc<Scheduler>,
    redactor: Redactor,
    cron_interval: Duration,
}

impl SchedulerContext {
    pub fn new(
        store: Arc<dyn Store>,
        agents: AgentRegistry,
        scheduling: &SchedulingConfig,
        redaction: &RedactionConfig,
    ) -> Self {
        Self {
            scheduler: Arc::new(Scheduler::new(store, agents, scheduling.strategy)),
            redactor: Redactor::new(redaction),
            cron_interval: scheduling.cron_interval(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.scheduler.store()
    }

    pub fn agents(&self) -> &AgentRegistry {
        self.scheduler.agents()
    }
}

/// Starts the background loops
pub struct Orchestrator;

impl Orchestrator {
    /// Spawn the four loops and request an initial scheduling pass.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(context: SchedulerContext, triggers: Triggers) -> OrchestratorHandle {
        let context = Arc::new(context);
        info!(
            cron_interval_secs = context.cron_interval.as_secs(),
            "Starting scheduling loops"
        );

        let tasks = [
            tokio::spawn(cron_worker(context.clone(), triggers.clone())),
            tokio::spawn(scheduling_worker(context.clone(), triggers.clone())),
            tokio::spawn(inspection_worker(context.clone(), triggers.inspection.clone())),
            tokio::spawn(voiding_worker(context, triggers.voiding.clone())),
        ]
        .iter()
        .map(|task| task.abort_handle())
        .collect();

        triggers.scheduling.signal();
        OrchestratorHandle { triggers, tasks }
    }
}

/// Handle to running loops
#[derive(Clone)]
pub struct OrchestratorHandle {
    triggers: Triggers,
    tasks: Arc<[AbortHandle]>,
}

impl OrchestratorHandle {
    /// Request a scheduling pass
    pub fn schedule(&self) {
        self.triggers.scheduling.signal();
    }

    pub fn triggers(&self) -> &Triggers {
        &self.triggers
    }

    /// Stop all loops. No further pass starts; a pass already running
    /// finishes on its own task.
    pub fn shutdown(&self) {
        for task in self.tasks.iter() {
            task.abort();
        }
        info!("Scheduling loops stopped");
    }
}

/// Run one pass on its own task so an error or panic only ends that pass
async fn guarded<T, F>(worker: &'static str, pass: F) -> Option<T>
where
    T: Send + 'static,
    F: Future<Output = BatchdResult<T>> + Send + 'static,
{
    match tokio::spawn(pass).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            warn!(worker = worker, error = %e, "Pass failed");
            None
        }
        Err(e) => {
            error!(worker = worker, error = %e, "Pass panicked");
            None
        }
    }
}

async fn cron_worker(context: Arc<SchedulerContext>, triggers: Triggers) {
    let mut ticker = tokio::time::interval(context.cron_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match context.store().count_unfinished_batches().await {
            Ok(0) => debug!("No unfinished batches"),
            Ok(unfinished) => {
                debug!(unfinished = unfinished, "Unfinished batches, requesting pass");
                triggers.scheduling.signal();
            }
            Err(e) => warn!(error = %e, "Failed to count unfinished batches"),
        }
    }
}

async fn scheduling_worker(context: Arc<SchedulerContext>, triggers: Triggers) {
    loop {
        triggers.scheduling.wait().await;
        triggers.inspection.signal();
        triggers.voiding.signal();

        let scheduler = context.scheduler.clone();
        guarded("scheduling", async move { scheduler.run_pass().await }).await;

        let scheduler = context.scheduler.clone();
        guarded("clean_up", async move { scheduler.broadcast_clean_up().await }).await;
    }
}

async fn inspection_worker(context: Arc<SchedulerContext>, trigger: TriggerQueue) {
    loop {
        trigger.wait().await;
        let context = context.clone();
        guarded("inspection", async move {
            inspect_offline_nodes(context.store().as_ref(), context.agents()).await
        })
        .await;
    }
}

async fn voiding_worker(context: Arc<SchedulerContext>, trigger: TriggerQueue) {
    loop {
        trigger.wait().await;
        let context = context.clone();
        guarded("voiding", async move {
            run_voiding_pass(context.store().as_ref(), &context.redactor).await
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{registry, RecordingAgent, SlowStore};
    use batchd_core::{Action, Batch, BatchState, Experiment, Node, NodeState, PlacementStrategy};
    use batchd_store::MemoryStore;
    use chrono::Utc;
    use serde_json::json;

    fn context(store: Arc<dyn Store>, agents: AgentRegistry, cron_ms: u64) -> SchedulerContext {
        let mut context = SchedulerContext::new(
            store,
            agents,
            &SchedulingConfig {
                strategy: PlacementStrategy::Spread,
                cron_interval_secs: 60,
            },
            &RedactionConfig {
                salt: "salt".to_string(),
                iterations: 1,
            },
        );
        context.cron_interval = Duration::from_millis(cron_ms);
        context
    }

    async fn batch_state(store: &MemoryStore, id: &str) -> BatchState {
        store.batch(id).await.unwrap().unwrap().state
    }

    async fn seeded_store() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_node(Node::new("A", NodeState::Online, 8))
            .await
            .unwrap();
        store
            .insert_experiment(Experiment::new("exp", "img", 4))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_initial_pass_places_and_cleans_up() {
        let store = seeded_store().await;
        store
            .insert_batch(Batch::new("exp", Utc::now()).with_id("b1"))
            .await
            .unwrap();
        let a = RecordingAgent::new("A");

        let handle = Orchestrator::start(
            context(store.clone(), registry(&[a.clone()]), 60_000),
            Triggers::new(),
        );

        let mut placed = false;
        for _ in 0..100 {
            if batch_state(&store, "b1").await == BatchState::Processing
                && a.actions().contains(&Action::CleanUp)
            {
                placed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(placed);

        let actions = a.actions();
        let run = actions
            .iter()
            .position(|action| matches!(action, Action::RunBatchContainer { .. }))
            .unwrap();
        let clean_up = actions.iter().position(|action| *action == Action::CleanUp).unwrap();
        assert!(run < clean_up);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_cron_picks_up_unsignalled_batches() {
        let store = seeded_store().await;
        let handle = Orchestrator::start(
            context(store.clone(), registry(&[RecordingAgent::new("A")]), 50),
            Triggers::new(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        store
            .insert_batch(Batch::new("exp", Utc::now()).with_id("late"))
            .await
            .unwrap();

        let mut state = batch_state(&store, "late").await;
        for _ in 0..100 {
            if state == BatchState::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            state = batch_state(&store, "late").await;
        }
        assert_eq!(state, BatchState::Processing);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_scheduling_triggers_voiding_and_inspection() {
        let store = seeded_store().await;
        store
            .insert_node(Node::new("B", NodeState::Offline, 8))
            .await
            .unwrap();
        let t = Utc::now();
        let batch = Batch::new("exp", t)
            .with_id("done")
            .with_field("inputs", json!({"access": {"password": "secret"}}));
        store.insert_batch(batch).await.unwrap();
        store.schedule_batch("done", "A", t).await.unwrap();
        store
            .finish_batch("done", BatchState::Succeeded, t)
            .await
            .unwrap();

        let b = RecordingAgent::new("B");
        let handle = Orchestrator::start(
            context(store.clone(), registry(&[RecordingAgent::new("A"), b.clone()]), 60_000),
            Triggers::new(),
        );

        let mut voided = false;
        for _ in 0..100 {
            voided = store.batch("done").await.unwrap().unwrap().protected_keys_voided;
            if voided && b.inspections() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(voided);
        assert!(b.inspections() > 0);
        assert!(store.experiment("exp").await.unwrap().unwrap().protected_keys_voided);

        let document = store.batch_document("done").await.unwrap().unwrap();
        assert_ne!(document["inputs"]["access"]["password"], "secret");

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_failing_store_does_not_stop_loops() {
        let store = seeded_store().await;
        store.set_unavailable(true);
        let a = RecordingAgent::new("A");
        let handle = Orchestrator::start(
            context(store.clone(), registry(&[a.clone()]), 60_000),
            Triggers::new(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        store.set_unavailable(false);
        store
            .insert_batch(Batch::new("exp", Utc::now()).with_id("b1"))
            .await
            .unwrap();
        handle.schedule();

        let mut state = batch_state(&store, "b1").await;
        for _ in 0..100 {
            if state == BatchState::Processing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            state = batch_state(&store, "b1").await;
        }
        assert_eq!(state, BatchState::Processing);

        handle.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_placement_passes_never_overlap() {
        let store = SlowStore::new(Duration::from_millis(50));
        store
            .insert_node(Node::new("A", NodeState::Online, 8))
            .await
            .unwrap();
        let handle = Orchestrator::start(
            context(store.clone(), registry(&[RecordingAgent::new("A")]), 60_000),
            Triggers::new(),
        );

        for _ in 0..20 {
            handle.schedule();
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(store.peak(), 1);
        let passes = store.calls();
        assert!((1..=2).contains(&passes), "burst ran {} passes", passes);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_new_passes() {
        let store = seeded_store().await;
        let handle = Orchestrator::start(
            context(store.clone(), registry(&[RecordingAgent::new("A")]), 50),
            Triggers::new(),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.shutdown();
        tokio::task::yield_now().await;

        store
            .insert_batch(Batch::new("exp", Utc::now()).with_id("after"))
            .await
            .unwrap();
        handle.schedule();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(batch_state(&store, "after").await, BatchState::Registered);
    }
}
