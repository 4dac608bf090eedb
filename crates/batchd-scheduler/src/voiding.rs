//! Voiding pass: redact records that reached a terminal state

use batchd_core::{BatchdError, BatchdResult};
use batchd_store::Store;
use serde_json::Value;
use tracing::{debug, info};

use crate::redaction::Redactor;

/// Summary of one voiding pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoidingStats {
    /// Batches flagged as voided
    pub batches: usize,
    /// Experiments flagged as voided
    pub experiments: usize,
    /// Values replaced by markers
    pub values: usize,
}

/// Redact every eligible batch, then every experiment whose batches have all
/// finished. Any store error abandons the pass; rerunning it is safe.
pub async fn run_voiding_pass(store: &dyn Store, redactor: &Redactor) -> BatchdResult<VoidingStats> {
    let mut stats = VoidingStats::default();

    for id in store.voidable_batches().await? {
        let Some(document) = store.batch_document(&id).await? else {
            continue;
        };
        let (document, values) = redact_blocking(redactor, document).await?;
        if store.store_voided_batch(&id, document).await? {
            debug!(batch_id = %id, values = values, "Batch voided");
            stats.batches += 1;
            stats.values += values;
        }
    }

    for id in store.voidable_experiments().await? {
        let Some(document) = store.experiment_document(&id).await? else {
            continue;
        };
        let (document, values) = redact_blocking(redactor, document).await?;
        if store.store_voided_experiment(&id, document).await? {
            debug!(experiment_id = %id, values = values, "Experiment voided");
            stats.experiments += 1;
            stats.values += values;
        }
    }

    if stats.batches > 0 || stats.experiments > 0 {
        info!(
            batches = stats.batches,
            experiments = stats.experiments,
            values = stats.values,
            "Voiding pass complete"
        );
    }
    Ok(stats)
}

/// Key derivation is CPU bound; keep it off the async workers
async fn redact_blocking(redactor: &Redactor, mut document: Value) -> BatchdResult<(Value, usize)> {
    let redactor = redactor.clone();
    tokio::task::spawn_blocking(move || {
        let values = redactor.void_record(&mut document);
        (document, values)
    })
    .await
    .map_err(|e| BatchdError::Internal(format!("redaction task failed: {}", e)))
}
