//! Retryable serialisable transactions with operation labels
//!
//! Every multi-statement mutation in the engine goes through
//! [`TransactionRunner::run`]. Commits are serialised per campaign (or under
//! the `system` key) by a commit mutex, which prevents the
//! check-then-apply race between two writers on the same campaign: a closure
//! reads, stages writes into per-tree batches, and the batches are applied
//! while the mutex is held. Transient storage errors re-run the closure up to
//! the configured limit with a fixed inter-attempt delay; cancellation aborts
//! between attempts.
//!
//! Staged batches are applied in a fixed tree order ending with the config
//! state. Generated-domain rows are deterministic per offset, so a crash
//! between tree applies is healed by idempotent re-generation of the same
//! offsets.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::campaign::{Campaign, CampaignId, GeneratedDomain, GenerationBatch, PhaseParams, StateTransitionRecord};
use crate::concurrency::CancelToken;
use crate::error::{DomainFlowError, EngineResult};
use crate::genconfig::GenerationConfigState;
use crate::locks::ResourceLock;
use crate::sse::SseEvent;
use crate::storage::store::{trees, StateStore};
use crate::storage::keys;
use crate::worker::WorkerRecord;

/// Options for one wrapped transaction
#[derive(Debug, Clone)]
pub struct TxOptions {
    /// Operation label for logs and metrics
    pub operation: String,
    /// Campaign whose commit lock serialises the transaction; `None` uses `system`
    pub campaign_id: Option<CampaignId>,
    /// Wall-clock budget across all attempts
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
}

impl TxOptions {
    /// Options for a campaign-scoped operation
    pub fn for_campaign(operation: &str, campaign_id: CampaignId) -> Self {
        Self { operation: operation.to_string(), campaign_id: Some(campaign_id), ..Self::system(operation) }
    }

    /// Options for a system-scoped operation
    pub fn system(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            campaign_id: None,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(100),
        }
    }
}

/// Staging context handed to transaction closures
///
/// Reads go straight to the store (the commit mutex makes them repeatable for
/// the transaction's scope); writes are staged and applied on commit.
pub struct Tx<'a> {
    store: &'a StateStore,
    staged: BTreeMap<&'static str, sled::Batch>,
}

impl<'a> Tx<'a> {
    fn new(store: &'a StateStore) -> Self {
        Self { store, staged: BTreeMap::new() }
    }

    /// Read access to the store
    pub fn store(&self) -> &StateStore {
        self.store
    }

    fn stage<T: serde::Serialize>(&mut self, tree: &'static str, key: Vec<u8>, value: &T) -> EngineResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.staged.entry(tree).or_default().insert(key, bytes);
        Ok(())
    }

    fn stage_remove(&mut self, tree: &'static str, key: Vec<u8>) {
        self.staged.entry(tree).or_default().remove(key);
    }

    /// Stage a campaign row
    pub fn put_campaign(&mut self, campaign: &Campaign) -> EngineResult<()> {
        self.stage(trees::CAMPAIGNS, campaign.id.to_string().into_bytes(), campaign)
    }

    /// Stage phase parameters
    pub fn put_phase_params(&mut self, id: CampaignId, params: &PhaseParams) -> EngineResult<()> {
        self.stage(trees::CAMPAIGN_PARAMS, id.to_string().into_bytes(), params)
    }

    /// Stage a generated-domain row
    pub fn put_domain(&mut self, row: &GeneratedDomain) -> EngineResult<()> {
        self.stage(trees::GENERATED_DOMAINS, keys::domain_key(row.campaign_id, row.offset_index), row)
    }

    /// Stage a batch row
    pub fn put_batch(&mut self, batch: &GenerationBatch) -> EngineResult<()> {
        self.stage(trees::BATCHES, keys::batch_key(batch.campaign_id, batch.batch_number), batch)
    }

    /// Stage a config state row
    pub fn put_config_state(&mut self, state: &GenerationConfigState) -> EngineResult<()> {
        self.stage(trees::CONFIG_STATES, state.config_hash.clone().into_bytes(), state)
    }

    /// Stage a worker coordination row
    pub fn put_worker(&mut self, record: &WorkerRecord) -> EngineResult<()> {
        self.stage(trees::WORKERS, record.worker_id.clone().into_bytes(), record)
    }

    /// Stage worker row deletion
    pub fn delete_worker(&mut self, worker_id: &str) {
        self.stage_remove(trees::WORKERS, worker_id.as_bytes().to_vec());
    }

    /// Stage a lock row
    pub fn put_lock(&mut self, lock: &ResourceLock) -> EngineResult<()> {
        self.stage(
            trees::RESOURCE_LOCKS,
            keys::lock_key(&lock.resource_type, &lock.resource_id, &lock.lock_id),
            lock,
        )
    }

    /// Stage lock row deletion
    pub fn delete_lock(&mut self, lock: &ResourceLock) {
        self.stage_remove(
            trees::RESOURCE_LOCKS,
            keys::lock_key(&lock.resource_type, &lock.resource_id, &lock.lock_id),
        );
    }

    /// Stage a state-transition record
    pub fn put_transition(&mut self, record: &StateTransitionRecord) -> EngineResult<()> {
        self.stage(
            trees::STATE_TRANSITIONS,
            keys::transition_key(record.campaign_id, record.sequence),
            record,
        )
    }

    /// Stage an event-log append
    pub fn put_event(&mut self, event: &SseEvent) -> EngineResult<()> {
        let nanos = event.timestamp.timestamp_nanos_opt().unwrap_or(0);
        self.stage(trees::SSE_EVENTS, keys::log_key(nanos, &event.id.to_string()), event)
    }

    fn commit(mut self) -> EngineResult<()> {
        // Domain rows apply before the config state so the cursor never
        // advances ahead of its rows; an interruption in between is healed by
        // idempotent re-generation of the same offsets
        const APPLY_ORDER: [&str; 9] = [
            trees::GENERATED_DOMAINS,
            trees::BATCHES,
            trees::CAMPAIGNS,
            trees::CAMPAIGN_PARAMS,
            trees::WORKERS,
            trees::RESOURCE_LOCKS,
            trees::STATE_TRANSITIONS,
            trees::SSE_EVENTS,
            trees::CONFIG_STATES,
        ];
        for tree in APPLY_ORDER {
            if let Some(batch) = self.staged.remove(tree) {
                self.store.tree(tree)?.apply_batch(batch)?;
            }
        }
        for (tree, batch) in self.staged {
            self.store.tree(tree)?.apply_batch(batch)?;
        }
        self.store.flush()
    }
}

/// Runs closures inside retryable, commit-serialised transactions
pub struct TransactionRunner {
    store: Arc<StateStore>,
    commit_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TransactionRunner {
    /// Create a runner over the store
    pub fn new(store: Arc<StateStore>) -> Self {
        Self { store, commit_locks: DashMap::new() }
    }

    /// The store this runner commits to
    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    fn commit_lock(&self, opts: &TxOptions) -> Arc<Mutex<()>> {
        let key = opts.campaign_id.map(|id| id.to_string()).unwrap_or_else(|| "system".to_string());
        self.commit_locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Run `f` inside a transaction, retrying transient failures
    pub async fn run<T, F>(&self, token: &CancelToken, opts: TxOptions, mut f: F) -> EngineResult<T>
    where
        F: FnMut(&mut Tx<'_>) -> EngineResult<T>,
    {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if token.is_cancelled() {
                return Err(DomainFlowError::Cancelled(opts.operation.clone()));
            }
            if started.elapsed() > opts.timeout {
                return Err(DomainFlowError::Timeout {
                    operation: opts.operation.clone(),
                    timeout_ms: opts.timeout.as_millis() as u64,
                });
            }

            let result = {
                let lock = self.commit_lock(&opts);
                let _guard = lock.lock();
                let mut tx = Tx::new(&self.store);
                match f(&mut tx) {
                    Ok(value) => tx.commit().map(|_| value),
                    Err(err) => Err(err),
                }
            };

            match result {
                Ok(value) => {
                    metrics::histogram!(
                        "transaction_duration_seconds",
                        "operation" => opts.operation.clone()
                    )
                    .record(started.elapsed().as_secs_f64());
                    debug!(
                        operation = %opts.operation,
                        attempts = attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "transaction committed"
                    );
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt <= opts.max_retries => {
                    metrics::counter!(
                        "transaction_retries_total",
                        "operation" => opts.operation.clone()
                    )
                    .increment(1);
                    warn!(
                        operation = %opts.operation,
                        attempt,
                        error = %err,
                        "transaction attempt failed, retrying"
                    );
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(DomainFlowError::Cancelled(opts.operation.clone()));
                        }
                        _ = tokio::time::sleep(opts.retry_delay) => {}
                    }
                }
                Err(err) => {
                    metrics::counter!(
                        "transaction_failures_total",
                        "operation" => opts.operation.clone()
                    )
                    .increment(1);
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{CampaignType, ExecutionMode};
    use tempfile::TempDir;

    fn runner() -> (TempDir, TransactionRunner) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(dir.path()).unwrap());
        (dir, TransactionRunner::new(store))
    }

    #[tokio::test]
    async fn commit_applies_staged_writes() {
        let (_dir, runner) = runner();
        let token = CancelToken::new();
        let campaign = Campaign::new("user-1", CampaignType::Generation, ExecutionMode::SinglePhase);
        let id = campaign.id;
        runner
            .run(&token, TxOptions::for_campaign("create_campaign", id), |tx| {
                tx.put_campaign(&campaign)?;
                tx.put_batch(&GenerationBatch::new(id, 1, 50))?;
                Ok(())
            })
            .await
            .unwrap();
        assert!(runner.store().load_campaign(id).unwrap().is_some());
        assert_eq!(runner.store().batches_for_campaign(id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn closure_error_discards_staged_writes() {
        let (_dir, runner) = runner();
        let token = CancelToken::new();
        let campaign = Campaign::new("user-1", CampaignType::Generation, ExecutionMode::SinglePhase);
        let id = campaign.id;
        let result: EngineResult<()> = runner
            .run(&token, TxOptions::for_campaign("failing_op", id), |tx| {
                tx.put_campaign(&campaign)?;
                Err(DomainFlowError::Business("abort".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(runner.store().load_campaign(id).unwrap().is_none());
    }

    #[tokio::test]
    async fn retryable_errors_rerun_the_closure() {
        let (_dir, runner) = runner();
        let token = CancelToken::new();
        let mut opts = TxOptions::system("flaky_op");
        opts.retry_delay = Duration::from_millis(1);
        let mut attempts = 0;
        let value = runner
            .run(&token, opts, |_tx| {
                attempts += 1;
                if attempts < 3 {
                    Err(DomainFlowError::Storage("transient".into()))
                } else {
                    Ok(attempts)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn cancellation_aborts_before_attempt() {
        let (_dir, runner) = runner();
        let token = CancelToken::new();
        token.cancel();
        let result: EngineResult<()> =
            runner.run(&token, TxOptions::system("cancelled_op"), |_tx| Ok(())).await;
        assert!(matches!(result, Err(DomainFlowError::Cancelled(_))));
    }

    #[tokio::test]
    async fn business_errors_do_not_retry() {
        let (_dir, runner) = runner();
        let token = CancelToken::new();
        let mut attempts = 0;
        let result: EngineResult<()> = runner
            .run(&token, TxOptions::system("rejecting_op"), |_tx| {
                attempts += 1;
                Err(DomainFlowError::Business("illegal".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
    }
}
