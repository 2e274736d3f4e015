//! Worker coordinator

use chrono::Utc;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::campaign::{BatchStatus, CampaignId, CampaignType, GenerationBatch};
use crate::concurrency::CancelToken;
use crate::config::WorkerCoordinationConfig;
use crate::error::EngineResult;
use crate::storage::{TransactionRunner, TxOptions};
use crate::worker::{WorkerRecord, WorkerStatus};

/// Counts emitted by one stale-cleanup sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Coordination rows purged
    pub stale_workers: u64,
    /// Batches reverted to pending
    pub reverted_batches: u64,
    /// Expired resource locks reclaimed
    pub expired_locks: u64,
}

/// Coordinates one worker's registration, heartbeat, and batch intake
pub struct WorkerCoordinator {
    runner: Arc<TransactionRunner>,
    worker_id: String,
    config: WorkerCoordinationConfig,
    heartbeat_running: AtomicBool,
}

impl WorkerCoordinator {
    /// Create a coordinator for `worker_id`
    pub fn new(runner: Arc<TransactionRunner>, worker_id: impl Into<String>, config: WorkerCoordinationConfig) -> Self {
        Self { runner, worker_id: worker_id.into(), config, heartbeat_running: AtomicBool::new(false) }
    }

    /// This coordinator's worker identity
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Upsert the coordination row to `idle` with a fresh heartbeat
    pub async fn register(
        &self,
        token: &CancelToken,
        campaign_id: Option<CampaignId>,
        kind: CampaignType,
    ) -> EngineResult<()> {
        let worker_id = self.worker_id.clone();
        self.runner
            .run(token, TxOptions::system("register_worker"), move |tx| {
                let record = match tx.store().load_worker(&worker_id)? {
                    Some(mut existing) => {
                        existing.campaign_id = campaign_id;
                        existing.kind = kind;
                        existing.status = WorkerStatus::Idle;
                        existing.last_heartbeat = Utc::now();
                        existing
                    }
                    None => WorkerRecord::new(worker_id.clone(), campaign_id, kind),
                };
                tx.put_worker(&record)?;
                Ok(())
            })
            .await?;
        info!(worker_id = %self.worker_id, "worker registered");
        Ok(())
    }

    /// Launch the heartbeat loop; idempotent
    ///
    /// Heartbeat failures are logged but never cancel the worker. The loop
    /// stops when `token` is cancelled.
    pub fn start_heartbeat(self: &Arc<Self>, token: CancelToken) {
        if self.heartbeat_running.swap(true, Ordering::SeqCst) {
            return;
        }
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(coordinator.config.heartbeat());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(worker_id = %coordinator.worker_id, "heartbeat loop stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        if let Err(err) = coordinator.beat(&token).await {
                            warn!(worker_id = %coordinator.worker_id, error = %err, "heartbeat failed");
                        }
                    }
                }
            }
            coordinator.heartbeat_running.store(false, Ordering::SeqCst);
        });
    }

    /// Write one heartbeat
    pub async fn beat(&self, token: &CancelToken) -> EngineResult<()> {
        let worker_id = self.worker_id.clone();
        self.runner
            .run(token, TxOptions::system("worker_heartbeat"), move |tx| {
                if let Some(mut record) = tx.store().load_worker(&worker_id)? {
                    record.last_heartbeat = Utc::now();
                    tx.put_worker(&record)?;
                }
                Ok(())
            })
            .await
    }

    /// Advance the worker's status and metadata
    pub async fn update_status(
        &self,
        token: &CancelToken,
        campaign_id: Option<CampaignId>,
        new_status: WorkerStatus,
        operation: &str,
    ) -> EngineResult<()> {
        let worker_id = self.worker_id.clone();
        let operation_label = operation.to_string();
        let mut opts = TxOptions::system("update_worker_status");
        opts.campaign_id = campaign_id;
        self.runner
            .run(token, opts, move |tx| {
                if let Some(mut record) = tx.store().load_worker(&worker_id)? {
                    record.status = new_status;
                    record.campaign_id = campaign_id;
                    record.last_heartbeat = Utc::now();
                    record.metadata = json!({ "last_operation": operation_label });
                    tx.put_worker(&record)?;
                }
                Ok(())
            })
            .await
    }

    /// Atomically pick the lowest-numbered pending batch of a campaign
    ///
    /// Marks the batch `assigned` to this worker and stamps `started_at`.
    /// Returns `None` when no batch is ready.
    pub async fn assign_batch(
        &self,
        token: &CancelToken,
        campaign_id: CampaignId,
    ) -> EngineResult<Option<GenerationBatch>> {
        let worker_id = self.worker_id.clone();
        let assigned = self
            .runner
            .run(token, TxOptions::for_campaign("assign_batch", campaign_id), move |tx| {
                let Some(mut batch) = tx.store().next_pending_batch(campaign_id)? else {
                    return Ok(None);
                };
                batch.status = BatchStatus::Assigned;
                batch.assigned_worker = Some(worker_id.clone());
                batch.started_at = Some(Utc::now());
                tx.put_batch(&batch)?;

                if let Some(mut record) = tx.store().load_worker(&worker_id)? {
                    record.status = WorkerStatus::Working;
                    record.campaign_id = Some(campaign_id);
                    record.assigned_tasks = json!({
                        "batch_id": batch.id,
                        "batch_number": batch.batch_number,
                    });
                    tx.put_worker(&record)?;
                }
                Ok(Some(batch))
            })
            .await?;

        if let Some(batch) = &assigned {
            debug!(
                worker_id = %self.worker_id,
                campaign_id = %campaign_id,
                batch_number = batch.batch_number,
                "batch assigned"
            );
        }
        Ok(assigned)
    }

    /// Workers attached to a campaign with a heartbeat inside the liveness window
    pub fn active_workers(&self, campaign_id: CampaignId) -> EngineResult<Vec<WorkerRecord>> {
        let now = Utc::now();
        let window = self.config.liveness();
        Ok(self
            .runner
            .store()
            .list_workers()?
            .into_iter()
            .filter(|w| w.campaign_id == Some(campaign_id) && w.is_active(now, window))
            .collect())
    }

    /// Purge stale workers, revert their batches, and reclaim expired locks
    pub async fn cleanup_stale(&self, token: &CancelToken) -> EngineResult<CleanupReport> {
        let mut report = CleanupReport::default();
        let now = Utc::now();
        let stale_after = self.config.stale_after();
        let stale: Vec<WorkerRecord> = self
            .runner
            .store()
            .list_workers()?
            .into_iter()
            .filter(|w| !w.is_active(now, stale_after))
            .collect();

        for worker in stale {
            let worker_id = worker.worker_id.clone();
            let reverted = self
                .runner
                .run(token, TxOptions::system("cleanup_stale_worker"), move |tx| {
                    let mut reverted = 0u64;
                    for mut batch in tx.store().batches_assigned_to(&worker_id)? {
                        if matches!(batch.status, BatchStatus::Assigned | BatchStatus::Running) {
                            batch.status = BatchStatus::Pending;
                            batch.assigned_worker = None;
                            batch.started_at = None;
                            tx.put_batch(&batch)?;
                            reverted += 1;
                        }
                    }
                    tx.delete_worker(&worker_id);
                    Ok(reverted)
                })
                .await?;
            report.stale_workers += 1;
            report.reverted_batches += reverted;
        }

        report.expired_locks = self.runner.store().purge_expired_locks()?;

        if report != CleanupReport::default() {
            info!(
                stale_workers = report.stale_workers,
                reverted_batches = report.reverted_batches,
                expired_locks = report.expired_locks,
                "stale cleanup finished"
            );
            metrics::counter!("worker_stale_cleanups_total").increment(report.stale_workers);
            metrics::counter!("resource_locks_expired_total").increment(report.expired_locks);
        }
        Ok(report)
    }

    /// Launch the periodic cleanup loop
    pub fn spawn_cleanup(self: &Arc<Self>, token: CancelToken) {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(coordinator.config.cleanup());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(err) = coordinator.cleanup_stale(&token).await {
                            warn!(error = %err, "stale cleanup failed");
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StateStore;
    use tempfile::TempDir;

    fn coordinator(worker_id: &str) -> (TempDir, Arc<TransactionRunner>, WorkerCoordinator) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::new(dir.path()).unwrap());
        let runner = Arc::new(TransactionRunner::new(store));
        let coordinator =
            WorkerCoordinator::new(Arc::clone(&runner), worker_id, WorkerCoordinationConfig::default());
        (dir, runner, coordinator)
    }

    #[tokio::test]
    async fn register_upserts_idle_row() {
        let (_dir, runner, coordinator) = coordinator("w-1");
        let token = CancelToken::new();
        coordinator.register(&token, None, CampaignType::Generation).await.unwrap();
        let record = runner.store().load_worker("w-1").unwrap().unwrap();
        assert_eq!(record.status, WorkerStatus::Idle);
        // Re-register resets status
        coordinator
            .update_status(&token, None, WorkerStatus::Draining, "drain")
            .await
            .unwrap();
        coordinator.register(&token, None, CampaignType::Generation).await.unwrap();
        let record = runner.store().load_worker("w-1").unwrap().unwrap();
        assert_eq!(record.status, WorkerStatus::Idle);
    }

    #[tokio::test]
    async fn assign_batch_picks_lowest_pending() {
        let (_dir, runner, coordinator) = coordinator("w-2");
        let token = CancelToken::new();
        coordinator.register(&token, None, CampaignType::Generation).await.unwrap();
        let campaign_id = CampaignId::new();
        runner.store().save_batch(&GenerationBatch::new(campaign_id, 2, 100)).unwrap();
        runner.store().save_batch(&GenerationBatch::new(campaign_id, 1, 100)).unwrap();

        let batch = coordinator.assign_batch(&token, campaign_id).await.unwrap().unwrap();
        assert_eq!(batch.batch_number, 1);
        assert_eq!(batch.status, BatchStatus::Assigned);
        assert!(batch.started_at.is_some());

        let second = coordinator.assign_batch(&token, campaign_id).await.unwrap().unwrap();
        assert_eq!(second.batch_number, 2);
        assert!(coordinator.assign_batch(&token, campaign_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cleanup_reverts_stale_workers_batches() {
        let (_dir, runner, coordinator) = coordinator("w-3");
        let token = CancelToken::new();
        coordinator.register(&token, None, CampaignType::Generation).await.unwrap();
        let campaign_id = CampaignId::new();
        runner.store().save_batch(&GenerationBatch::new(campaign_id, 1, 100)).unwrap();
        coordinator.assign_batch(&token, campaign_id).await.unwrap().unwrap();

        // Age the heartbeat past the stale bound
        let mut record = runner.store().load_worker("w-3").unwrap().unwrap();
        record.last_heartbeat = Utc::now() - chrono::Duration::seconds(600);
        runner.store().save_worker(&record).unwrap();

        let report = coordinator.cleanup_stale(&token).await.unwrap();
        assert_eq!(report.stale_workers, 1);
        assert_eq!(report.reverted_batches, 1);
        assert!(runner.store().load_worker("w-3").unwrap().is_none());
        let batch = runner.store().load_batch(campaign_id, 1).unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Pending);
        assert!(batch.assigned_worker.is_none());
    }

    #[tokio::test]
    async fn active_workers_respects_liveness_window() {
        let (_dir, runner, coordinator) = coordinator("w-4");
        let token = CancelToken::new();
        let campaign_id = CampaignId::new();
        coordinator.register(&token, Some(campaign_id), CampaignType::Generation).await.unwrap();
        assert_eq!(coordinator.active_workers(campaign_id).unwrap().len(), 1);

        let mut record = runner.store().load_worker("w-4").unwrap().unwrap();
        record.last_heartbeat = Utc::now() - chrono::Duration::seconds(45);
        runner.store().save_worker(&record).unwrap();
        assert!(coordinator.active_workers(campaign_id).unwrap().is_empty());
    }
}
