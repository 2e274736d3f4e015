//! Drift detection, auto-correction, and reconciler idempotence

use std::sync::Arc;

use domainflow_engine::campaign::{
    Campaign, CampaignStatus, CampaignType, ExecutionMode, GeneratedDomain,
};
use domainflow_engine::config::{DriftMode, ReconciliationConfig};
use domainflow_engine::reconcile::CounterReconciler;
use domainflow_engine::sse::SseBroadcaster;
use domainflow_engine::storage::{StateStore, TransactionRunner, TxOptions};
use domainflow_engine::CancelToken;

async fn seeded_campaign(runner: &Arc<TransactionRunner>, token: &CancelToken, rows: u64) -> Campaign {
    let mut campaign = Campaign::new("owner-1", CampaignType::Generation, ExecutionMode::SinglePhase);
    campaign.status = CampaignStatus::Running;
    campaign.current_phase = Some(CampaignType::Generation);
    campaign.total_items = rows;
    campaign.processed_items = rows;
    campaign.successful_items = rows;
    let stored = campaign.clone();
    let id = campaign.id;
    runner
        .run(token, TxOptions::for_campaign("seed_drift_campaign", id), move |tx| {
            tx.put_campaign(&stored)?;
            for offset in 0..rows {
                tx.put_domain(&GeneratedDomain::new(id, offset, format!("seed{}.com", offset)))?;
            }
            Ok(())
        })
        .await
        .unwrap();
    campaign
}

fn reconciler(runner: &Arc<TransactionRunner>, broadcaster: &Arc<SseBroadcaster>) -> CounterReconciler {
    let config = ReconciliationConfig {
        enabled: true,
        interval_minutes: 60,
        drift_threshold_pct: 1e-4,
        drift_mode: DriftMode::Ratio,
        auto_correct: true,
        max_corrections_per_run: 5000,
    };
    CounterReconciler::new(Arc::clone(runner), Arc::clone(broadcaster), config)
}

#[tokio::test]
async fn drifted_counter_is_detected_and_corrected() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(StateStore::new(dir.path()).unwrap());
    let runner = Arc::new(TransactionRunner::new(store));
    let broadcaster = Arc::new(SseBroadcaster::new(Default::default()));
    let token = CancelToken::new();

    let campaign = seeded_campaign(&runner, &token, 50).await;
    let mut handle = broadcaster.register("owner-1", Some(campaign.id)).unwrap();

    // Manually knock the counter off the authoritative count
    let mut row = runner.store().require_campaign(campaign.id).unwrap();
    row.processed_items -= 7;
    runner.store().save_campaign(&row).unwrap();

    let reconciler = reconciler(&runner, &broadcaster);
    let report = reconciler.run_once(&token).await.unwrap();
    assert_eq!(report.drift_events, 1);
    assert_eq!(report.corrections, 1);

    let corrected = runner.store().require_campaign(campaign.id).unwrap();
    assert_eq!(corrected.processed_items, 50);
    assert_eq!(corrected.successful_items, 50);

    // One counters_reconciled event with before/after values
    let frame = handle.frames.try_recv().unwrap();
    assert!(frame.contains("event: counters_reconciled"));
    let data_line = frame.lines().find(|l| l.starts_with("data: ")).unwrap();
    let envelope: serde_json::Value = serde_json::from_str(&data_line[6..]).unwrap();
    assert_eq!(envelope["payload"]["before"]["processedDomains"], serde_json::json!(43));
    assert_eq!(envelope["payload"]["after"]["processedDomains"], serde_json::json!(50));
    assert!(handle.frames.try_recv().is_err(), "exactly one correction event");
}

#[tokio::test]
async fn reconciliation_is_idempotent() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(StateStore::new(dir.path()).unwrap());
    let runner = Arc::new(TransactionRunner::new(store));
    let broadcaster = Arc::new(SseBroadcaster::new(Default::default()));
    let token = CancelToken::new();

    let campaign = seeded_campaign(&runner, &token, 20).await;
    let mut row = runner.store().require_campaign(campaign.id).unwrap();
    row.successful_items = 3;
    runner.store().save_campaign(&row).unwrap();

    let reconciler = reconciler(&runner, &broadcaster);
    let first = reconciler.run_once(&token).await.unwrap();
    assert_eq!(first.corrections, 1);

    let second = reconciler.run_once(&token).await.unwrap();
    assert_eq!(second.drift_events, 0);
    assert_eq!(second.corrections, 0);
}

#[tokio::test]
async fn absolute_mode_uses_item_counts() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(StateStore::new(dir.path()).unwrap());
    let runner = Arc::new(TransactionRunner::new(store));
    let broadcaster = Arc::new(SseBroadcaster::new(Default::default()));
    let token = CancelToken::new();

    let campaign = seeded_campaign(&runner, &token, 100).await;
    let mut row = runner.store().require_campaign(campaign.id).unwrap();
    row.processed_items -= 2;
    runner.store().save_campaign(&row).unwrap();

    // A 5-item absolute threshold tolerates a 2-item deviation
    let config = ReconciliationConfig {
        enabled: true,
        interval_minutes: 60,
        drift_threshold_pct: 5.0,
        drift_mode: DriftMode::Absolute,
        auto_correct: true,
        max_corrections_per_run: 5000,
    };
    let tolerant = CounterReconciler::new(Arc::clone(&runner), Arc::clone(&broadcaster), config);
    let report = tolerant.run_once(&token).await.unwrap();
    assert_eq!(report.drift_events, 0);
}
