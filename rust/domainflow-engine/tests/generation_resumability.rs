//! Generation survives a worker crash and restart without gaps or duplicates

use std::path::Path;
use std::sync::Arc;

use domainflow_engine::campaign::{
    Campaign, CampaignStatus, CampaignType, ExecutionMode, GenerationBatch, PhaseParams,
};
use domainflow_engine::config::WorkerCoordinationConfig;
use domainflow_engine::generation::{DomainGenerator, GenerationParams, PatternKind};
use domainflow_engine::genconfig::hash_generation_params;
use domainflow_engine::sse::SseBroadcaster;
use domainflow_engine::storage::{StateStore, TransactionRunner, TxOptions};
use domainflow_engine::worker::WorkerCoordinator;
use domainflow_engine::{CampaignEngine, CancelToken, ConfigManager, ResourceLockManager};

struct Stack {
    runner: Arc<TransactionRunner>,
    engine: Arc<CampaignEngine>,
    coordinator: Arc<WorkerCoordinator>,
}

fn stack(path: &Path, worker_id: &str) -> Stack {
    let store = Arc::new(StateStore::new(path).unwrap());
    let runner = Arc::new(TransactionRunner::new(Arc::clone(&store)));
    let locks = Arc::new(ResourceLockManager::new(Arc::clone(&runner), worker_id));
    let configs = Arc::new(ConfigManager::new(Arc::clone(&runner), Arc::clone(&locks)));
    let broadcaster = Arc::new(SseBroadcaster::new(Default::default()));
    let engine = Arc::new(CampaignEngine::new(
        Arc::clone(&runner),
        locks,
        configs,
        broadcaster,
        false,
    ));
    let coordinator = Arc::new(WorkerCoordinator::new(
        Arc::clone(&runner),
        worker_id,
        WorkerCoordinationConfig::default(),
    ));
    Stack { runner, engine, coordinator }
}

fn sample_params() -> GenerationParams {
    GenerationParams {
        pattern: PatternKind::Prefix,
        variable_length: 3,
        charset: "ab".to_string(),
        constant: "x".to_string(),
        tlds: vec![".com".to_string(), ".net".to_string()],
        target_total: 16,
    }
}

#[tokio::test]
async fn generation_resumes_across_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let token = CancelToken::new();
    let params = sample_params();

    // Seed the campaign with explicit batch sizes 5, 5, 6
    let campaign_id = {
        let s = stack(dir.path(), "worker-a");
        let mut campaign = Campaign::new("owner-1", CampaignType::Generation, ExecutionMode::SinglePhase);
        campaign.total_items = params.target_total;
        let id = campaign.id;
        let seeded = campaign.clone();
        let seeded_params = PhaseParams::Generation(params.clone());
        s.runner
            .run(&token, TxOptions::for_campaign("seed_campaign", id), move |tx| {
                tx.put_campaign(&seeded)?;
                tx.put_phase_params(id, &seeded_params)?;
                tx.put_batch(&GenerationBatch::new(id, 1, 5))?;
                tx.put_batch(&GenerationBatch::new(id, 2, 5))?;
                tx.put_batch(&GenerationBatch::new(id, 3, 6))?;
                Ok(())
            })
            .await
            .unwrap();

        s.engine.queue(&token, id, "owner-1").await.unwrap();
        s.engine.start(&token, id, "owner-1").await.unwrap();

        // First batch, then the worker crashes
        s.coordinator.register(&token, Some(id), CampaignType::Generation).await.unwrap();
        let batch = s.coordinator.assign_batch(&token, id).await.unwrap().unwrap();
        assert_eq!(batch.batch_number, 1);
        let generated = s.engine.run_generation_batch(&token, &batch).await.unwrap();
        assert_eq!(generated, 5);

        let hash = hash_generation_params(&params);
        let state = s.runner.store().load_config_state(&hash).unwrap().unwrap();
        assert_eq!(state.last_offset, 5);
        id
        // Everything drops here: the restart opens the same directory fresh
    };

    let s = stack(dir.path(), "worker-b");
    s.coordinator.register(&token, Some(campaign_id), CampaignType::Generation).await.unwrap();

    let batch = s.coordinator.assign_batch(&token, campaign_id).await.unwrap().unwrap();
    assert_eq!(batch.batch_number, 2);
    assert_eq!(s.engine.run_generation_batch(&token, &batch).await.unwrap(), 5);

    let batch = s.coordinator.assign_batch(&token, campaign_id).await.unwrap().unwrap();
    assert_eq!(batch.batch_number, 3);
    assert_eq!(s.engine.run_generation_batch(&token, &batch).await.unwrap(), 6);

    // Exactly the first 16 domains of the enumeration, exactly once each
    let rows = s.runner.store().domains_from(campaign_id, 0, 100).unwrap();
    assert_eq!(rows.len(), 16);
    let expected: Vec<String> = (0..16).map(|i| DomainGenerator::domain_at(&params, i)).collect();
    let actual: Vec<String> = rows.iter().map(|r| r.domain.clone()).collect();
    assert_eq!(actual, expected);
    let distinct: std::collections::HashSet<&String> = actual.iter().collect();
    assert_eq!(distinct.len(), 16);

    // Offset-row coupling: the cursor sits exactly past the last row
    let hash = hash_generation_params(&params);
    let state = s.runner.store().load_config_state(&hash).unwrap().unwrap();
    assert_eq!(state.last_offset, 16);

    // The campaign completed and the sequence stayed monotone
    let campaign = s.runner.store().require_campaign(campaign_id).unwrap();
    assert_eq!(campaign.status, CampaignStatus::Completed);
    assert_eq!(campaign.processed_items, 16);

    let transitions = s.runner.store().transitions_for(campaign_id).unwrap();
    let sequences: Vec<u64> = transitions.iter().map(|t| t.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(sequences.len(), sorted.len(), "sequence numbers must not repeat");

    let started_seq = transitions
        .iter()
        .find(|t| t.from == CampaignStatus::Queued && t.to == CampaignStatus::Running)
        .map(|t| t.sequence)
        .unwrap();
    let completed_phase: Vec<_> = transitions
        .iter()
        .filter(|t| t.from == CampaignStatus::Running && t.to == CampaignStatus::Running)
        .collect();
    assert_eq!(completed_phase.len(), 1, "exactly one phase_completed record");
    assert!(completed_phase[0].sequence > started_seq);
}

#[tokio::test]
async fn rerunning_an_offset_range_is_idempotent() {
    let dir = tempfile::TempDir::new().unwrap();
    let token = CancelToken::new();
    let s = stack(dir.path(), "worker-c");
    let params = sample_params();

    let campaign = s
        .engine
        .create_campaign(&token, "owner-1", ExecutionMode::SinglePhase, PhaseParams::Generation(params.clone()))
        .await
        .unwrap();

    s.engine.queue(&token, campaign.id, "owner-1").await.unwrap();
    s.engine.start(&token, campaign.id, "owner-1").await.unwrap();
    s.coordinator.register(&token, Some(campaign.id), CampaignType::Generation).await.unwrap();

    let batch = s.coordinator.assign_batch(&token, campaign.id).await.unwrap().unwrap();
    s.engine.run_generation_batch(&token, &batch).await.unwrap();

    // A replayed batch generates nothing new: the cursor already advanced
    let replay = s.engine.run_generation_batch(&token, &batch).await.unwrap();
    assert_eq!(replay, 0);
    assert_eq!(s.runner.store().count_domains(campaign.id).unwrap(), 16);
}
