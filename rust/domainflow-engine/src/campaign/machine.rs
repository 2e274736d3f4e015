//! Campaign state machine and phase execution

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::campaign::types::*;
use crate::campaign::validator::PhaseValidator;
use crate::concurrency::CancelToken;
use crate::error::{DomainFlowError, EngineResult};
use crate::genconfig::{hash_generation_params, ConfigManager};
use crate::generation::DomainGenerator;
use crate::locks::{LockMode, ResourceLockManager};
use crate::sse::{event_types, SseBroadcaster, SseEvent};
use crate::storage::{TransactionRunner, Tx, TxOptions};

/// Resource type of the per-campaign exclusive lock
pub const CAMPAIGN_RESOURCE: &str = "campaign";

/// TTL on campaign transition locks
const TRANSITION_LOCK_TTL: Duration = Duration::from_secs(30);

/// Domains per generation batch
pub const GENERATION_BATCH_SIZE: u64 = 1000;

/// Whether the state machine accepts `from → to`
pub fn is_transition_allowed(from: CampaignStatus, to: CampaignStatus) -> bool {
    use CampaignStatus::*;
    matches!(
        (from, to),
        (Pending, Queued)
            | (Pending, Cancelled)
            | (Queued, Running)
            | (Queued, Cancelled)
            | (Running, Paused)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Paused, Running)
            | (Paused, Cancelled)
    )
}

fn event_type_for(from: CampaignStatus, to: CampaignStatus) -> &'static str {
    use CampaignStatus::*;
    match (from, to) {
        (Queued, Running) => event_types::PHASE_STARTED,
        (Paused, Running) => event_types::PHASE_RESUMED,
        (Running, Paused) => event_types::PHASE_PAUSED,
        (_, Completed) => event_types::CAMPAIGN_COMPLETED,
        (_, Failed) => event_types::PHASE_FAILED,
        _ => event_types::CAMPAIGN_PROGRESS,
    }
}

/// Owns per-campaign lifecycle, phase progression, and batch execution
pub struct CampaignEngine {
    runner: Arc<TransactionRunner>,
    locks: Arc<ResourceLockManager>,
    configs: Arc<ConfigManager>,
    broadcaster: Arc<SseBroadcaster>,
    /// Whether lifecycle events are also staged into the durable event log
    persist_events: bool,
}

impl CampaignEngine {
    /// Create the engine
    pub fn new(
        runner: Arc<TransactionRunner>,
        locks: Arc<ResourceLockManager>,
        configs: Arc<ConfigManager>,
        broadcaster: Arc<SseBroadcaster>,
        persist_events: bool,
    ) -> Self {
        Self { runner, locks, configs, broadcaster, persist_events }
    }

    /// The transaction runner backing this engine
    pub fn runner(&self) -> &Arc<TransactionRunner> {
        &self.runner
    }

    /// The config manager backing generation campaigns
    pub fn configs(&self) -> &Arc<ConfigManager> {
        &self.configs
    }

    /// Create a campaign with its typed phase parameters
    ///
    /// Generation campaigns get their config state ensured and their batch
    /// rows enqueued up front.
    pub async fn create_campaign(
        &self,
        token: &CancelToken,
        owner_id: &str,
        execution_mode: ExecutionMode,
        params: PhaseParams,
    ) -> EngineResult<Campaign> {
        params.validate()?;
        let mut campaign = Campaign::new(owner_id, params.phase(), execution_mode);

        if let PhaseParams::Generation(gen) = &params {
            campaign.total_items = gen.target_total;
            let hash = hash_generation_params(gen);
            self.configs.ensure(token, &hash, serde_json::to_value(gen)?).await?;
        }

        let stored = campaign.clone();
        let stored_params = params.clone();
        self.runner
            .run(token, TxOptions::for_campaign("create_campaign", campaign.id), move |tx| {
                tx.put_campaign(&stored)?;
                tx.put_phase_params(stored.id, &stored_params)?;
                if let PhaseParams::Generation(gen) = &stored_params {
                    let mut remaining = gen.target_total;
                    let mut number = 1u64;
                    while remaining > 0 {
                        let size = remaining.min(GENERATION_BATCH_SIZE);
                        tx.put_batch(&GenerationBatch::new(stored.id, number, size))?;
                        remaining -= size;
                        number += 1;
                    }
                }
                Ok(())
            })
            .await?;

        info!(campaign_id = %campaign.id, campaign_type = %campaign.campaign_type, "campaign created");
        Ok(campaign)
    }

    fn build_event(
        event_type: &str,
        campaign: &Campaign,
        phase: Option<PhaseKind>,
        reason: Option<&str>,
    ) -> SseEvent {
        let mut payload = json!({
            "status": campaign.status.as_str(),
            "sequence": campaign.phase_sequence,
            "overall": {
                "status": campaign.status.as_str(),
                "percentComplete": campaign.percent_complete(),
                "processedDomains": campaign.processed_items,
                "totalDomains": campaign.total_items,
                "successfulDomains": campaign.successful_items,
                "failedDomains": campaign.failed_items,
            },
        });
        if let Some(phase) = phase {
            payload["currentPhase"] = json!(phase.as_str());
        }
        if let Some(reason) = reason {
            payload["message"] = json!(reason);
        }
        SseEvent::new(event_type, payload)
            .for_campaign(campaign.id)
            .for_user(campaign.owner_id.clone())
    }

    fn stage_transition(
        tx: &mut Tx<'_>,
        campaign: &Campaign,
        from: CampaignStatus,
        actor: &str,
        reason: Option<&str>,
        persist_events: bool,
        event: &SseEvent,
    ) -> EngineResult<()> {
        tx.put_transition(&StateTransitionRecord {
            campaign_id: campaign.id,
            sequence: campaign.phase_sequence,
            from,
            to: campaign.status,
            phase: campaign.current_phase,
            actor_id: actor.to_string(),
            reason: reason.map(String::from),
            created_at: Utc::now(),
        })?;
        if persist_events {
            tx.put_event(event)?;
        }
        Ok(())
    }

    /// Drive one status transition under the campaign's exclusive lock
    ///
    /// Rejected transitions surface as business errors; terminal statuses are
    /// absorbing.
    pub async fn transition(
        &self,
        token: &CancelToken,
        campaign_id: CampaignId,
        actor: &str,
        to: CampaignStatus,
        reason: Option<String>,
    ) -> EngineResult<Campaign> {
        let resource_id = campaign_id.to_string();
        let (campaign, event) = self
            .locks
            .with_lock(token, CAMPAIGN_RESOURCE, &resource_id, LockMode::Exclusive, TRANSITION_LOCK_TTL, || async {
                let actor = actor.to_string();
                let reason = reason.clone();
                let persist_events = self.persist_events;
                self.runner
                    .run(token, TxOptions::for_campaign("campaign_transition", campaign_id), move |tx| {
                        let mut campaign = tx.store().require_campaign(campaign_id)?;
                        let from = campaign.status;
                        if !is_transition_allowed(from, to) {
                            return Err(DomainFlowError::InvalidStateTransition {
                                from: from.to_string(),
                                to: to.to_string(),
                            });
                        }

                        let now = Utc::now();
                        campaign.status = to;
                        campaign.phase_sequence += 1;
                        campaign.updated_at = now;
                        match to {
                            CampaignStatus::Running => {
                                if campaign.current_phase.is_none() {
                                    campaign.current_phase = Some(campaign.campaign_type);
                                }
                                if campaign.started_at.is_none() {
                                    campaign.started_at = Some(now);
                                }
                                // Validation campaigns size their work from the
                                // source campaign's rows on first start
                                if campaign.total_items == 0 {
                                    if let Some(PhaseParams::DnsValidation(params)) =
                                        tx.store().load_phase_params(campaign_id)?
                                    {
                                        campaign.total_items =
                                            tx.store().count_domains(params.source_campaign_id)?;
                                    }
                                }
                            }
                            status if status.is_terminal() => {
                                campaign.completed_at = Some(now);
                            }
                            _ => {}
                        }

                        let event = Self::build_event(
                            event_type_for(from, to),
                            &campaign,
                            campaign.current_phase,
                            reason.as_deref(),
                        );
                        tx.put_campaign(&campaign)?;
                        Self::stage_transition(tx, &campaign, from, &actor, reason.as_deref(), persist_events, &event)?;
                        Ok((campaign, event))
                    })
                    .await
            })
            .await?;

        info!(
            campaign_id = %campaign_id,
            status = %campaign.status,
            sequence = campaign.phase_sequence,
            "campaign transition committed"
        );
        self.broadcaster.broadcast(&event);
        Ok(campaign)
    }

    /// `pending → queued`
    pub async fn queue(&self, token: &CancelToken, id: CampaignId, actor: &str) -> EngineResult<Campaign> {
        self.transition(token, id, actor, CampaignStatus::Queued, None).await
    }

    /// `queued → running`, entering the campaign's first (or current) phase
    pub async fn start(&self, token: &CancelToken, id: CampaignId, actor: &str) -> EngineResult<Campaign> {
        self.transition(token, id, actor, CampaignStatus::Running, None).await
    }

    /// `running → paused`
    pub async fn pause(&self, token: &CancelToken, id: CampaignId, actor: &str) -> EngineResult<Campaign> {
        self.transition(token, id, actor, CampaignStatus::Paused, None).await
    }

    /// `paused → running`
    pub async fn resume(&self, token: &CancelToken, id: CampaignId, actor: &str) -> EngineResult<Campaign> {
        self.transition(token, id, actor, CampaignStatus::Running, None).await
    }

    /// Cancel; accepted in any non-terminal status, absorbing
    pub async fn cancel(
        &self,
        token: &CancelToken,
        id: CampaignId,
        actor: &str,
        reason: Option<String>,
    ) -> EngineResult<Campaign> {
        self.transition(token, id, actor, CampaignStatus::Cancelled, reason).await
    }

    /// Fail the running phase with a reason code
    pub async fn fail(
        &self,
        token: &CancelToken,
        id: CampaignId,
        actor: &str,
        reason: String,
    ) -> EngineResult<Campaign> {
        self.transition(token, id, actor, CampaignStatus::Failed, Some(reason)).await
    }

    /// Finish the running phase
    ///
    /// In `full_sequence` mode the campaign advances to the next phase and a
    /// `phase_auto_started` event follows with the next sequence number; in
    /// `single_phase` mode (or after the last phase) the campaign completes.
    /// The whole progression is one commit under the campaign lock, so the
    /// sequence has no gaps.
    pub async fn complete_phase(
        &self,
        token: &CancelToken,
        campaign_id: CampaignId,
        actor: &str,
    ) -> EngineResult<Campaign> {
        let resource_id = campaign_id.to_string();
        let (campaign, events) = self
            .locks
            .with_lock(token, CAMPAIGN_RESOURCE, &resource_id, LockMode::Exclusive, TRANSITION_LOCK_TTL, || async {
                let actor = actor.to_string();
                let persist_events = self.persist_events;
                self.runner
                    .run(token, TxOptions::for_campaign("complete_phase", campaign_id), move |tx| {
                        let mut campaign = tx.store().require_campaign(campaign_id)?;
                        if campaign.status != CampaignStatus::Running {
                            return Err(DomainFlowError::Business(format!(
                                "cannot complete a phase while {}",
                                campaign.status
                            )));
                        }
                        if campaign.processed_items < campaign.total_items {
                            return Err(DomainFlowError::Business(format!(
                                "phase has {} of {} items processed",
                                campaign.processed_items, campaign.total_items
                            )));
                        }
                        let phase = campaign.current_phase.unwrap_or(campaign.campaign_type);
                        let now = Utc::now();
                        let mut events = Vec::new();

                        campaign.phase_sequence += 1;
                        campaign.updated_at = now;
                        let completed_event =
                            Self::build_event(event_types::PHASE_COMPLETED, &campaign, Some(phase), None);
                        Self::stage_transition(
                            tx,
                            &campaign,
                            CampaignStatus::Running,
                            &actor,
                            None,
                            persist_events,
                            &completed_event,
                        )?;
                        events.push(completed_event);

                        let next = match campaign.execution_mode {
                            ExecutionMode::FullSequence => phase.next_phase(),
                            ExecutionMode::SinglePhase => None,
                        };
                        match next {
                            Some(next_phase) => {
                                campaign.current_phase = Some(next_phase);
                                // Counters track the phase in flight
                                campaign.processed_items = 0;
                                campaign.successful_items = 0;
                                campaign.failed_items = 0;
                                campaign.phase_sequence += 1;
                                let auto_event = Self::build_event(
                                    event_types::PHASE_AUTO_STARTED,
                                    &campaign,
                                    Some(next_phase),
                                    None,
                                );
                                Self::stage_transition(
                                    tx,
                                    &campaign,
                                    CampaignStatus::Running,
                                    &actor,
                                    None,
                                    persist_events,
                                    &auto_event,
                                )?;
                                events.push(auto_event);
                            }
                            None => {
                                campaign.status = CampaignStatus::Completed;
                                campaign.completed_at = Some(now);
                                campaign.phase_sequence += 1;
                                let done_event = Self::build_event(
                                    event_types::CAMPAIGN_COMPLETED,
                                    &campaign,
                                    Some(phase),
                                    None,
                                );
                                Self::stage_transition(
                                    tx,
                                    &campaign,
                                    CampaignStatus::Running,
                                    &actor,
                                    None,
                                    persist_events,
                                    &done_event,
                                )?;
                                events.push(done_event);
                            }
                        }

                        tx.put_campaign(&campaign)?;
                        Ok((campaign, events))
                    })
                    .await
            })
            .await?;

        for event in &events {
            self.broadcaster.broadcast(event);
        }
        Ok(campaign)
    }

    /// Execute one generation batch
    ///
    /// The generation engine runs inside the config update's closure, so the
    /// domain rows, the batch row, the campaign counters, and the advanced
    /// cursor land in one commit. Returns the number of domains generated.
    pub async fn run_generation_batch(
        &self,
        token: &CancelToken,
        batch: &GenerationBatch,
    ) -> EngineResult<u64> {
        let campaign_id = batch.campaign_id;
        let params = match self.runner.store().load_phase_params(campaign_id)? {
            Some(PhaseParams::Generation(params)) => params,
            Some(_) => {
                return Err(DomainFlowError::Business("batch belongs to a non-generation campaign".into()))
            }
            None => return Err(DomainFlowError::CampaignNotFound { campaign_id: campaign_id.to_string() }),
        };
        let hash = hash_generation_params(&params);
        self.configs.ensure(token, &hash, serde_json::to_value(&params)?).await?;

        // Mark the batch running before the heavy commit
        let running = {
            let mut b = batch.clone();
            b.status = BatchStatus::Running;
            b
        };
        self.runner
            .run(token, TxOptions::for_campaign("start_generation_batch", campaign_id), move |tx| {
                tx.put_batch(&running)?;
                Ok(())
            })
            .await?;

        let batch_size = batch.total_domains;
        let batch_template = batch.clone();
        let gen_params = params.clone();
        let update_result = self
            .configs
            .update(token, &hash, move |state, tx| {
                let start_offset = state.last_offset;
                let (domains, new_offset) = DomainGenerator::generate(&gen_params, start_offset, batch_size);
                for (i, domain) in domains.iter().enumerate() {
                    tx.put_domain(&GeneratedDomain::new(campaign_id, start_offset + i as u64, domain.clone()))?;
                }
                state.last_offset = new_offset;

                let generated = domains.len() as u64;
                let mut finished = batch_template.clone();
                finished.status = BatchStatus::Completed;
                finished.processed_domains = generated;
                finished.completed_at = Some(Utc::now());
                tx.put_batch(&finished)?;

                let mut campaign = tx.store().require_campaign(campaign_id)?;
                campaign.processed_items = (campaign.processed_items + generated).min(campaign.total_items);
                campaign.successful_items = (campaign.successful_items + generated).min(campaign.processed_items);
                campaign.updated_at = Utc::now();
                tx.put_campaign(&campaign)?;

                Ok((generated, campaign))
            })
            .await;

        let (generated, campaign_after) = match update_result {
            Ok((_, pair)) => pair,
            Err(err) => {
                self.mark_batch_failed(token, batch, &err).await;
                return Err(err);
            }
        };

        metrics::counter!("domains_generated_total").increment(generated);
        self.broadcaster.broadcast(
            &SseEvent::new(
                event_types::DOMAIN_GENERATED,
                json!({ "batchNumber": batch.batch_number, "count": generated }),
            )
            .for_campaign(campaign_id)
            .for_user(campaign_after.owner_id.clone()),
        );
        self.broadcast_progress(&campaign_after);

        if campaign_after.processed_items >= campaign_after.total_items && campaign_after.total_items > 0 {
            self.try_complete_phase(token, campaign_id).await?;
        }
        Ok(generated)
    }

    /// Best-effort record of a failed batch; the original error still surfaces
    async fn mark_batch_failed(&self, token: &CancelToken, batch: &GenerationBatch, err: &DomainFlowError) {
        let mut failed = batch.clone();
        failed.status = BatchStatus::Failed;
        failed.completed_at = Some(Utc::now());
        failed.error_detail = Some(json!({ "code": err.code(), "message": err.to_string() }));
        let result = self
            .runner
            .run(token, TxOptions::for_campaign("fail_generation_batch", batch.campaign_id), move |tx| {
                tx.put_batch(&failed)?;
                Ok(())
            })
            .await;
        if let Err(record_err) = result {
            warn!(
                campaign_id = %batch.campaign_id,
                batch_number = batch.batch_number,
                error = %record_err,
                "failed to record batch failure"
            );
        }
    }

    /// Complete the phase if it is actually finished; tolerate a concurrent
    /// worker having beaten us to it
    async fn try_complete_phase(&self, token: &CancelToken, campaign_id: CampaignId) -> EngineResult<()> {
        match self.complete_phase(token, campaign_id, "system").await {
            Ok(_) => Ok(()),
            Err(DomainFlowError::Business(_)) | Err(DomainFlowError::InvalidStateTransition { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Drive a validator over one batch of pending domains
    ///
    /// Outcomes persist as a single chunk; counters advance with them.
    /// Returns the number of domains validated.
    pub async fn run_validation_batch(
        &self,
        token: &CancelToken,
        campaign_id: CampaignId,
        validator: &dyn PhaseValidator,
        batch_size: usize,
    ) -> EngineResult<u64> {
        let campaign = self.runner.store().require_campaign(campaign_id)?;
        let phase = validator.phase();

        // Single-phase validation campaigns read another campaign's rows
        let source_id = match self.runner.store().load_phase_params(campaign_id)? {
            Some(PhaseParams::DnsValidation(params)) => params.source_campaign_id,
            _ => campaign_id,
        };

        let mut pending = Vec::with_capacity(batch_size);
        let mut cursor = 0u64;
        while pending.len() < batch_size {
            let rows = self.runner.store().domains_from(source_id, cursor, 256)?;
            if rows.is_empty() {
                break;
            }
            cursor = rows.last().map(|r| r.offset_index + 1).unwrap_or(cursor);
            for row in rows {
                let is_pending = match phase {
                    CampaignType::DnsValidation => row.dns_status == ValidationStatus::Pending,
                    CampaignType::HttpKeywordValidation => row.http_status == ValidationStatus::Pending,
                    CampaignType::Generation => false,
                };
                if is_pending {
                    pending.push(row);
                    if pending.len() >= batch_size {
                        break;
                    }
                }
            }
        }
        if pending.is_empty() {
            return Ok(0);
        }

        let mut updated = Vec::with_capacity(pending.len());
        let mut successful = 0u64;
        let mut failed = 0u64;
        for mut row in pending {
            let outcome = validator.validate(&row).await;
            match phase {
                CampaignType::DnsValidation => {
                    row.set_dns_outcome(outcome.status, outcome.reason, outcome.ip);
                }
                CampaignType::HttpKeywordValidation => {
                    row.set_http_outcome(outcome.status, outcome.reason);
                    if outcome.status == ValidationStatus::Ok {
                        row.lead_status = match outcome.qualified {
                            Some(true) => LeadStatus::Qualified,
                            Some(false) => LeadStatus::Disqualified,
                            None => row.lead_status,
                        };
                    }
                }
                CampaignType::Generation => {}
            }
            if outcome.status == ValidationStatus::Ok {
                successful += 1;
            } else {
                failed += 1;
            }
            updated.push(row);
        }

        let chunk = updated.clone();
        let campaign_after = self
            .runner
            .run(token, TxOptions::for_campaign("persist_validation_chunk", campaign_id), move |tx| {
                for row in &chunk {
                    tx.put_domain(row)?;
                }
                let mut campaign = tx.store().require_campaign(campaign_id)?;
                let processed = chunk.len() as u64;
                campaign.processed_items = (campaign.processed_items + processed).min(campaign.total_items);
                campaign.successful_items += successful;
                campaign.failed_items += failed;
                campaign.updated_at = Utc::now();
                tx.put_campaign(&campaign)?;
                Ok(campaign)
            })
            .await?;

        let validated = updated.len() as u64;
        metrics::counter!("domains_validated_total", "phase" => phase.to_string()).increment(validated);
        self.broadcaster.broadcast(
            &SseEvent::new(
                event_types::DOMAIN_VALIDATED,
                json!({ "phase": phase.as_str(), "count": validated, "successful": successful, "failed": failed }),
            )
            .for_campaign(campaign_id)
            .for_user(campaign.owner_id.clone()),
        );
        self.broadcast_progress(&campaign_after);

        if campaign_after.processed_items >= campaign_after.total_items && campaign_after.total_items > 0 {
            self.try_complete_phase(token, campaign_id).await?;
        }
        Ok(validated)
    }

    /// Emit a progress snapshot for a campaign
    pub fn broadcast_progress(&self, campaign: &Campaign) {
        let event = Self::build_event(
            event_types::CAMPAIGN_PROGRESS,
            campaign,
            campaign.current_phase,
            None,
        );
        self.broadcaster.broadcast(&event);
    }

    /// Emit an error event addressed to the campaign's subscribers
    pub fn broadcast_error(&self, campaign: &Campaign, error: &DomainFlowError) {
        warn!(campaign_id = %campaign.id, error = %error, "campaign error published");
        let event = SseEvent::new(
            event_types::ERROR,
            json!({ "code": error.code(), "message": error.to_string() }),
        )
        .for_campaign(campaign.id)
        .for_user(campaign.owner_id.clone());
        self.broadcaster.broadcast(&event);
    }
}
