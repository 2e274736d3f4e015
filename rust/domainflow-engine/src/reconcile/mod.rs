//! Counter drift reconciliation
//!
//! A background job recomputes each active campaign's aggregate counters from
//! authoritative row counts and compares them against the campaign row. Drift
//! beyond the configured threshold is recorded; with auto-correct enabled the
//! counters are restored, each correction in its own transaction with a
//! `counters_reconciled` event carrying before/after values.

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::campaign::{Campaign, CampaignStatus, CampaignType, PhaseParams, ValidationStatus};
use crate::concurrency::CancelToken;
use crate::config::{DriftMode, ReconciliationConfig};
use crate::error::EngineResult;
use crate::sse::{event_types, SseBroadcaster, SseEvent};
use crate::storage::{TransactionRunner, TxOptions};

/// Counts from one reconciliation pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconciliationReport {
    /// Campaigns examined
    pub campaigns_checked: u64,
    /// Campaigns with at least one drifted counter
    pub drift_events: u64,
    /// Campaigns corrected
    pub corrections: u64,
}

/// Authoritative counter values recomputed from rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AuthoritativeCounts {
    processed: u64,
    successful: u64,
    failed: u64,
}

/// Periodic drift detection and auto-correction
pub struct CounterReconciler {
    runner: Arc<TransactionRunner>,
    broadcaster: Arc<SseBroadcaster>,
    config: ReconciliationConfig,
}

impl CounterReconciler {
    /// Create the reconciler
    pub fn new(
        runner: Arc<TransactionRunner>,
        broadcaster: Arc<SseBroadcaster>,
        config: ReconciliationConfig,
    ) -> Self {
        Self { runner, broadcaster, config }
    }

    fn is_candidate(&self, campaign: &Campaign) -> bool {
        match campaign.status {
            CampaignStatus::Running => true,
            status if status.is_terminal() => {
                // Recently terminal campaigns stay under watch for one interval
                campaign
                    .completed_at
                    .map(|done| Utc::now() - done <= chrono::Duration::seconds(self.config.interval().as_secs() as i64))
                    .unwrap_or(false)
            }
            _ => false,
        }
    }

    fn recount(&self, campaign: &Campaign) -> EngineResult<AuthoritativeCounts> {
        let store = self.runner.store();
        let phase = campaign.current_phase.unwrap_or(campaign.campaign_type);
        // Single-phase validation campaigns count another campaign's rows
        let source_id = match store.load_phase_params(campaign.id)? {
            Some(PhaseParams::DnsValidation(params)) => params.source_campaign_id,
            _ => campaign.id,
        };
        let counts = match phase {
            CampaignType::Generation => {
                let processed = store.count_domains(source_id)?;
                AuthoritativeCounts { processed, successful: processed, failed: 0 }
            }
            CampaignType::DnsValidation => {
                let processed =
                    store.count_domains_where(source_id, |row| row.dns_status != ValidationStatus::Pending)?;
                let successful =
                    store.count_domains_where(source_id, |row| row.dns_status == ValidationStatus::Ok)?;
                AuthoritativeCounts { processed, successful, failed: processed - successful }
            }
            CampaignType::HttpKeywordValidation => {
                let processed =
                    store.count_domains_where(source_id, |row| row.http_status != ValidationStatus::Pending)?;
                let successful =
                    store.count_domains_where(source_id, |row| row.http_status == ValidationStatus::Ok)?;
                AuthoritativeCounts { processed, successful, failed: processed - successful }
            }
        };
        Ok(counts)
    }

    fn drifted(&self, stored: u64, actual: u64) -> bool {
        let deviation = stored.abs_diff(actual);
        match self.config.drift_mode {
            DriftMode::Ratio => {
                let base = actual.max(1) as f64;
                (deviation as f64 / base) > self.config.drift_threshold_pct
            }
            DriftMode::Absolute => (deviation as f64) > self.config.drift_threshold_pct,
        }
    }

    /// One reconciliation pass over all candidate campaigns
    pub async fn run_once(&self, token: &CancelToken) -> EngineResult<ReconciliationReport> {
        let mut report = ReconciliationReport::default();
        let campaigns = self.runner.store().list_campaigns()?;

        for campaign in campaigns.into_iter().filter(|c| self.is_candidate(c)) {
            if token.is_cancelled() {
                break;
            }
            report.campaigns_checked += 1;
            let actual = self.recount(&campaign)?;
            let drift = self.drifted(campaign.processed_items, actual.processed)
                || self.drifted(campaign.successful_items, actual.successful)
                || self.drifted(campaign.failed_items, actual.failed);
            if !drift {
                continue;
            }

            report.drift_events += 1;
            metrics::counter!("domain_counters_drift_events_total").increment(1);
            warn!(
                campaign_id = %campaign.id,
                stored_processed = campaign.processed_items,
                actual_processed = actual.processed,
                "counter drift detected"
            );

            if !self.config.auto_correct || report.corrections >= self.config.max_corrections_per_run as u64 {
                continue;
            }

            let campaign_id = campaign.id;
            let corrected = self
                .runner
                .run(token, TxOptions::for_campaign("reconcile_counters", campaign_id), move |tx| {
                    let mut row = tx.store().require_campaign(campaign_id)?;
                    let before = (row.processed_items, row.successful_items, row.failed_items);
                    row.processed_items = actual.processed;
                    row.successful_items = actual.successful;
                    row.failed_items = actual.failed;
                    row.updated_at = Utc::now();
                    tx.put_campaign(&row)?;
                    Ok((row, before))
                })
                .await?;

            let (row, before) = corrected;
            report.corrections += 1;
            metrics::counter!("domain_counters_corrections_total").increment(1);
            self.broadcaster.broadcast(
                &SseEvent::new(
                    event_types::COUNTERS_RECONCILED,
                    json!({
                        "before": {
                            "processedDomains": before.0,
                            "successfulDomains": before.1,
                            "failedDomains": before.2,
                        },
                        "after": {
                            "processedDomains": row.processed_items,
                            "successfulDomains": row.successful_items,
                            "failedDomains": row.failed_items,
                        },
                    }),
                )
                .for_campaign(campaign_id)
                .for_user(row.owner_id.clone()),
            );
        }

        if report.drift_events > 0 {
            info!(
                checked = report.campaigns_checked,
                drift_events = report.drift_events,
                corrections = report.corrections,
                "reconciliation pass finished"
            );
        }
        Ok(report)
    }

    /// Launch the interval loop; a no-op when disabled
    pub fn spawn(self: &Arc<Self>, token: CancelToken) {
        if !self.config.enabled {
            return;
        }
        let reconciler = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(reconciler.config.interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; skip it so startup stays quiet
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(err) = reconciler.run_once(&token).await {
                            warn!(error = %err, "reconciliation pass failed");
                        }
                    }
                }
            }
        });
    }
}
