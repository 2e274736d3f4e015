//! Embedded state store
//!
//! All durable state lives in named sled trees behind typed accessors. The
//! store is the single source of truth for campaign state, batches, offsets,
//! counters, locks, and audit records; process-local caches elsewhere are
//! strictly advisory.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Db, Tree};
use std::path::Path;

use crate::authz::{AccessViolation, AuthorizationDecision, CampaignAccessGrant, EndpointRule, PermissionGrant};
use crate::campaign::{
    Campaign, CampaignId, GeneratedDomain, GenerationBatch, PhaseParams, StateTransitionRecord,
};
use crate::error::{DomainFlowError, EngineResult};
use crate::genconfig::GenerationConfigState;
use crate::locks::ResourceLock;
use crate::sse::SseEvent;
use crate::storage::keys;
use crate::worker::WorkerRecord;

/// Tree names, stable across releases
pub mod trees {
    /// Campaign aggregate rows
    pub const CAMPAIGNS: &str = "campaigns";
    /// Phase parameter rows, 1:1 with campaigns
    pub const CAMPAIGN_PARAMS: &str = "campaign_params";
    /// Generated domain rows keyed by campaign and offset
    pub const GENERATED_DOMAINS: &str = "generated_domains";
    /// Generation config states keyed by hash
    pub const CONFIG_STATES: &str = "domain_generation_config_states";
    /// Generation batches keyed by campaign and batch number
    pub const BATCHES: &str = "domain_generation_batches";
    /// Worker coordination rows
    pub const WORKERS: &str = "worker_coordination";
    /// Resource lock rows
    pub const RESOURCE_LOCKS: &str = "resource_locks";
    /// Campaign state transition log
    pub const STATE_TRANSITIONS: &str = "campaign_state_transitions";
    /// Optional durable SSE event log
    pub const SSE_EVENTS: &str = "sse_events";
    /// Permission grants per user
    pub const ROLE_PERMISSIONS: &str = "role_permissions";
    /// Endpoint authorization rules
    pub const ENDPOINT_RULES: &str = "endpoint_rules";
    /// Campaign access grants
    pub const CAMPAIGN_GRANTS: &str = "campaign_access_grants";
    /// Authorization decision log
    pub const AUTH_DECISIONS: &str = "authorization_decisions";
    /// Access violation log
    pub const ACCESS_VIOLATIONS: &str = "api_access_violations";
    /// Owner index for persona/proxy resources
    pub const RESOURCE_OWNERS: &str = "resource_owners";
}

/// Typed facade over the sled database
pub struct StateStore {
    db: Db,
}

impl StateStore {
    /// Open (or create) the store at `path`
    pub fn new<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let db = sled::open(path)
            .map_err(|e| DomainFlowError::Storage(format!("Failed to open database: {}", e)))?;
        Ok(Self { db })
    }

    /// Named tree handle
    pub fn tree(&self, name: &str) -> EngineResult<Tree> {
        self.db
            .open_tree(name)
            .map_err(|e| DomainFlowError::Storage(format!("Failed to open tree {}: {}", name, e)))
    }

    /// Flush dirty buffers to disk
    pub fn flush(&self) -> EngineResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn put_json<T: Serialize>(&self, tree: &str, key: &[u8], value: &T) -> EngineResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.tree(tree)?.insert(key, bytes)?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, tree: &str, key: &[u8]) -> EngineResult<Option<T>> {
        match self.tree(tree)?.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn scan_prefix_json<T: DeserializeOwned>(&self, tree: &str, prefix: &[u8]) -> EngineResult<Vec<T>> {
        let mut out = Vec::new();
        for entry in self.tree(tree)?.scan_prefix(prefix) {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    // ---- campaigns ----

    /// Persist a campaign row
    pub fn save_campaign(&self, campaign: &Campaign) -> EngineResult<()> {
        self.put_json(trees::CAMPAIGNS, campaign.id.to_string().as_bytes(), campaign)
    }

    /// Load a campaign row
    pub fn load_campaign(&self, id: CampaignId) -> EngineResult<Option<Campaign>> {
        self.get_json(trees::CAMPAIGNS, id.to_string().as_bytes())
    }

    /// Load a campaign row or fail
    pub fn require_campaign(&self, id: CampaignId) -> EngineResult<Campaign> {
        self.load_campaign(id)?
            .ok_or_else(|| DomainFlowError::CampaignNotFound { campaign_id: id.to_string() })
    }

    /// All campaign rows
    pub fn list_campaigns(&self) -> EngineResult<Vec<Campaign>> {
        self.scan_prefix_json(trees::CAMPAIGNS, b"")
    }

    /// Persist phase parameters for a campaign
    pub fn save_phase_params(&self, id: CampaignId, params: &PhaseParams) -> EngineResult<()> {
        self.put_json(trees::CAMPAIGN_PARAMS, id.to_string().as_bytes(), params)
    }

    /// Load phase parameters for a campaign
    pub fn load_phase_params(&self, id: CampaignId) -> EngineResult<Option<PhaseParams>> {
        self.get_json(trees::CAMPAIGN_PARAMS, id.to_string().as_bytes())
    }

    // ---- generated domains ----

    /// Load one domain row
    pub fn load_domain(&self, campaign_id: CampaignId, offset_index: u64) -> EngineResult<Option<GeneratedDomain>> {
        self.get_json(trees::GENERATED_DOMAINS, &keys::domain_key(campaign_id, offset_index))
    }

    /// Count domain rows for a campaign
    pub fn count_domains(&self, campaign_id: CampaignId) -> EngineResult<u64> {
        let tree = self.tree(trees::GENERATED_DOMAINS)?;
        let mut count = 0u64;
        for entry in tree.scan_prefix(keys::domain_prefix(campaign_id)) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    /// Count domain rows matching a predicate
    pub fn count_domains_where<F>(&self, campaign_id: CampaignId, predicate: F) -> EngineResult<u64>
    where
        F: Fn(&GeneratedDomain) -> bool,
    {
        let tree = self.tree(trees::GENERATED_DOMAINS)?;
        let mut count = 0u64;
        for entry in tree.scan_prefix(keys::domain_prefix(campaign_id)) {
            let (_, bytes) = entry?;
            let row: GeneratedDomain = serde_json::from_slice(&bytes)?;
            if predicate(&row) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Domain rows in `[from_offset, from_offset + limit)` enumeration order
    pub fn domains_from(
        &self,
        campaign_id: CampaignId,
        from_offset: u64,
        limit: usize,
    ) -> EngineResult<Vec<GeneratedDomain>> {
        let tree = self.tree(trees::GENERATED_DOMAINS)?;
        let start = keys::domain_key(campaign_id, from_offset);
        let prefix = keys::domain_prefix(campaign_id);
        let mut out = Vec::with_capacity(limit);
        for entry in tree.range(start..) {
            let (key, bytes) = entry?;
            if !key.starts_with(&prefix) || out.len() >= limit {
                break;
            }
            out.push(serde_json::from_slice(&bytes)?);
        }
        Ok(out)
    }

    /// At most `limit` domain rows ending at `end_offset` inclusive, in
    /// enumeration order
    pub fn domains_up_to(
        &self,
        campaign_id: CampaignId,
        end_offset: u64,
        limit: usize,
    ) -> EngineResult<Vec<GeneratedDomain>> {
        let tree = self.tree(trees::GENERATED_DOMAINS)?;
        let prefix = keys::domain_prefix(campaign_id);
        let end = keys::domain_key(campaign_id, end_offset);
        let mut out = Vec::with_capacity(limit);
        for entry in tree.range(prefix.clone()..=end).rev() {
            let (key, bytes) = entry?;
            if !key.starts_with(&prefix) || out.len() >= limit {
                break;
            }
            out.push(serde_json::from_slice(&bytes)?);
        }
        out.reverse();
        Ok(out)
    }

    /// The last `limit` domain rows of a campaign, in enumeration order
    pub fn domains_tail(&self, campaign_id: CampaignId, limit: usize) -> EngineResult<Vec<GeneratedDomain>> {
        let tree = self.tree(trees::GENERATED_DOMAINS)?;
        let prefix = keys::domain_prefix(campaign_id);
        let mut out = Vec::with_capacity(limit);
        for entry in tree.scan_prefix(&prefix).rev() {
            let (_, bytes) = entry?;
            if out.len() >= limit {
                break;
            }
            out.push(serde_json::from_slice(&bytes)?);
        }
        out.reverse();
        Ok(out)
    }

    // ---- config states ----

    /// Load a generation config state by hash
    pub fn load_config_state(&self, config_hash: &str) -> EngineResult<Option<GenerationConfigState>> {
        self.get_json(trees::CONFIG_STATES, config_hash.as_bytes())
    }

    /// Persist a generation config state
    pub fn save_config_state(&self, state: &GenerationConfigState) -> EngineResult<()> {
        self.put_json(trees::CONFIG_STATES, state.config_hash.as_bytes(), state)
    }

    // ---- batches ----

    /// Persist a batch row
    pub fn save_batch(&self, batch: &GenerationBatch) -> EngineResult<()> {
        self.put_json(trees::BATCHES, &keys::batch_key(batch.campaign_id, batch.batch_number), batch)
    }

    /// Load one batch row
    pub fn load_batch(&self, campaign_id: CampaignId, batch_number: u64) -> EngineResult<Option<GenerationBatch>> {
        self.get_json(trees::BATCHES, &keys::batch_key(campaign_id, batch_number))
    }

    /// All batches of a campaign, in batch-number order
    pub fn batches_for_campaign(&self, campaign_id: CampaignId) -> EngineResult<Vec<GenerationBatch>> {
        self.scan_prefix_json(trees::BATCHES, &keys::batch_prefix(campaign_id))
    }

    /// Lowest-numbered pending batch of a campaign
    pub fn next_pending_batch(&self, campaign_id: CampaignId) -> EngineResult<Option<GenerationBatch>> {
        let tree = self.tree(trees::BATCHES)?;
        for entry in tree.scan_prefix(keys::batch_prefix(campaign_id)) {
            let (_, bytes) = entry?;
            let batch: GenerationBatch = serde_json::from_slice(&bytes)?;
            if batch.status == crate::campaign::BatchStatus::Pending {
                return Ok(Some(batch));
            }
        }
        Ok(None)
    }

    /// All batches currently held by a worker, across campaigns
    pub fn batches_assigned_to(&self, worker_id: &str) -> EngineResult<Vec<GenerationBatch>> {
        let tree = self.tree(trees::BATCHES)?;
        let mut out = Vec::new();
        for entry in tree.iter() {
            let (_, bytes) = entry?;
            let batch: GenerationBatch = serde_json::from_slice(&bytes)?;
            if batch.assigned_worker.as_deref() == Some(worker_id) {
                out.push(batch);
            }
        }
        Ok(out)
    }

    // ---- workers ----

    /// Persist a worker coordination row
    pub fn save_worker(&self, record: &WorkerRecord) -> EngineResult<()> {
        self.put_json(trees::WORKERS, record.worker_id.as_bytes(), record)
    }

    /// Load a worker coordination row
    pub fn load_worker(&self, worker_id: &str) -> EngineResult<Option<WorkerRecord>> {
        self.get_json(trees::WORKERS, worker_id.as_bytes())
    }

    /// All worker coordination rows
    pub fn list_workers(&self) -> EngineResult<Vec<WorkerRecord>> {
        self.scan_prefix_json(trees::WORKERS, b"")
    }

    /// Delete a worker coordination row
    pub fn delete_worker(&self, worker_id: &str) -> EngineResult<()> {
        self.tree(trees::WORKERS)?.remove(worker_id.as_bytes())?;
        Ok(())
    }

    // ---- resource locks ----

    /// All lock rows over one resource, expired included
    pub fn locks_for(&self, resource_type: &str, resource_id: &str) -> EngineResult<Vec<ResourceLock>> {
        self.scan_prefix_json(trees::RESOURCE_LOCKS, &keys::lock_prefix(resource_type, resource_id))
    }

    /// Persist a lock row
    pub fn save_lock(&self, lock: &ResourceLock) -> EngineResult<()> {
        self.put_json(
            trees::RESOURCE_LOCKS,
            &keys::lock_key(&lock.resource_type, &lock.resource_id, &lock.lock_id),
            lock,
        )
    }

    /// Delete a lock row
    pub fn delete_lock(&self, lock: &ResourceLock) -> EngineResult<()> {
        self.tree(trees::RESOURCE_LOCKS)?
            .remove(&keys::lock_key(&lock.resource_type, &lock.resource_id, &lock.lock_id))?;
        Ok(())
    }

    /// Delete every expired lock row; returns the count
    pub fn purge_expired_locks(&self) -> EngineResult<u64> {
        let tree = self.tree(trees::RESOURCE_LOCKS)?;
        let now = Utc::now();
        let mut purged = 0u64;
        for entry in tree.iter() {
            let (key, bytes) = entry?;
            let lock: ResourceLock = serde_json::from_slice(&bytes)?;
            if lock.is_expired(now) {
                tree.remove(key)?;
                purged += 1;
            }
        }
        Ok(purged)
    }

    // ---- state transitions ----

    /// Transition records of a campaign, in sequence order
    pub fn transitions_for(&self, campaign_id: CampaignId) -> EngineResult<Vec<StateTransitionRecord>> {
        self.scan_prefix_json(trees::STATE_TRANSITIONS, &keys::domain_prefix(campaign_id))
    }

    // ---- durable SSE event log ----

    /// Append an event to the durable log
    pub fn append_event(&self, event: &SseEvent) -> EngineResult<()> {
        let nanos = event.timestamp.timestamp_nanos_opt().unwrap_or(0);
        self.put_json(trees::SSE_EVENTS, &keys::log_key(nanos, &event.id.to_string()), event)
    }

    /// Most recent `limit` events from the durable log
    pub fn recent_events(&self, limit: usize) -> EngineResult<Vec<SseEvent>> {
        let tree = self.tree(trees::SSE_EVENTS)?;
        let mut out = Vec::with_capacity(limit);
        for entry in tree.iter().rev().take(limit) {
            let (_, bytes) = entry?;
            out.push(serde_json::from_slice(&bytes)?);
        }
        out.reverse();
        Ok(out)
    }

    // ---- authorization ----

    /// Persist a user's permission grants
    pub fn save_permission_grants(&self, user_id: &str, grants: &[PermissionGrant]) -> EngineResult<()> {
        self.put_json(trees::ROLE_PERMISSIONS, user_id.as_bytes(), &grants)
    }

    /// Load a user's permission grants
    pub fn load_permission_grants(&self, user_id: &str) -> EngineResult<Vec<PermissionGrant>> {
        Ok(self.get_json(trees::ROLE_PERMISSIONS, user_id.as_bytes())?.unwrap_or_default())
    }

    /// Persist an endpoint rule
    pub fn save_endpoint_rule(&self, rule: &EndpointRule) -> EngineResult<()> {
        self.put_json(trees::ENDPOINT_RULES, &keys::endpoint_rule_key(&rule.method, &rule.pattern), rule)
    }

    /// Load the rule for (method, pattern)
    pub fn load_endpoint_rule(&self, method: &str, pattern: &str) -> EngineResult<Option<EndpointRule>> {
        self.get_json(trees::ENDPOINT_RULES, &keys::endpoint_rule_key(method, pattern))
    }

    /// Persist a campaign access grant
    pub fn save_campaign_grant(&self, grant: &CampaignAccessGrant) -> EngineResult<()> {
        self.put_json(trees::CAMPAIGN_GRANTS, &keys::grant_key(grant.campaign_id, &grant.user_id), grant)
    }

    /// Whether `user_id` holds an active grant for `campaign_id`
    pub fn has_active_grant(&self, campaign_id: CampaignId, user_id: &str) -> EngineResult<bool> {
        let grant: Option<CampaignAccessGrant> =
            self.get_json(trees::CAMPAIGN_GRANTS, &keys::grant_key(campaign_id, user_id))?;
        Ok(grant.map(|g| g.admits(Utc::now())).unwrap_or(false))
    }

    /// Append an authorization decision record
    pub fn append_auth_decision(&self, decision: &AuthorizationDecision) -> EngineResult<()> {
        let nanos = decision.created_at.timestamp_nanos_opt().unwrap_or(0);
        self.put_json(trees::AUTH_DECISIONS, &keys::log_key(nanos, &decision.id.to_string()), decision)
    }

    /// All authorization decision records
    pub fn list_auth_decisions(&self) -> EngineResult<Vec<AuthorizationDecision>> {
        self.scan_prefix_json(trees::AUTH_DECISIONS, b"")
    }

    /// Record the owner of a persona/proxy resource
    pub fn save_resource_owner(&self, resource_type: &str, resource_id: &str, owner_id: &str) -> EngineResult<()> {
        self.put_json(
            trees::RESOURCE_OWNERS,
            format!("{}|{}", resource_type, resource_id).as_bytes(),
            &owner_id.to_string(),
        )
    }

    /// Owner of a persona/proxy resource
    pub fn load_resource_owner(&self, resource_type: &str, resource_id: &str) -> EngineResult<Option<String>> {
        self.get_json(trees::RESOURCE_OWNERS, format!("{}|{}", resource_type, resource_id).as_bytes())
    }

    /// Append an access violation record
    pub fn append_access_violation(&self, violation: &AccessViolation) -> EngineResult<()> {
        let nanos = violation.created_at.timestamp_nanos_opt().unwrap_or(0);
        self.put_json(trees::ACCESS_VIOLATIONS, &keys::log_key(nanos, &violation.id.to_string()), violation)
    }

    /// All access violation records
    pub fn list_access_violations(&self) -> EngineResult<Vec<AccessViolation>> {
        self.scan_prefix_json(trees::ACCESS_VIOLATIONS, b"")
    }
}
