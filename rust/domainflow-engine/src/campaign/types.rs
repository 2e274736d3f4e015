//! Campaign aggregate, phase parameters, generated domains, and batches

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{DomainFlowError, EngineResult};
use crate::generation::GenerationParams;

/// Unique identifier for a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(pub Uuid);

impl CampaignId {
    /// Generate a new campaign ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse from string
    pub fn parse_str(s: &str) -> EngineResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainFlowError::Validation(format!("Invalid campaign ID: {}", e)))
    }
}

impl Default for CampaignId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CampaignId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a generation batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    /// Generate a new batch ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of work a campaign performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    /// Enumerate candidate domains from a keyspace
    Generation,
    /// Resolve generated domains against DNS
    DnsValidation,
    /// Fetch resolved domains and match keywords
    HttpKeywordValidation,
}

/// Pipeline phase; campaign types map 1:1 onto phases
pub type PhaseKind = CampaignType;

impl CampaignType {
    /// Next phase in the full-sequence pipeline
    pub fn next_phase(&self) -> Option<PhaseKind> {
        match self {
            Self::Generation => Some(Self::DnsValidation),
            Self::DnsValidation => Some(Self::HttpKeywordValidation),
            Self::HttpKeywordValidation => None,
        }
    }

    /// Stable string tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generation => "generation",
            Self::DnsValidation => "dns_validation",
            Self::HttpKeywordValidation => "http_keyword_validation",
        }
    }
}

impl std::fmt::Display for CampaignType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    /// Created but not yet queued
    Pending,
    /// Waiting for a worker
    Queued,
    /// A phase is executing
    Running,
    /// Suspended by the user
    Paused,
    /// All phases finished
    Completed,
    /// A phase failed terminally
    Failed,
    /// Cancelled by the user
    Cancelled,
}

impl CampaignStatus {
    /// Terminal statuses are absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable string tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How far a campaign runs on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Stop after the configured phase completes
    SinglePhase,
    /// Advance through generation, DNS, and HTTP keyword phases automatically
    FullSequence,
}

/// Campaign aggregate root
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    /// Unique campaign identifier
    pub id: CampaignId,
    /// Owning user
    pub owner_id: String,
    /// Kind of work
    pub campaign_type: CampaignType,
    /// Lifecycle status
    pub status: CampaignStatus,
    /// Execution mode
    pub execution_mode: ExecutionMode,
    /// Items the campaign will process in total
    pub total_items: u64,
    /// Items processed so far
    pub processed_items: u64,
    /// Items that succeeded
    pub successful_items: u64,
    /// Items that failed
    pub failed_items: u64,
    /// Phase currently executing, if any
    pub current_phase: Option<PhaseKind>,
    /// Monotone sequence number stamped on every lifecycle event
    pub phase_sequence: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// When the first phase started
    pub started_at: Option<DateTime<Utc>>,
    /// When a terminal status was reached
    pub completed_at: Option<DateTime<Utc>>,
}

impl Campaign {
    /// Create a pending campaign
    pub fn new(owner_id: impl Into<String>, campaign_type: CampaignType, execution_mode: ExecutionMode) -> Self {
        let now = Utc::now();
        Self {
            id: CampaignId::new(),
            owner_id: owner_id.into(),
            campaign_type,
            status: CampaignStatus::Pending,
            execution_mode,
            total_items: 0,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            current_phase: None,
            phase_sequence: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Check the counter invariants
    pub fn counters_consistent(&self) -> bool {
        self.processed_items <= self.total_items
            && self.successful_items + self.failed_items <= self.processed_items
    }

    /// Completion ratio in percent
    pub fn percent_complete(&self) -> f64 {
        if self.total_items == 0 {
            0.0
        } else {
            (self.processed_items as f64 / self.total_items as f64) * 100.0
        }
    }
}

/// Phase parameters, typed per campaign type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseParams {
    /// Domain generation parameters
    Generation(GenerationParams),
    /// DNS validation parameters
    DnsValidation(DnsValidationParams),
    /// HTTP keyword validation parameters
    HttpKeyword(HttpKeywordParams),
}

impl PhaseParams {
    /// Phase the parameters belong to
    pub fn phase(&self) -> PhaseKind {
        match self {
            Self::Generation(_) => CampaignType::Generation,
            Self::DnsValidation(_) => CampaignType::DnsValidation,
            Self::HttpKeyword(_) => CampaignType::HttpKeywordValidation,
        }
    }

    /// Validate the parameters at campaign creation
    pub fn validate(&self) -> EngineResult<()> {
        match self {
            Self::Generation(params) => params.validate(),
            Self::DnsValidation(params) => params.validate(),
            Self::HttpKeyword(params) => params.validate(),
        }
    }
}

/// DNS validation phase parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsValidationParams {
    /// Generation campaign whose domains feed this phase
    pub source_campaign_id: CampaignId,
    /// Persona identifiers rotated through
    pub persona_ids: Vec<String>,
    /// Seconds between persona rotations
    pub rotation_interval_secs: u64,
    /// Retry attempts per domain
    pub retry_attempts: u32,
    /// Domains per batch
    pub batch_size: u64,
}

impl DnsValidationParams {
    /// Validate at campaign creation
    pub fn validate(&self) -> EngineResult<()> {
        if self.persona_ids.is_empty() {
            return Err(DomainFlowError::Validation("at least one persona is required".into()));
        }
        if self.batch_size == 0 {
            return Err(DomainFlowError::Validation("batch size must be positive".into()));
        }
        Ok(())
    }
}

/// HTTP keyword validation phase parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpKeywordParams {
    /// Persona identifiers rotated through
    pub persona_ids: Vec<String>,
    /// Keyword set references
    pub keyword_set_ids: Vec<String>,
    /// Proxy pool identifier
    pub proxy_pool_id: Option<String>,
    /// Domains per batch
    pub batch_size: u64,
}

impl HttpKeywordParams {
    /// Validate at campaign creation
    pub fn validate(&self) -> EngineResult<()> {
        if self.keyword_set_ids.is_empty() {
            return Err(DomainFlowError::Validation("at least one keyword set is required".into()));
        }
        if self.batch_size == 0 {
            return Err(DomainFlowError::Validation("batch size must be positive".into()));
        }
        Ok(())
    }
}

/// Per-domain validation outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Not yet attempted
    Pending,
    /// Validated successfully
    Ok,
    /// Failed with an error reason
    Error,
    /// Timed out
    Timeout,
}

/// Why a validation attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationReason {
    /// No DNS record
    Nxdomain,
    /// DNS server failure
    Servfail,
    /// Connection refused or dropped
    ConnectionFailed,
    /// HTTP status outside 2xx
    BadStatus,
    /// Keywords absent from the fetched body
    KeywordsMissing,
    /// Resolver or fetcher timed out
    TimedOut,
    /// Anything else, detail in logs
    Other,
}

/// Lead qualification state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    /// Not yet scored
    Pending,
    /// Keyword match qualified the domain
    Qualified,
    /// Scored and rejected
    Disqualified,
}

/// One enumerated candidate domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedDomain {
    /// Generation campaign the domain belongs to
    pub campaign_id: CampaignId,
    /// Dense, zero-based position in the enumeration order
    pub offset_index: u64,
    /// Fully qualified domain string
    pub domain: String,
    /// Resolved address when DNS revalidation is integrated
    pub dns_ip: Option<String>,
    /// DNS validation status
    pub dns_status: ValidationStatus,
    /// DNS failure reason; cleared when status returns to `Ok`
    pub dns_reason: Option<ValidationReason>,
    /// HTTP validation status
    pub http_status: ValidationStatus,
    /// HTTP failure reason; cleared when status returns to `Ok`
    pub http_reason: Option<ValidationReason>,
    /// Lead qualification state
    pub lead_status: LeadStatus,
    /// When the row was written
    pub created_at: DateTime<Utc>,
}

impl GeneratedDomain {
    /// Row for a freshly generated domain
    pub fn new(campaign_id: CampaignId, offset_index: u64, domain: String) -> Self {
        Self {
            campaign_id,
            offset_index,
            domain,
            dns_ip: None,
            dns_status: ValidationStatus::Pending,
            dns_reason: None,
            http_status: ValidationStatus::Pending,
            http_reason: None,
            lead_status: LeadStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// Apply a DNS validation outcome, clearing the reason on success
    pub fn set_dns_outcome(&mut self, status: ValidationStatus, reason: Option<ValidationReason>, ip: Option<String>) {
        self.dns_status = status;
        self.dns_reason = if status == ValidationStatus::Ok { None } else { reason };
        if status == ValidationStatus::Ok {
            self.dns_ip = ip;
        }
    }

    /// Apply an HTTP validation outcome, clearing the reason on success
    pub fn set_http_outcome(&mut self, status: ValidationStatus, reason: Option<ValidationReason>) {
        self.http_status = status;
        self.http_reason = if status == ValidationStatus::Ok { None } else { reason };
    }
}

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Waiting for a worker
    Pending,
    /// Picked by a worker, not yet running
    Assigned,
    /// Executing
    Running,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
}

/// A contiguous slice of a campaign's work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationBatch {
    /// Batch identifier
    pub id: BatchId,
    /// Parent campaign
    pub campaign_id: CampaignId,
    /// FIFO assignment order within the campaign
    pub batch_number: u64,
    /// Domains this batch covers
    pub total_domains: u64,
    /// Domains processed so far
    pub processed_domains: u64,
    /// Domains that failed
    pub failed_domains: u64,
    /// Lifecycle status
    pub status: BatchStatus,
    /// Worker currently holding the batch
    pub assigned_worker: Option<String>,
    /// When a worker started the batch
    pub started_at: Option<DateTime<Utc>>,
    /// When the batch finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Error detail for failed batches
    pub error_detail: Option<Value>,
}

impl GenerationBatch {
    /// Create a pending batch
    pub fn new(campaign_id: CampaignId, batch_number: u64, total_domains: u64) -> Self {
        Self {
            id: BatchId::new(),
            campaign_id,
            batch_number,
            total_domains,
            processed_domains: 0,
            failed_domains: 0,
            status: BatchStatus::Pending,
            assigned_worker: None,
            started_at: None,
            completed_at: None,
            error_detail: None,
        }
    }
}

/// Durable record of one lifecycle transition
///
/// Written in the same commit as the status change; consumers dedupe on
/// `(campaign_id, sequence)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransitionRecord {
    /// Campaign the transition belongs to
    pub campaign_id: CampaignId,
    /// Sequence number allocated with the transition
    pub sequence: u64,
    /// Status before
    pub from: CampaignStatus,
    /// Status after
    pub to: CampaignStatus,
    /// Phase entered or left, when applicable
    pub phase: Option<PhaseKind>,
    /// Who drove the transition
    pub actor_id: String,
    /// Reason code for failures and cancellations
    pub reason: Option<String>,
    /// When the transition committed
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(CampaignStatus::Completed.is_terminal());
        assert!(CampaignStatus::Failed.is_terminal());
        assert!(CampaignStatus::Cancelled.is_terminal());
        assert!(!CampaignStatus::Running.is_terminal());
        assert!(!CampaignStatus::Paused.is_terminal());
    }

    #[test]
    fn phase_pipeline_order() {
        assert_eq!(CampaignType::Generation.next_phase(), Some(CampaignType::DnsValidation));
        assert_eq!(
            CampaignType::DnsValidation.next_phase(),
            Some(CampaignType::HttpKeywordValidation)
        );
        assert_eq!(CampaignType::HttpKeywordValidation.next_phase(), None);
    }

    #[test]
    fn dns_reason_cleared_on_ok() {
        let mut row = GeneratedDomain::new(CampaignId::new(), 0, "xaaa.com".into());
        row.set_dns_outcome(ValidationStatus::Error, Some(ValidationReason::Nxdomain), None);
        assert_eq!(row.dns_reason, Some(ValidationReason::Nxdomain));
        row.set_dns_outcome(ValidationStatus::Ok, Some(ValidationReason::Other), Some("1.2.3.4".into()));
        assert_eq!(row.dns_reason, None);
        assert_eq!(row.dns_ip.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn counter_invariants() {
        let mut campaign = Campaign::new("user-1", CampaignType::Generation, ExecutionMode::SinglePhase);
        campaign.total_items = 100;
        campaign.processed_items = 50;
        campaign.successful_items = 30;
        campaign.failed_items = 20;
        assert!(campaign.counters_consistent());
        campaign.failed_items = 30;
        assert!(!campaign.counters_consistent());
    }
}
