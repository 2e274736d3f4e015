//! SSE event model and type tags

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::campaign::CampaignId;

/// Stable event type tags
pub mod event_types {
    /// Campaign progress snapshot
    pub const CAMPAIGN_PROGRESS: &str = "campaign_progress";
    /// Campaign reached `completed`
    pub const CAMPAIGN_COMPLETED: &str = "campaign_completed";
    /// Phase began executing
    pub const PHASE_STARTED: &str = "phase_started";
    /// Phase paused by the user
    pub const PHASE_PAUSED: &str = "phase_paused";
    /// Phase resumed
    pub const PHASE_RESUMED: &str = "phase_resumed";
    /// Phase finished
    pub const PHASE_COMPLETED: &str = "phase_completed";
    /// Phase failed
    pub const PHASE_FAILED: &str = "phase_failed";
    /// Next phase auto-started in full-sequence mode
    pub const PHASE_AUTO_STARTED: &str = "phase_auto_started";
    /// A batch of domains was generated
    pub const DOMAIN_GENERATED: &str = "domain_generated";
    /// A batch of domains was validated
    pub const DOMAIN_VALIDATED: &str = "domain_validated";
    /// Incremental per-status delta
    pub const DOMAIN_STATUS_DELTA: &str = "domain_status_delta";
    /// Reconciler corrected drifted counters
    pub const COUNTERS_RECONCILED: &str = "counters_reconciled";
    /// Analysis finished
    pub const ANALYSIS_COMPLETED: &str = "analysis_completed";
    /// Execution mode changed
    pub const MODE_CHANGED: &str = "mode_changed";
    /// Keyword set created
    pub const KEYWORD_SET_CREATED: &str = "keyword_set_created";
    /// Keyword set updated
    pub const KEYWORD_SET_UPDATED: &str = "keyword_set_updated";
    /// Keyword set deleted
    pub const KEYWORD_SET_DELETED: &str = "keyword_set_deleted";
    /// Synthetic keep-alive
    pub const KEEP_ALIVE: &str = "keep_alive";
    /// Error surfaced to subscribers
    pub const ERROR: &str = "error";
}

/// One event flowing through the broadcaster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseEvent {
    /// Frame identifier
    pub id: Uuid,
    /// Stable type tag; unknown tags pass through for forward compatibility
    pub event_type: String,
    /// Campaign the event addresses, when any
    pub campaign_id: Option<CampaignId>,
    /// User the event addresses, when any
    pub user_id: Option<String>,
    /// When the event was produced
    pub timestamp: DateTime<Utc>,
    /// Free-form payload, canonicalised before delivery
    pub payload: Value,
}

impl SseEvent {
    /// Build an event with a payload
    pub fn new(event_type: &str, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            campaign_id: None,
            user_id: None,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Address the event to a campaign
    pub fn for_campaign(mut self, campaign_id: CampaignId) -> Self {
        self.campaign_id = Some(campaign_id);
        self
    }

    /// Address the event to a user
    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Synthetic keep-alive frame
    pub fn keep_alive() -> Self {
        Self::new(event_types::KEEP_ALIVE, serde_json::json!({}))
    }
}
