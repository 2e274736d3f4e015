//! Worker coordination records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::campaign::{CampaignId, CampaignType};

/// Worker lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Registered, waiting for work
    Idle,
    /// Executing a batch
    Working,
    /// Finishing current work, taking no new batches
    Draining,
}

/// One worker's coordination row
///
/// A worker is *active* iff its last heartbeat is within the configured
/// liveness window; silent workers are purged by scheduled cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    /// Stable worker identifier
    pub worker_id: String,
    /// Campaign the worker is attached to, if pinned
    pub campaign_id: Option<CampaignId>,
    /// Kind of work the worker performs
    pub kind: CampaignType,
    /// Lifecycle status
    pub status: WorkerStatus,
    /// Last heartbeat timestamp
    pub last_heartbeat: DateTime<Utc>,
    /// Tasks currently assigned
    pub assigned_tasks: Value,
    /// Resource lock ids the worker holds
    pub held_locks: Vec<String>,
    /// Free-form worker metadata
    pub metadata: Value,
}

impl WorkerRecord {
    /// Fresh idle record with a current heartbeat
    pub fn new(worker_id: impl Into<String>, campaign_id: Option<CampaignId>, kind: CampaignType) -> Self {
        Self {
            worker_id: worker_id.into(),
            campaign_id,
            kind,
            status: WorkerStatus::Idle,
            last_heartbeat: Utc::now(),
            assigned_tasks: Value::Null,
            held_locks: Vec::new(),
            metadata: Value::Null,
        }
    }

    /// Whether the heartbeat is fresh within `window`
    pub fn is_active(&self, now: DateTime<Utc>, window: std::time::Duration) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::seconds(30));
        now - self.last_heartbeat <= window
    }
}
