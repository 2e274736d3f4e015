//! Authorization records: permissions, rules, grants, decisions, violations

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::campaign::CampaignId;

/// A permission granted to a user through a role assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Permission string, e.g. `campaigns:delete`
    pub permission: String,
    /// Role that carried the grant
    pub role: String,
    /// Expiry; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl PermissionGrant {
    /// Whether the grant is usable at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

/// Persisted endpoint-authorization rule, keyed by pattern + method
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointRule {
    /// Endpoint pattern, e.g. `/campaigns/{id}`
    pub pattern: String,
    /// HTTP method
    pub method: String,
    /// Permissions the user must hold, all of them
    pub required_permissions: Vec<String>,
    /// Whether the caller must own the target resource
    pub require_ownership: bool,
    /// Whether the caller must have campaign access (ownership or grant)
    pub require_campaign_access: bool,
    /// Whether the endpoint is admin-scoped
    pub admin_only: bool,
    /// Whether the endpoint destroys data
    pub destructive: bool,
}

/// An explicit campaign-access grant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignAccessGrant {
    /// Campaign the grant covers
    pub campaign_id: CampaignId,
    /// User granted access
    pub user_id: String,
    /// Whether the grant is active
    pub active: bool,
    /// When the grant was issued
    pub granted_at: DateTime<Utc>,
    /// Expiry; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
}

impl CampaignAccessGrant {
    /// Whether the grant admits access at `now`
    pub fn admits(&self, now: DateTime<Utc>) -> bool {
        self.active && self.expires_at.map(|exp| exp > now).unwrap_or(true)
    }
}

/// Inputs to one authorization check
#[derive(Debug, Clone)]
pub struct AuthzRequest {
    /// Acting user
    pub user_id: String,
    /// Session the request arrived on
    pub session_id: String,
    /// Request correlation identifier
    pub request_id: String,
    /// HTTP method
    pub method: String,
    /// Endpoint pattern the router matched
    pub endpoint: String,
    /// Target resource type, when the endpoint addresses one
    pub resource_type: Option<String>,
    /// Target resource identifier
    pub resource_id: Option<String>,
    /// Campaign in scope, when any
    pub campaign_id: Option<CampaignId>,
    /// Free-form request context
    pub context: HashMap<String, String>,
}

/// Allow or deny
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Request admitted
    Allow,
    /// Request refused
    Deny,
}

/// Outcome of an authorization check
#[derive(Debug, Clone)]
pub struct AuthzOutcome {
    /// The decision
    pub decision: Decision,
    /// Why the decision fell the way it did
    pub reason: String,
    /// Risk score recorded on deny
    pub risk_score: Option<u8>,
}

impl AuthzOutcome {
    /// Whether the request was admitted
    pub fn is_allowed(&self) -> bool {
        self.decision == Decision::Allow
    }
}

/// Durable record of one authorization decision, allow or deny
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    /// Record identifier
    pub id: Uuid,
    /// Acting user
    pub user_id: String,
    /// Session identifier
    pub session_id: String,
    /// Request correlation identifier
    pub request_id: String,
    /// HTTP method
    pub method: String,
    /// Endpoint pattern
    pub endpoint: String,
    /// Target resource type
    pub resource_type: Option<String>,
    /// Target resource identifier
    pub resource_id: Option<String>,
    /// Campaign in scope
    pub campaign_id: Option<CampaignId>,
    /// The decision
    pub decision: Decision,
    /// Decision reason
    pub reason: String,
    /// When the decision was recorded
    pub created_at: DateTime<Utc>,
}

/// Durable record of a denied request, with risk score
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessViolation {
    /// Record identifier
    pub id: Uuid,
    /// Acting user
    pub user_id: String,
    /// Request correlation identifier
    pub request_id: String,
    /// HTTP method
    pub method: String,
    /// Endpoint pattern
    pub endpoint: String,
    /// Risk score in [0, 100]
    pub risk_score: u8,
    /// Violation reason
    pub reason: String,
    /// When the violation was recorded
    pub created_at: DateTime<Utc>,
}
