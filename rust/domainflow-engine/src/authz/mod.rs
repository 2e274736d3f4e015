//! Authorization core
//!
//! Permission resolution through role assignments, resource ownership,
//! campaign access grants, persisted endpoint rules, and risk-scored audit of
//! every decision.

pub mod risk;
pub mod service;
pub mod types;

pub use risk::risk_score;
pub use service::AuthorizationService;
pub use types::{
    AccessViolation, AuthorizationDecision, AuthzOutcome, AuthzRequest, CampaignAccessGrant,
    Decision, EndpointRule, PermissionGrant,
};
