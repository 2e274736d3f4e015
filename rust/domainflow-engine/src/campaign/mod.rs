//! Campaign lifecycle: state machine, phase progression, batch execution
//!
//! The campaign is a finite-state machine whose transitions allocate a
//! monotone `phase_sequence` in the same commit as the status write and leave
//! a durable transition record. SSE fan-out happens best-effort after the
//! commit; consumers dedupe on `(campaign_id, sequence)`.

pub mod machine;
pub mod types;
pub mod validator;

pub use machine::{is_transition_allowed, CampaignEngine};
pub use types::{
    BatchId, BatchStatus, Campaign, CampaignId, CampaignStatus, CampaignType, DnsValidationParams,
    ExecutionMode, GeneratedDomain, GenerationBatch, HttpKeywordParams, LeadStatus, PhaseKind,
    PhaseParams, StateTransitionRecord, ValidationReason, ValidationStatus,
};
pub use validator::{PhaseValidator, ValidationOutcome};
