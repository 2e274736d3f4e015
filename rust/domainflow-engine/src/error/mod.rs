//! Error handling for the campaign execution core
//!
//! This module provides the error surface for the engine:
//! - **`DomainFlowError`**: top-level error variants with context
//! - **Enhanced errors**: severity/category classification with request context
//! - **Policies**: per-(category, severity) retry/escalate/audit decisions
//! - **Circuit breakers**: per-category failure gating
//!
//! Silent error swallowing is forbidden: every enhanced error must either be
//! retried, escalated, or audited.

use thiserror::Error;

pub mod circuit;
pub mod enhanced;
pub mod manager;
pub mod policy;

pub use circuit::{CircuitBreaker, CircuitBreakerRegistry, CircuitState};
pub use enhanced::{EnhancedError, ErrorCategory, ErrorClassifier, ErrorSeverity};
pub use manager::ErrorManager;
pub use policy::{ErrorPolicy, PolicyRegistry, RetryDecision};

/// Result type for engine operations
pub type EngineResult<T> = Result<T, DomainFlowError>;

/// Error types for the campaign execution core
#[derive(Error, Debug)]
pub enum DomainFlowError {
    /// Request-level validation failure, never retried
    #[error("Validation error: {0}")]
    Validation(String),

    /// Domain-rule violation, rejected and not retried
    #[error("Business rule violation: {0}")]
    Business(String),

    /// Campaign not found
    #[error("Campaign {campaign_id} not found")]
    CampaignNotFound {
        /// Campaign identifier that was not found
        campaign_id: String,
    },

    /// Batch not found
    #[error("Batch {batch_id} not found")]
    BatchNotFound {
        /// Batch identifier that was not found
        batch_id: String,
    },

    /// Rejected campaign status transition
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Status the campaign was in
        from: String,
        /// Status that was requested
        to: String,
    },

    /// A resource lock could not be acquired; callers back off and retry
    #[error("Resource {resource_type}/{resource_id} unavailable: {reason}")]
    LockUnavailable {
        /// Locked resource type
        resource_type: String,
        /// Locked resource identifier
        resource_id: String,
        /// Why the lock was refused
        reason: String,
    },

    /// Optimistic-concurrency failure on a config update
    #[error("Config version mismatch for {config_hash}: expected {expected}, found {found}")]
    ConfigVersionMismatch {
        /// Hash of the contended config
        config_hash: String,
        /// Version the updater loaded
        expected: u64,
        /// Version the store held at commit time
        found: u64,
    },

    /// Config state not found for a hash
    #[error("Config state {0} not found")]
    ConfigNotFound(String),

    /// Storage-layer failure; retryable inside the transaction wrapper
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization failure on a persisted record
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Operation exceeded its configured timeout
    #[error("Operation {operation} timed out after {timeout_ms}ms")]
    Timeout {
        /// Operation label
        operation: String,
        /// Configured timeout
        timeout_ms: u64,
    },

    /// Operation aborted by cancellation token
    #[error("Operation {0} cancelled")]
    Cancelled(String),

    /// Circuit breaker rejected the attempt
    #[error("Circuit open for category {category}")]
    CircuitOpen {
        /// Error category whose circuit is open
        category: String,
    },

    /// SSE client registry is at capacity
    #[error("Max SSE clients reached ({0})")]
    MaxClientsReached(usize),

    /// Malformed pagination cursor
    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    /// Authorization denied
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DomainFlowError {
    /// Whether the transaction wrapper may re-run the closure
    ///
    /// Lock contention and config version mismatches are surfaced instead;
    /// their callers own the back-off.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Stable short code surfaced in user-visible responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Business(_) => "business_rule_violation",
            Self::CampaignNotFound { .. } => "campaign_not_found",
            Self::BatchNotFound { .. } => "batch_not_found",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::LockUnavailable { .. } => "resource_unavailable",
            Self::ConfigVersionMismatch { .. } => "config_version_mismatch",
            Self::ConfigNotFound(_) => "config_not_found",
            Self::Storage(_) => "service_unavailable",
            Self::Serialization(_) => "serialization_error",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::MaxClientsReached(_) => "max_clients_reached",
            Self::InvalidCursor(_) => "invalid_cursor",
            Self::AccessDenied(_) => "access_denied",
            Self::Internal(_) => "internal_error",
        }
    }
}

impl From<sled::Error> for DomainFlowError {
    fn from(err: sled::Error) -> Self {
        DomainFlowError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DomainFlowError {
    fn from(err: serde_json::Error) -> Self {
        DomainFlowError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for DomainFlowError {
    fn from(err: std::io::Error) -> Self {
        DomainFlowError::Storage(err.to_string())
    }
}
