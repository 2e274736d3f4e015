//! Enhanced error records with severity/category classification
//!
//! Every recoverable failure point wraps its error into an [`EnhancedError`]
//! carrying classification, request identity, and a context map. The
//! classifier assigns severity and category from the error itself plus
//! caller-supplied context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

use crate::error::DomainFlowError;

/// Severity of an enhanced error
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Rejected input, no operational impact
    Low,
    /// Domain or transient failures
    Medium,
    /// Persistent failures requiring attention
    High,
    /// Failures that must page someone
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Category of an enhanced error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Relational-store failures
    Database,
    /// Transient network failures
    Network,
    /// Request validation failures
    Validation,
    /// Domain-rule violations
    Business,
    /// Failures writing audit records
    Audit,
    /// Everything else
    System,
}

impl ErrorCategory {
    /// All categories, used to pre-build circuit breakers
    pub fn all() -> [ErrorCategory; 6] {
        [
            Self::Database,
            Self::Network,
            Self::Validation,
            Self::Business,
            Self::Audit,
            Self::System,
        ]
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Database => "database",
            Self::Network => "network",
            Self::Validation => "validation",
            Self::Business => "business",
            Self::Audit => "audit",
            Self::System => "system",
        };
        write!(f, "{}", s)
    }
}

/// A classified error with request identity and context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedError {
    /// Unique error identifier
    pub id: Uuid,
    /// Assigned severity
    pub severity: ErrorSeverity,
    /// Assigned category
    pub category: ErrorCategory,
    /// Human-readable message
    pub message: String,
    /// Display form of the original error
    pub original: String,
    /// User on whose behalf the operation ran
    pub user_id: Option<String>,
    /// Campaign the operation touched
    pub campaign_id: Option<String>,
    /// Request correlation identifier
    pub request_id: String,
    /// Free-form context captured at the failure point
    pub context: HashMap<String, String>,
    /// When the error was recorded
    pub created_at: DateTime<Utc>,
}

impl EnhancedError {
    /// Attach a context entry
    pub fn with_context(mut self, key: &str, value: impl Into<String>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    /// Attach the campaign the operation touched
    pub fn with_campaign(mut self, campaign_id: impl Into<String>) -> Self {
        self.campaign_id = Some(campaign_id.into());
        self
    }

    /// Attach the acting user
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Assigns severity and category from error variants and text
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an engine error into an [`EnhancedError`]
    pub fn classify(err: &DomainFlowError, request_id: &str) -> EnhancedError {
        let (severity, category) = Self::severity_and_category(err);
        EnhancedError {
            id: Uuid::new_v4(),
            severity,
            category,
            message: err.to_string(),
            original: format!("{:?}", err),
            user_id: None,
            campaign_id: None,
            request_id: request_id.to_string(),
            context: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    fn severity_and_category(err: &DomainFlowError) -> (ErrorSeverity, ErrorCategory) {
        match err {
            DomainFlowError::Validation(_) | DomainFlowError::InvalidCursor(_) => {
                (ErrorSeverity::Low, ErrorCategory::Validation)
            }
            DomainFlowError::Business(_)
            | DomainFlowError::InvalidStateTransition { .. }
            | DomainFlowError::CampaignNotFound { .. }
            | DomainFlowError::BatchNotFound { .. }
            | DomainFlowError::ConfigNotFound(_) => (ErrorSeverity::Medium, ErrorCategory::Business),
            DomainFlowError::LockUnavailable { .. } | DomainFlowError::ConfigVersionMismatch { .. } => {
                (ErrorSeverity::Medium, ErrorCategory::Database)
            }
            DomainFlowError::Storage(msg) | DomainFlowError::Serialization(msg) => {
                // Connection drops read as network trouble, the rest is the store
                if Self::looks_transient(msg) {
                    (ErrorSeverity::Medium, ErrorCategory::Network)
                } else {
                    (ErrorSeverity::High, ErrorCategory::Database)
                }
            }
            DomainFlowError::Timeout { .. } => (ErrorSeverity::Medium, ErrorCategory::Network),
            DomainFlowError::Cancelled(_) => (ErrorSeverity::Low, ErrorCategory::System),
            DomainFlowError::CircuitOpen { .. } => (ErrorSeverity::Medium, ErrorCategory::Network),
            DomainFlowError::MaxClientsReached(_) => (ErrorSeverity::Medium, ErrorCategory::System),
            DomainFlowError::AccessDenied(_) => (ErrorSeverity::Medium, ErrorCategory::Business),
            DomainFlowError::Internal(_) => (ErrorSeverity::Critical, ErrorCategory::System),
        }
    }

    fn looks_transient(message: &str) -> bool {
        let lower = message.to_lowercase();
        ["connection", "timed out", "timeout", "refused", "reset", "unreachable"]
            .iter()
            .any(|needle| lower.contains(needle))
    }
}
